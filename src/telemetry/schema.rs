//! Canonical telemetry schema.
//!
//! Every canonical field is declared exactly once in the `telemetry_groups!`
//! invocation below, together with the key it uses in the nested push
//! encoding and the key it uses in the flat snapshot encoding. The typed
//! group structs, the mapping rows returned by [`field_mappings`] and the
//! lookup used by the normalizer are all generated from that table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value type of a canonical field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldKind {
    /// `f64`, defaults to `0`.
    Number,
    /// `bool`, defaults to `false`.
    Flag,
}

/// One row of the canonical mapping table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldMapping {
    /// Subsystem group key (`gimbal`, `imu`, ...).
    pub group: &'static str,
    /// Field name in the canonical frame.
    pub canonical: &'static str,
    /// Key inside the group object of the nested push encoding.
    pub nested: &'static str,
    /// Top-level key of the flat snapshot encoding.
    pub flat: &'static str,
    pub kind: FieldKind,
}

/// Conversion from an optional wire value into a canonical field value.
///
/// Missing or mistyped values resolve to the type's zero value.
pub trait CanonicalValue: Copy + Default + Into<Value> {
    const KIND: FieldKind;

    fn from_wire(value: Option<&Value>) -> Self;
}

impl CanonicalValue for f64 {
    const KIND: FieldKind = FieldKind::Number;

    fn from_wire(value: Option<&Value>) -> Self {
        value
            .and_then(Value::as_f64)
            .filter(|number| number.is_finite())
            .unwrap_or_default()
    }
}

impl CanonicalValue for bool {
    const KIND: FieldKind = FieldKind::Flag;

    /// Integer flags (`0`/`1`) from logged rows are accepted too.
    fn from_wire(value: Option<&Value>) -> Self {
        value
            .and_then(|value| {
                value
                    .as_bool()
                    .or_else(|| value.as_f64().map(|number| number != 0.0))
            })
            .unwrap_or_default()
    }
}

macro_rules! field_mapping {
    ($group_key:literal, $canonical:literal, $nested:literal, $flat:literal, $ty:ty) => {
        FieldMapping {
            group: $group_key,
            canonical: $canonical,
            nested: $nested,
            flat: $flat,
            kind: <$ty as CanonicalValue>::KIND,
        }
    };
}

macro_rules! telemetry_groups {
    (
        $(
            $(#[$group_meta:meta])*
            $group:ident: $group_ty:ident = $group_key:literal {
                $( $field:ident: $ty:ty => $canonical:literal, nested $nested:literal, flat $flat:literal; )*
            }
        )*
    ) => {
        $(
            $(#[$group_meta])*
            #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
            #[serde(default)]
            pub struct $group_ty {
                $(
                    #[serde(rename = $canonical)]
                    pub $field: $ty,
                )*
            }

            impl $group_ty {
                /// Group key in the canonical frame and the nested encoding.
                pub const KEY: &'static str = $group_key;

                /// Mapping rows for this group.
                pub const FIELDS: &'static [FieldMapping] = &[
                    $( field_mapping!($group_key, $canonical, $nested, $flat, $ty), )*
                ];

                fn from_lookup<'a, F>(lookup: &mut F) -> Self
                where
                    F: FnMut(&FieldMapping) -> Option<&'a Value>,
                {
                    Self {
                        $(
                            $field: <$ty as CanonicalValue>::from_wire(lookup(
                                &field_mapping!($group_key, $canonical, $nested, $flat, $ty),
                            )),
                        )*
                    }
                }

                fn value(&self, canonical: &str) -> Option<Value> {
                    match canonical {
                        $( $canonical => Some(self.$field.into()), )*
                        _ => None,
                    }
                }
            }
        )*

        /// The single normalized record delivered to consumers, regardless of
        /// which wire encoding produced it.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct CanonicalTelemetryFrame {
            $(
                #[serde(rename = $group_key)]
                pub $group: $group_ty,
            )*
        }

        impl CanonicalTelemetryFrame {
            /// Group keys in declaration order.
            pub const GROUPS: &'static [&'static str] = &[ $( $group_key, )* ];

            /// Builds a frame by resolving every mapping row through `lookup`.
            pub(crate) fn from_lookup<'a, F>(mut lookup: F) -> Self
            where
                F: FnMut(&FieldMapping) -> Option<&'a Value>,
            {
                Self {
                    $( $group: $group_ty::from_lookup(&mut lookup), )*
                }
            }

            /// Returns the value of the field described by `mapping`.
            pub fn value(&self, mapping: &FieldMapping) -> Option<Value> {
                match mapping.group {
                    $( $group_key => self.$group.value(mapping.canonical), )*
                    _ => None,
                }
            }
        }

        /// Every mapping row, grouped in declaration order.
        pub fn field_mappings() -> impl Iterator<Item = &'static FieldMapping> {
            [ $( $group_ty::FIELDS, )* ].into_iter().flatten()
        }
    };
}

telemetry_groups! {
    /// Azimuth/elevation drive state.
    gimbal: GimbalTelemetry = "gimbal" {
        gimbal_az: f64 => "gimbalAz", nested "azimuth", flat "gimbalAz";
        gimbal_el: f64 => "gimbalEl", nested "elevation", flat "gimbalEl";
        az_speed: f64 => "azSpeed", nested "azimuthSpeed", flat "azimuthSpeed";
        el_speed: f64 => "elSpeed", nested "elevationSpeed", flat "elevationSpeed";
        op_mode: f64 => "opMode", nested "opMode", flat "opMode";
        motion_mode: f64 => "motionMode", nested "motionMode", flat "motionMode";
    }

    /// Inertial measurement unit attitude.
    imu: ImuTelemetry = "imu" {
        roll_deg: f64 => "imuRollDeg", nested "roll", flat "roll";
        pitch_deg: f64 => "imuPitchDeg", nested "pitch", flat "pitch";
        yaw_deg: f64 => "imuYawDeg", nested "yaw", flat "yaw";
        temperature: f64 => "temperature", nested "temperature", flat "temperature";
    }

    /// Motor/driver temperatures and station health.
    device: DeviceTelemetry = "device" {
        az_motor_temp: f64 => "azMotorTemp", nested "azMotorTemp", flat "azMotorTemp";
        az_driver_temp: f64 => "azDriverTemp", nested "azDriverTemp", flat "azDriverTemp";
        el_motor_temp: f64 => "elMotorTemp", nested "elMotorTemp", flat "elMotorTemp";
        el_driver_temp: f64 => "elDriverTemp", nested "elDriverTemp", flat "elDriverTemp";
        station_temp: f64 => "stationTemp", nested "stationTemp", flat "stationTemp";
        emergency_stop: bool => "emergencyStop", nested "emergencyStop", flat "emergencyStop";
    }

    weapon: WeaponTelemetry = "weapon" {
        gun_armed: bool => "gunArmed", nested "armed", flat "armed";
        ready: bool => "weaponReady", nested "ready", flat "ready";
        ammo_loaded: bool => "ammoLoaded", nested "ammoLoaded", flat "ammoLoaded";
        fire_mode: f64 => "fireMode", nested "fireMode", flat "fireMode";
        ammunition_level: bool => "ammunitionLevel", nested "ammunitionLevel", flat "ammunitionLevel";
    }

    /// Tracker phase and target position.
    tracking: TrackingTelemetry = "tracking" {
        active: bool => "trackingActive", nested "active", flat "trackingActive";
        phase: f64 => "trackingPhase", nested "phase", flat "trackingPhase";
        has_valid_target: bool => "hasValidTarget", nested "hasTarget", flat "hasValidTarget";
        target_az: f64 => "targetAz", nested "targetAz", flat "targetAz";
        target_el: f64 => "targetEl", nested "targetEl", flat "targetEl";
    }

    camera: CameraTelemetry = "camera" {
        day_zoom: f64 => "dayZoom", nested "dayZoom", flat "dayZoom";
        night_zoom: f64 => "nightZoom", nested "nightZoom", flat "nightZoom";
        day_hfov: f64 => "dayHfov", nested "dayHFOV", flat "dayHFOV";
        night_hfov: f64 => "nightHfov", nested "nightHFOV", flat "nightHFOV";
    }

    /// Laser range finder.
    sensor: SensorTelemetry = "sensor" {
        lrf_distance: f64 => "lrfDistance", nested "lrfDistance", flat "lrfDistance";
        lrf_status: f64 => "lrfStatus", nested "lrfStatus", flat "lrfStatus";
    }

    /// Zeroing and windage corrections.
    ballistic: BallisticTelemetry = "ballistic" {
        zeroing_active: bool => "zeroingActive", nested "zeroingActive", flat "zeroingActive";
        zeroing_az_offset: f64 => "zeroingAzOffset", nested "zeroingAzOffset", flat "zeroingAzOffset";
        zeroing_el_offset: f64 => "zeroingElOffset", nested "zeroingElOffset", flat "zeroingElOffset";
        windage_active: bool => "windageActive", nested "windageActive", flat "windageActive";
        wind_speed: f64 => "windSpeed", nested "windSpeed", flat "windSpeed";
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{field_mappings, CanonicalTelemetryFrame, FieldKind, GimbalTelemetry};

    #[test]
    fn flat_keys_are_unique_across_groups() {
        let mut seen = HashSet::new();
        for mapping in field_mappings() {
            assert!(seen.insert(mapping.flat), "duplicate flat key {}", mapping.flat);
        }
    }

    #[test]
    fn canonical_names_never_shadow_another_nested_key() {
        for mapping in field_mappings() {
            let clash = field_mappings().find(|other| {
                other.group == mapping.group
                    && other.canonical != mapping.canonical
                    && other.nested == mapping.canonical
            });
            assert!(clash.is_none(), "{} shadows {:?}", mapping.canonical, clash);
        }
    }

    #[test]
    fn every_group_is_declared_with_fields() {
        assert_eq!(
            CanonicalTelemetryFrame::GROUPS,
            &["gimbal", "imu", "device", "weapon", "tracking", "camera", "sensor", "ballistic"]
        );
        for group in CanonicalTelemetryFrame::GROUPS {
            assert!(field_mappings().any(|mapping| mapping.group == *group));
        }
        assert_eq!(field_mappings().count(), 37);
    }

    #[test]
    fn serializes_with_canonical_names() {
        let mut frame = CanonicalTelemetryFrame::default();
        frame.gimbal = GimbalTelemetry {
            gimbal_az: 12.5,
            ..GimbalTelemetry::default()
        };
        frame.weapon.gun_armed = true;

        let json = serde_json::to_value(frame).expect("serialize frame");
        assert_eq!(json["gimbal"]["gimbalAz"], 12.5);
        assert_eq!(json["weapon"]["gunArmed"], true);
        assert_eq!(json["ballistic"]["windSpeed"], 0.0);
    }

    #[test]
    fn mapping_kinds_follow_field_types() {
        let kind_of = |canonical: &str| {
            field_mappings()
                .find(|mapping| mapping.canonical == canonical)
                .map(|mapping| mapping.kind)
        };
        assert_eq!(kind_of("gimbalAz"), Some(FieldKind::Number));
        assert_eq!(kind_of("emergencyStop"), Some(FieldKind::Flag));
        assert_eq!(kind_of("unknown"), None);
    }
}
