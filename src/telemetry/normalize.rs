//! Mapping of wire payloads onto [`CanonicalTelemetryFrame`].
//!
//! Telemetry arrives either as a nested push payload (`{"gimbal": {"azimuth":
//! ..}, "imu": {..}}`) or as a flat snapshot/history record (`{"gimbalAz":
//! .., "roll": ..}`). The encoding is decided once per payload and the
//! mapping table in [`schema`](super::schema) resolves every field.

use serde_json::{Map, Value};

use crate::telemetry::schema::{field_mappings, CanonicalTelemetryFrame, GimbalTelemetry};

/// Wire encoding of a telemetry payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WireFormat {
    /// Subsystem groups are nested objects (live push encoding).
    Nested,
    /// All fields sit at the top level (snapshot and history encoding).
    Flat,
}

impl WireFormat {
    /// Classifies a payload by whether its `gimbal` member is an object.
    pub fn detect(payload: &Value) -> Self {
        match payload.get(GimbalTelemetry::KEY) {
            Some(Value::Object(_)) => Self::Nested,
            _ => Self::Flat,
        }
    }
}

/// Normalizes a payload of either encoding.
///
/// Never fails: missing groups, missing fields and mistyped values resolve to
/// `0` / `false`.
pub fn normalize(payload: &Value) -> CanonicalTelemetryFrame {
    normalize_as(payload, WireFormat::detect(payload))
}

/// Normalizes a payload with an already decided encoding.
pub fn normalize_as(payload: &Value, format: WireFormat) -> CanonicalTelemetryFrame {
    let root = payload.as_object();
    match format {
        WireFormat::Nested => CanonicalTelemetryFrame::from_lookup(|mapping| {
            let group = root?.get(mapping.group)?.as_object()?;
            group
                .get(mapping.nested)
                .or_else(|| group.get(mapping.canonical))
        }),
        WireFormat::Flat => {
            CanonicalTelemetryFrame::from_lookup(|mapping| root?.get(mapping.flat))
        }
    }
}

/// Renders a canonical frame in the given wire encoding.
///
/// Useful for replaying recorded frames against a server or a test double.
pub fn encode(frame: &CanonicalTelemetryFrame, format: WireFormat) -> Value {
    let mut root = Map::new();
    for mapping in field_mappings() {
        let Some(value) = frame.value(mapping) else {
            continue;
        };
        match format {
            WireFormat::Nested => {
                let group = root
                    .entry(mapping.group)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(fields) = group {
                    fields.insert(mapping.nested.to_string(), value);
                }
            }
            WireFormat::Flat => {
                root.insert(mapping.flat.to_string(), value);
            }
        }
    }
    Value::Object(root)
}
