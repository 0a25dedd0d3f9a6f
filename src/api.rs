//! Authenticated REST queries: history ranges, export, current snapshot and
//! auxiliary server endpoints.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthSession;
use crate::error::{Result, TelemetryError};
use crate::retry::{retry_async, RetryPolicy};
use crate::telemetry::normalize::normalize_as;
use crate::telemetry::{normalize, CanonicalTelemetryFrame, WireFormat};

const ERROR_BODY_SNIPPET_LEN: usize = 220;

/// Telemetry group addressable by the history endpoints.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryCategory {
    Gimbal,
    Imu,
    Device,
    Tracking,
    Weapon,
    Camera,
    Sensor,
    Ballistic,
}

impl HistoryCategory {
    /// Every category, in canonical group order.
    pub const ALL: [Self; 8] = [
        Self::Gimbal,
        Self::Imu,
        Self::Device,
        Self::Tracking,
        Self::Weapon,
        Self::Camera,
        Self::Sensor,
        Self::Ballistic,
    ];

    /// Path segment used by the history endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gimbal => "gimbal",
            Self::Imu => "imu",
            Self::Device => "device",
            Self::Tracking => "tracking",
            Self::Weapon => "weapon",
            Self::Camera => "camera",
            Self::Sensor => "sensor",
            Self::Ballistic => "ballistic",
        }
    }
}

impl fmt::Display for HistoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryCategory {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| TelemetryError::InvalidRequest(format!("unknown category {value:?}")))
    }
}

/// Storage statistics views.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatsKind {
    Memory,
    Samples,
    TimeRange,
}

impl StatsKind {
    /// Path segment of the stats endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Samples => "samples",
            Self::TimeRange => "timerange",
        }
    }
}

/// Inclusive query window. `from` never exceeds `to`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeRange {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl TimeRange {
    /// Window from `from` to `to`, rejected when inverted.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self> {
        if from > to {
            return Err(TelemetryError::InvalidRequest(format!(
                "range start {from} is after range end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    /// The window ending now.
    pub fn last(span: chrono::Duration) -> Self {
        let to = Utc::now();
        Self { from: to - span, to }
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> DateTime<Utc> {
        self.from
    }

    /// Inclusive upper bound.
    pub fn end(&self) -> DateTime<Utc> {
        self.to
    }

    fn query(&self) -> [(&'static str, String); 2] {
        [
            ("from", format_timestamp(self.from)),
            ("to", format_timestamp(self.to)),
        ]
    }
}

/// One historical row mapped onto the canonical frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub frame: CanonicalTelemetryFrame,
}

impl HistoryRecord {
    /// Reads a flat history row. Unknown keys are ignored and missing ones
    /// default.
    pub fn from_value(row: &Value) -> Self {
        Self {
            timestamp: row
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
            frame: normalize_as(row, WireFormat::Flat),
        }
    }
}

/// Request/response client for the telemetry REST API.
///
/// Every call except [`health`](Self::health) and [`version`](Self::version)
/// requires a logged-in [`AuthSession`] and fails before any network IO
/// otherwise.
#[derive(Clone, Debug)]
pub struct HistoryQueryClient {
    http: Client,
    session: AuthSession,
    fallback_server_url: Option<String>,
    attempt_timeout: Duration,
    retry_policy: RetryPolicy,
}

enum Access {
    Authenticated,
    Public,
}

impl HistoryQueryClient {
    /// Query client sharing `session` and its HTTP client.
    pub fn new(session: AuthSession, attempt_timeout: Duration, retry_policy: RetryPolicy) -> Self {
        Self {
            http: session.http().clone(),
            session,
            fallback_server_url: None,
            attempt_timeout,
            retry_policy,
        }
    }

    /// Server used by public endpoints before anyone has logged in.
    pub fn with_fallback_server_url(mut self, server_url: Option<String>) -> Self {
        self.fallback_server_url =
            server_url.map(|url| url.trim().trim_end_matches('/').to_string());
        self
    }

    /// Ordered rows of `category` within `range`.
    pub async fn history(
        &self,
        category: HistoryCategory,
        range: TimeRange,
    ) -> Result<Vec<HistoryRecord>> {
        let rows = self.history_raw(category, range).await?;
        Ok(rows.iter().map(HistoryRecord::from_value).collect())
    }

    /// Rows exactly as the server sent them.
    pub async fn history_raw(
        &self,
        category: HistoryCategory,
        range: TimeRange,
    ) -> Result<Vec<Value>> {
        let path = format!("/api/telemetry/history/{category}");
        let body = self.get(&path, &range.query(), Access::Authenticated).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Server-rendered CSV export of `category` within `range`.
    pub async fn export_csv(&self, category: HistoryCategory, range: TimeRange) -> Result<Vec<u8>> {
        let [from, to] = range.query();
        let query = [("category", category.as_str().to_string()), from, to];
        self.get("/api/telemetry/export/csv", &query, Access::Authenticated)
            .await
    }

    /// Latest server-side snapshot, normalized.
    pub async fn current(&self) -> Result<CanonicalTelemetryFrame> {
        let body = self
            .get("/api/telemetry/current", &[], Access::Authenticated)
            .await?;
        let snapshot: Value = serde_json::from_slice(&body)?;
        Ok(normalize(&snapshot))
    }

    /// Storage statistics (`memory`, `samples` or `timerange`).
    pub async fn storage_stats(&self, kind: StatsKind) -> Result<Value> {
        let path = format!("/api/telemetry/stats/{}", kind.as_str());
        self.get_json(&path, Access::Authenticated).await
    }

    /// Server health report. Public endpoint.
    pub async fn health(&self) -> Result<Value> {
        self.get_json("/api/health", Access::Public).await
    }

    /// Server version report. Public endpoint.
    pub async fn version(&self) -> Result<Value> {
        self.get_json("/api/version", Access::Public).await
    }

    async fn get_json(&self, path: &str, access: Access) -> Result<Value> {
        let body = self.get(path, &[], access).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get(&self, path: &str, query: &[(&str, String)], access: Access) -> Result<Vec<u8>> {
        let (server_url, token) = match access {
            Access::Authenticated => {
                let credentials = self.session.credentials()?;
                (credentials.server_url, Some(credentials.token))
            }
            Access::Public => {
                let server_url = self
                    .session
                    .server_url()
                    .or_else(|| self.fallback_server_url.clone())
                    .ok_or_else(TelemetryError::not_authenticated)?;
                (server_url, None)
            }
        };
        let endpoint = format!("{server_url}{path}");

        retry_async(
            &self.retry_policy,
            |_| {
                let endpoint = endpoint.as_str();
                let token = token.as_ref();
                async move {
                    let mut builder = self
                        .http
                        .get(endpoint)
                        .timeout(self.attempt_timeout)
                        .query(query);
                    if let Some(token) = token {
                        builder = builder.bearer_auth(token.expose_secret());
                    }
                    self.send_attempt(builder).await
                }
            },
            TelemetryError::is_retryable,
        )
        .await
    }

    async fn send_attempt(&self, builder: reqwest::RequestBuilder) -> Result<Vec<u8>> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status == StatusCode::UNAUTHORIZED {
            self.session.invalidate();
            return Err(TelemetryError::expired());
        }
        if !status.is_success() {
            let message = summarize_error_body(&String::from_utf8_lossy(&body));
            tracing::debug!(
                event = "api_request_failed",
                status = status.as_u16(),
                message = %message
            );
            return Err(TelemetryError::Api { status, message });
        }
        Ok(body.to_vec())
    }
}

/// Server `error` (or `message`) field of a JSON error body.
pub(crate) fn server_message(body: &str) -> Option<String> {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    }

    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    parsed.error.or(parsed.message)
}

pub(crate) fn summarize_error_body(body: &str) -> String {
    server_message(body).unwrap_or_else(|| body.chars().take(ERROR_BODY_SNIPPET_LEN).collect())
}

/// Parses RFC 3339, or an ISO-8601 timestamp without offset taken as UTC.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{
        format_timestamp, parse_timestamp, summarize_error_body, HistoryCategory, HistoryRecord,
        TimeRange,
    };

    #[test]
    fn categories_round_trip_through_their_path_names() {
        for category in HistoryCategory::ALL {
            assert_eq!(
                category.as_str().parse::<HistoryCategory>().expect("parse"),
                category
            );
        }
        assert_eq!(
            "IMU".parse::<HistoryCategory>().expect("case-insensitive"),
            HistoryCategory::Imu
        );
        assert!("radar".parse::<HistoryCategory>().is_err());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap();
        assert!(TimeRange::new(early, late).is_ok());
        assert!(TimeRange::new(early, early).is_ok());
        assert!(TimeRange::new(late, early).is_err());
    }

    #[test]
    fn timestamps_use_iso8601_utc() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(format_timestamp(at), "2025-03-04T05:06:07.000Z");
        assert_eq!(parse_timestamp("2025-03-04T05:06:07.000Z"), Some(at));
        assert_eq!(parse_timestamp("2025-03-04T05:06:07"), Some(at));
        assert_eq!(parse_timestamp("2025-03-04T07:06:07+02:00"), Some(at));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn history_rows_map_through_the_flat_encoding() {
        let record = HistoryRecord::from_value(&json!({
            "timestamp": "2025-01-01T12:00:00.250",
            "gimbalAz": 45.0,
            "azimuthSpeed": 2.5,
            "armed": true,
            "ammunitionLevel": 1,
            "dayHFOV": 18.0
        }));

        assert_eq!(
            record.timestamp,
            Some(
                Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
                    + chrono::Duration::milliseconds(250)
            )
        );
        assert_eq!(record.frame.gimbal.gimbal_az, 45.0);
        assert_eq!(record.frame.gimbal.az_speed, 2.5);
        assert!(record.frame.weapon.gun_armed);
        assert!(record.frame.weapon.ammunition_level);
        assert_eq!(record.frame.camera.day_hfov, 18.0);
        assert_eq!(record.frame.imu.roll_deg, 0.0);
    }

    #[test]
    fn error_bodies_prefer_server_message() {
        assert_eq!(summarize_error_body(r#"{"error":"Invalid category"}"#), "Invalid category");
        assert_eq!(summarize_error_body(r#"{"message":"busy"}"#), "busy");
        assert_eq!(summarize_error_body("<html>oops</html>"), "<html>oops</html>");
        assert_eq!(summarize_error_body(&"x".repeat(400)).len(), 220);
    }
}
