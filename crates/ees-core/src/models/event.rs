//! Inbound events and API arguments
//!
//! JSON field names follow the rating engine wire format (`Tenant`, `ID`,
//! `Event`, `APIOpts`, ...), so events can be forwarded unchanged.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::consts::{fields, OPT_EES_VERBOSE, OPT_EE_IDS};

use super::payload::value_to_string;

/// Generic rating engine event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CgrEvent {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Time", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    /// Flat key -> value event fields
    #[serde(rename = "Event", default)]
    pub event: HashMap<String, Value>,

    /// Side-channel options (verbosity, exporter IDs, attribute profiles)
    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,
}

impl CgrEvent {
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            ..Self::default()
        }
    }

    /// Builder-style event field insert
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.event.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style API option insert
    pub fn with_opt(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.api_opts.insert(key.to_string(), value.into());
        self
    }

    /// Event field rendered as a string, empty values count as missing
    pub fn field_as_string(&self, key: &str) -> Option<String> {
        let s = value_to_string(self.event.get(key)?);
        (!s.is_empty()).then_some(s)
    }

    /// Identifier recorded in the positive/negative export sets
    pub fn export_id(&self) -> String {
        self.field_as_string(fields::CGRID)
            .unwrap_or_else(|| self.id.clone())
    }

    /// Whether the caller asked for metric snapshots in the reply
    pub fn verbose(&self) -> bool {
        self.api_opts
            .get(OPT_EES_VERBOSE)
            .map(value_as_bool)
            .unwrap_or(false)
    }
}

/// Event plus an explicit list of exporters to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CgrEventWithEeIds {
    #[serde(rename = "EeIDs", default)]
    pub ee_ids: Vec<String>,

    #[serde(flatten)]
    pub event: CgrEvent,
}

impl CgrEventWithEeIds {
    /// Requested exporter IDs, empty meaning all
    ///
    /// IDs come from `EeIDs` and from the `*eeIDs` API option (list or
    /// `;`-separated string).
    pub fn requested_ids(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self
            .ee_ids
            .iter()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect();

        match self.event.api_opts.get(OPT_EE_IDS) {
            Some(Value::Array(items)) => {
                ids.extend(items.iter().map(value_to_string).filter(|s| !s.is_empty()));
            }
            Some(Value::String(s)) => {
                ids.extend(s.split(';').filter(|s| !s.is_empty()).map(String::from));
            }
            _ => {}
        }
        ids
    }
}

impl From<CgrEvent> for CgrEventWithEeIds {
    fn from(event: CgrEvent) -> Self {
        Self {
            ee_ids: Vec::new(),
            event,
        }
    }
}

/// One event of an archive request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventWithOpts {
    #[serde(rename = "Event", default)]
    pub event: HashMap<String, Value>,

    #[serde(rename = "Opts", default)]
    pub opts: HashMap<String, Value>,
}

/// Arguments of `archive_events`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveEventsArgs {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ExporterID")]
    pub exporter_id: String,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,

    #[serde(rename = "Events", default)]
    pub events: Vec<EventWithOpts>,
}

/// Arguments of `reset_exporter_metrics`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetMetricsArgs {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,
}

/// Arguments of `replay_failed_posts`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayFailedPostsArgs {
    /// Directory scanned for failed-post files
    #[serde(rename = "SourcePath")]
    pub source_path: String,

    /// Where still-failing payloads are written, `*none` to drop them
    #[serde(rename = "FailedPath", default)]
    pub failed_path: String,

    /// File name prefixes to replay, all files when empty
    #[serde(rename = "Modules", default)]
    pub modules: Vec<String>,
}

/// Loose boolean: `true`, `"true"`, non-zero numbers
pub fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Loose float: numbers and numeric strings
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Loose integer: numbers and numeric strings
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a duration value
///
/// Integers are nanoseconds; strings are either plain integers (nanoseconds)
/// or duration literals such as `1h2m3.5s`, `150ms`, `10us`. Negative
/// durations are rejected.
pub fn parse_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_u64().map(Duration::from_nanos),
        Value::String(s) => parse_duration_str(s),
        _ => None,
    }
}

fn parse_duration_str(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(nanos) = s.parse::<u64>() {
        return Some(Duration::from_nanos(nanos));
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return None;
        }
        let number: f64 = rest[..num_len].parse().ok()?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += number * scale;
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}

/// Parse an event time
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (interpreted in `tz`) and unix
/// seconds, either as a number or a numeric string.
pub fn parse_time(value: &Value, tz: &Tz) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => parse_time_str(s.trim(), tz),
        _ => None,
    }
}

fn parse_time_str(s: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_names() {
        let ev: CgrEventWithEeIds = serde_json::from_value(json!({
            "EeIDs": ["csv1"],
            "Tenant": "cgrates.org",
            "ID": "ev1",
            "Event": {"Account": "1001", "Cost": 1.5},
            "APIOpts": {"*eesVerbose": true, "*eeIDs": ["http1"]}
        }))
        .unwrap();

        assert_eq!(ev.event.tenant, "cgrates.org");
        assert_eq!(ev.event.field_as_string("Account"), Some("1001".to_string()));
        assert!(ev.event.verbose());
        let ids: Vec<_> = ev.requested_ids().into_iter().collect();
        assert_eq!(ids, vec!["csv1", "http1"]);
    }

    #[test]
    fn test_export_id_falls_back_to_event_id() {
        let ev = CgrEvent::new("cgrates.org", "ev1");
        assert_eq!(ev.export_id(), "ev1");

        let ev = ev.with_field(fields::CGRID, "abc");
        assert_eq!(ev.export_id(), "abc");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(&json!(10)), Some(Duration::from_nanos(10)));
        assert_eq!(parse_duration(&json!("10")), Some(Duration::from_nanos(10)));
        assert_eq!(parse_duration(&json!("1m30s")), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration(&json!("1.5s")), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(&json!("150ms")), Some(Duration::from_millis(150)));
        assert_eq!(parse_duration(&json!("1h")), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration(&json!("abc")), None);
        assert_eq!(parse_duration(&json!("-1s")), None);
    }

    #[test]
    fn test_parse_time() {
        let utc = Tz::UTC;
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();

        assert_eq!(parse_time(&json!("2024-01-02T10:00:00Z"), &utc), Some(expected));
        assert_eq!(parse_time(&json!("2024-01-02 10:00:00"), &utc), Some(expected));
        assert_eq!(parse_time(&json!(expected.timestamp()), &utc), Some(expected));

        let bucharest: Tz = "Europe/Bucharest".parse().unwrap();
        assert_eq!(
            parse_time(&json!("2024-01-02 12:00:00"), &bucharest),
            Some(expected)
        );
        assert_eq!(parse_time(&json!("yesterday"), &utc), None);
    }
}
