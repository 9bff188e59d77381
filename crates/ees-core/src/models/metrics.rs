//! Exporter running statistics
//!
//! Every exporter owns one `ExporterMetrics`. All accumulators live behind a
//! single lock; readers always get a deep copy.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::consts::{fields, tor};

use super::event::{parse_duration, parse_time, value_as_f64, value_as_i64, CgrEvent};

/// Plain metrics values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsData {
    pub number_of_events: i64,
    pub positive_exports: BTreeSet<String>,
    pub negative_exports: BTreeSet<String>,
    pub first_event_atime: Option<DateTime<Utc>>,
    pub last_event_atime: Option<DateTime<Utc>>,
    pub first_exp_order_id: Option<i64>,
    pub last_exp_order_id: Option<i64>,
    pub total_cost: f64,
    pub total_duration: Duration,
    pub total_sms_usage: Duration,
    pub total_mms_usage: Duration,
    pub total_generic_usage: Duration,
    pub total_data_usage: Duration,
}

pub mod names {
    pub const NUMBER_OF_EVENTS: &str = "NumberOfEvents";
    pub const POSITIVE_EXPORTS: &str = "PositiveExports";
    pub const NEGATIVE_EXPORTS: &str = "NegativeExports";
    pub const FIRST_EVENT_ATIME: &str = "FirstEventATime";
    pub const LAST_EVENT_ATIME: &str = "LastEventATime";
    pub const FIRST_EXP_ORDER_ID: &str = "FirstExpOrderID";
    pub const LAST_EXP_ORDER_ID: &str = "LastExpOrderID";
    pub const TOTAL_COST: &str = "TotalCost";
    pub const TOTAL_DURATION: &str = "TotalDuration";
    pub const TOTAL_SMS_USAGE: &str = "TotalSMSUsage";
    pub const TOTAL_MMS_USAGE: &str = "TotalMMSUsage";
    pub const TOTAL_GENERIC_USAGE: &str = "TotalGenericUsage";
    pub const TOTAL_DATA_USAGE: &str = "TotalDataUsage";
}

impl MetricsData {
    /// Single metric by its exported name
    ///
    /// Durations are rendered as nanoseconds and times as RFC 3339.
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            names::NUMBER_OF_EVENTS => json!(self.number_of_events),
            names::POSITIVE_EXPORTS => json!(self.positive_exports),
            names::NEGATIVE_EXPORTS => json!(self.negative_exports),
            names::FIRST_EVENT_ATIME => json!(self.first_event_atime.map(|t| t.to_rfc3339())),
            names::LAST_EVENT_ATIME => json!(self.last_event_atime.map(|t| t.to_rfc3339())),
            names::FIRST_EXP_ORDER_ID => json!(self.first_exp_order_id),
            names::LAST_EXP_ORDER_ID => json!(self.last_exp_order_id),
            names::TOTAL_COST => json!(self.total_cost),
            names::TOTAL_DURATION => json!(self.total_duration.as_nanos() as u64),
            names::TOTAL_SMS_USAGE => json!(self.total_sms_usage.as_nanos() as u64),
            names::TOTAL_MMS_USAGE => json!(self.total_mms_usage.as_nanos() as u64),
            names::TOTAL_GENERIC_USAGE => json!(self.total_generic_usage.as_nanos() as u64),
            names::TOTAL_DATA_USAGE => json!(self.total_data_usage.as_nanos() as u64),
            _ => return None,
        };
        Some(value)
    }

    /// All metrics keyed by their exported names, as sent in verbose replies
    pub fn to_map(&self) -> Map<String, Value> {
        [
            names::NUMBER_OF_EVENTS,
            names::POSITIVE_EXPORTS,
            names::NEGATIVE_EXPORTS,
            names::FIRST_EVENT_ATIME,
            names::LAST_EVENT_ATIME,
            names::FIRST_EXP_ORDER_ID,
            names::LAST_EXP_ORDER_ID,
            names::TOTAL_COST,
            names::TOTAL_DURATION,
            names::TOTAL_SMS_USAGE,
            names::TOTAL_MMS_USAGE,
            names::TOTAL_GENERIC_USAGE,
            names::TOTAL_DATA_USAGE,
        ]
        .into_iter()
        .filter_map(|name| self.field(name).map(|v| (name.to_string(), v)))
        .collect()
    }

    fn track_answer_time(&mut self, at: DateTime<Utc>) {
        if self.first_event_atime.map_or(true, |first| at < first) {
            self.first_event_atime = Some(at);
        }
        if self.last_event_atime.map_or(true, |last| at > last) {
            self.last_event_atime = Some(at);
        }
    }

    fn track_order_id(&mut self, order_id: i64) {
        if self.first_exp_order_id.map_or(true, |first| first > order_id) {
            self.first_exp_order_id = Some(order_id);
        }
        if self.last_exp_order_id.map_or(true, |last| last < order_id) {
            self.last_exp_order_id = Some(order_id);
        }
    }

    fn add_usage(&mut self, tor_value: &str, usage: Duration) {
        let total = match tor_value {
            tor::VOICE => &mut self.total_duration,
            tor::SMS => &mut self.total_sms_usage,
            tor::MMS => &mut self.total_mms_usage,
            tor::GENERIC => &mut self.total_generic_usage,
            tor::DATA => &mut self.total_data_usage,
            _ => return,
        };
        *total += usage;
    }
}

/// Lock-guarded metrics of one exporter
#[derive(Debug)]
pub struct ExporterMetrics {
    data: Mutex<MetricsData>,
    /// Timezone used for naive answer times
    tz: Tz,
}

impl ExporterMetrics {
    pub fn new(tz: Tz) -> Self {
        Self {
            data: Mutex::new(MetricsData::default()),
            tz,
        }
    }

    pub fn increment_events(&self) {
        self.data.lock().number_of_events += 1;
    }

    /// Record the outcome of one export
    ///
    /// The export ID goes into exactly one of the positive/negative sets.
    pub fn update(&self, event: &CgrEvent, success: bool) {
        let export_id = event.export_id();
        let answer_time = event
            .event
            .get(fields::ANSWER_TIME)
            .and_then(|v| parse_time(v, &self.tz));
        let order_id = event.event.get(fields::ORDER_ID).and_then(value_as_i64);
        let cost = event.event.get(fields::COST).and_then(value_as_f64);
        let usage = event.event.get(fields::USAGE).and_then(parse_duration);
        let tor_value = event.field_as_string(fields::TOR);

        let mut data = self.data.lock();
        if success {
            data.negative_exports.remove(&export_id);
            data.positive_exports.insert(export_id);
        } else {
            data.positive_exports.remove(&export_id);
            data.negative_exports.insert(export_id);
        }
        if let Some(at) = answer_time {
            data.track_answer_time(at);
        }
        if let Some(order_id) = order_id {
            data.track_order_id(order_id);
        }
        if let Some(cost) = cost {
            data.total_cost += cost;
        }
        if let (Some(tor_value), Some(usage)) = (tor_value, usage) {
            data.add_usage(&tor_value, usage);
        }
    }

    /// Deep copy of the current values
    pub fn snapshot(&self) -> MetricsData {
        self.data.lock().clone()
    }

    pub fn reset(&self) {
        *self.data.lock() = MetricsData::default();
    }
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str) -> CgrEvent {
        CgrEvent::new("cgrates.org", id)
    }

    #[test]
    fn test_update_positive_and_negative() {
        let metrics = ExporterMetrics::default();
        metrics.increment_events();
        metrics.update(&event("ev1"), true);
        metrics.increment_events();
        metrics.update(&event("ev2"), false);

        let snap = metrics.snapshot();
        assert_eq!(snap.number_of_events, 2);
        assert!(snap.positive_exports.contains("ev1"));
        assert!(snap.negative_exports.contains("ev2"));
        assert!(!snap.positive_exports.contains("ev2"));
    }

    #[test]
    fn test_update_accumulators() {
        let metrics = ExporterMetrics::default();
        metrics.update(
            &event("ev1")
                .with_field(fields::COST, 1.5)
                .with_field(fields::TOR, tor::VOICE)
                .with_field(fields::USAGE, "1m")
                .with_field(fields::ORDER_ID, 7)
                .with_field(fields::ANSWER_TIME, "2024-01-02T10:00:00Z"),
            true,
        );
        metrics.update(
            &event("ev2")
                .with_field(fields::COST, "2.5")
                .with_field(fields::TOR, tor::SMS)
                .with_field(fields::USAGE, 1)
                .with_field(fields::ORDER_ID, 3)
                .with_field(fields::ANSWER_TIME, "2024-01-02 11:00:00"),
            true,
        );

        let snap = metrics.snapshot();
        assert_eq!(snap.total_cost, 4.0);
        assert_eq!(snap.total_duration, Duration::from_secs(60));
        assert_eq!(snap.total_sms_usage, Duration::from_nanos(1));
        assert_eq!(snap.first_exp_order_id, Some(3));
        assert_eq!(snap.last_exp_order_id, Some(7));
        assert_eq!(
            snap.first_event_atime,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap())
        );
        assert_eq!(
            snap.last_event_atime,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_snapshot_is_detached() {
        let metrics = ExporterMetrics::default();
        let before = metrics.snapshot();
        metrics.increment_events();
        assert_eq!(before.number_of_events, 0);
        assert_eq!(metrics.snapshot().number_of_events, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsData::default());
    }

    #[test]
    fn test_to_map_names() {
        let metrics = ExporterMetrics::default();
        metrics.increment_events();
        let map = metrics.snapshot().to_map();
        assert_eq!(map.get(names::NUMBER_OF_EVENTS), Some(&json!(1)));
        assert_eq!(map.get(names::TOTAL_COST), Some(&json!(0.0)));
        assert_eq!(map.len(), 13);
    }
}
