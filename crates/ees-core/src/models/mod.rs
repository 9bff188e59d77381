//! Domain models for the event exporter service
//!
//! This module contains the events, payloads and metrics shared by every crate.

pub mod event;
pub mod metrics;
pub mod payload;

pub use event::{
    parse_duration, parse_time, value_as_bool, value_as_f64, value_as_i64, ArchiveEventsArgs,
    CgrEvent, CgrEventWithEeIds, EventWithOpts, ReplayFailedPostsArgs, ResetMetricsArgs,
};
pub use metrics::{ExporterMetrics, MetricsData};
pub use payload::{value_to_string, ExportPayload, ExportReply, OrderedMap, SqlStatement};
