//! Export services for the event exporter
//!
//! This crate contains the dispatcher and everything it drives: the sinks,
//! their concurrency gate, the retry runner, the default filter and
//! templating engines, archive export and failed-post replay.
//!
//! # Architecture
//!
//! - `EventExporterService` is shared behind an `Arc` and cloned into handlers
//! - Every sink implements `EventExporter`; `ExporterRegistry` builds them by
//!   type tag
//! - Built exporters are cached per type in `ExporterCache`; exhausted
//!   exports go to the `FailedPostCache`
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `EventExporterService` - event dispatch, metrics reset, archive, replay
//! - `TemplateEngine` - field templates to ordered projections
//! - `InlineFilterS` - inline filter rules and named filter profiles

pub mod archive;
pub mod attempts;
pub mod exporters;
pub mod filters;
pub mod gate;
pub mod pipeline;
pub mod replay;
pub mod service;
pub mod templates;

pub use attempts::export_with_attempts;
pub use exporters::{ExporterDeps, ExporterRegistry};
pub use filters::InlineFilterS;
pub use gate::{ConcurrencyGate, GatePermit};
pub use pipeline::export_event_with_exporter;
pub use service::{EventExporterService, EventExporterServiceBuilder};
pub use templates::{EventDataProvider, TemplateEngine};

/// Service constants
pub mod constants {
    /// Period of the exporter cache maintenance, in seconds
    pub const CACHE_JANITOR_INTERVAL_SECS: u64 = 1;

    /// Period of the failed-post cache maintenance, in seconds
    pub const FAILED_POSTS_JANITOR_INTERVAL_SECS: u64 = 1;
}
