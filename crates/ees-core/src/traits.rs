//! Common traits for exporters and their collaborators
//!
//! Defines the sink capability implemented by every exporter, plus the
//! seams to the filter engine, the field templating and attribute
//! enrichment.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{EventExporterCfg, FcTemplate};
use crate::context::ExportContext;
use crate::models::{value_to_string, CgrEvent, ExportPayload, ExporterMetrics, MetricsData, OrderedMap};
use crate::EesResult;

/// Read-only view over the data an event is filtered and projected from
///
/// Paths are namespaced, e.g. `*req.Account`, `*opts.*context`.
pub trait DataProvider: Send + Sync {
    /// Value at `path`, `None` when missing
    fn field_as_value(&self, path: &str) -> Option<Value>;

    /// Value at `path` rendered as text
    fn field_as_string(&self, path: &str) -> Option<String> {
        self.field_as_value(path).map(|v| value_to_string(&v))
    }
}

/// Boolean predicate over a tenant and a data provider
pub trait FilterService: Send + Sync {
    /// Whether all `filters` pass
    ///
    /// An empty filter list always passes. A malformed or unknown filter is
    /// an error, not a miss.
    fn pass(&self, tenant: &str, filters: &[String], dp: &dyn DataProvider) -> EesResult<bool>;
}

/// Turns field templates into an ordered key -> value projection
pub trait FieldProjector: Send + Sync {
    fn project(
        &self,
        tenant: &str,
        fields: &[FcTemplate],
        dp: &dyn DataProvider,
    ) -> EesResult<OrderedMap>;
}

/// Arguments sent to the attribute service
#[derive(Debug, Clone)]
pub struct AttrArgs {
    pub event: CgrEvent,
    pub attribute_ids: Vec<String>,
    pub context: String,
}

/// Attribute enrichment of events before export
#[async_trait]
pub trait AttributeService: Send + Sync {
    /// Returns the altered event
    async fn process_event(&self, args: AttrArgs) -> EesResult<CgrEvent>;
}

/// Sink capability implemented by every exporter
///
/// Implementations guard their connection with a read/write lock: shared for
/// `export_event`, exclusive for `connect` and `close`. Both `connect` and
/// `close` are idempotent; a closed exporter is never reused.
#[async_trait]
pub trait EventExporter: Send + Sync {
    /// Configuration the exporter was built from
    fn cfg(&self) -> &EventExporterCfg;

    /// Establish the connection, no-op when already connected
    async fn connect(&self) -> EesResult<()>;

    /// Send one prepared payload, bounded by the exporter's concurrency gate
    async fn export_event(
        &self,
        ctx: &ExportContext,
        payload: &ExportPayload,
        extra_data: Option<&str>,
    ) -> EesResult<()>;

    /// Release the connection and flush pending output
    async fn close(&self) -> EesResult<()>;

    /// Live metrics of this exporter
    fn metrics(&self) -> &ExporterMetrics;

    /// Deep copy of the metrics
    fn get_metrics(&self) -> MetricsData {
        self.metrics().snapshot()
    }

    /// Payload from the flat event
    fn prepare_map(&self, event: &CgrEvent) -> EesResult<ExportPayload>;

    /// Payload from the ordered projection of the content fields
    fn prepare_order_map(&self, fields: &OrderedMap) -> EesResult<ExportPayload>;

    /// Sink-specific routing key, e.g. the Kafka message key
    fn extra_data(&self, _event: &CgrEvent) -> Option<String> {
        None
    }
}

/// Shared exporter handle
pub type ExporterRef = Arc<dyn EventExporter>;
