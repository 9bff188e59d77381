use async_trait::async_trait;
use ees_core::config::EventExporterCfg;
use ees_core::models::{CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
use ees_core::traits::EventExporter;
use ees_core::{EesResult, ExportContext};
use serde_json::Value;

use super::{sorted_event_object, SinkBase};

/// Sink that only keeps metrics
pub struct VirtualExporter {
    base: SinkBase,
}

impl VirtualExporter {
    pub fn new(cfg: EventExporterCfg) -> EesResult<Self> {
        Ok(Self {
            base: SinkBase::new(cfg)?,
        })
    }
}

#[async_trait]
impl EventExporter for VirtualExporter {
    fn cfg(&self) -> &EventExporterCfg {
        &self.base.cfg
    }

    async fn connect(&self) -> EesResult<()> {
        Ok(())
    }

    async fn export_event(
        &self,
        _ctx: &ExportContext,
        _payload: &ExportPayload,
        _extra_data: Option<&str>,
    ) -> EesResult<()> {
        let _permit = self.base.gate.get().await;
        Ok(())
    }

    async fn close(&self) -> EesResult<()> {
        Ok(())
    }

    fn metrics(&self) -> &ExporterMetrics {
        &self.base.metrics
    }

    fn prepare_map(&self, event: &CgrEvent) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Value(Value::Object(sorted_event_object(event))))
    }

    fn prepare_order_map(&self, fields: &OrderedMap) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Value(Value::Object(fields.clone())))
    }
}
