use async_trait::async_trait;
use ees_core::config::EventExporterCfg;
use ees_core::models::{CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
use ees_core::traits::EventExporter;
use ees_core::{EesResult, ExportContext};
use serde_json::Value;
use tracing::info;

use super::{sorted_event_object, SinkBase};

/// Writes every event as a structured log line
pub struct LogExporter {
    base: SinkBase,
}

impl LogExporter {
    pub fn new(cfg: EventExporterCfg) -> EesResult<Self> {
        Ok(Self {
            base: SinkBase::new(cfg)?,
        })
    }
}

#[async_trait]
impl EventExporter for LogExporter {
    fn cfg(&self) -> &EventExporterCfg {
        &self.base.cfg
    }

    async fn connect(&self) -> EesResult<()> {
        Ok(())
    }

    async fn export_event(
        &self,
        _ctx: &ExportContext,
        payload: &ExportPayload,
        _extra_data: Option<&str>,
    ) -> EesResult<()> {
        let _permit = self.base.gate.get().await;
        let body = match payload {
            ExportPayload::Value(v) => v.to_string(),
            other => serde_json::to_string(other)?,
        };
        info!(exporter = %self.base.cfg.id, "<EEs> <{}> exported event: {}", self.base.cfg.id, body);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_accepts_any_payload() {
        let exporter = LogExporter::new(EventExporterCfg::new("log1", "*log")).unwrap();
        let event = CgrEvent::new("cgrates.org", "ev1").with_field("Account", "1001");
        let payload = exporter.prepare_map(&event).unwrap();
        assert_eq!(payload, ExportPayload::Value(json!({"Account": "1001"})));

        let ctx = ExportContext::background();
        exporter.export_event(&ctx, &payload, None).await.unwrap();
        exporter
            .export_event(&ctx, &ExportPayload::Record(vec!["a".into()]), None)
            .await
            .unwrap();
    }
}
