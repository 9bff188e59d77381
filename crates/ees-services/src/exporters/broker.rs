//! Message broker exporters
//!
//! AMQP, AMQPv1, NATS, SQS, Kafka and S3 sinks share one exporter; only the
//! transport differs. Transports are looked up by type tag in
//! `ExporterDeps::broker_connectors`.

use async_trait::async_trait;
use ees_core::config::EventExporterCfg;
use ees_core::consts::{fields, META_DEFAULT};
use ees_core::models::{CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
use ees_core::traits::EventExporter;
use ees_core::{EesError, EesResult, ExportContext};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{ordered_json, sorted_event_object, types, ExporterDeps, SinkBase};

/// Opens connections for one broker family
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, cfg: &EventExporterCfg) -> EesResult<Box<dyn BrokerConnection>>;
}

/// Live broker connection
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Publish one message, `key` being the exporter's extra data
    async fn publish(&self, body: &[u8], key: Option<&str>) -> EesResult<()>;

    async fn close(&self) -> EesResult<()>;
}

pub struct BrokerExporter {
    base: SinkBase,
    connector: Arc<dyn BrokerConnector>,
    conn: RwLock<Option<Box<dyn BrokerConnection>>>,
}

impl BrokerExporter {
    pub fn new(cfg: EventExporterCfg, deps: &ExporterDeps) -> EesResult<Self> {
        let connector = deps
            .broker_connectors
            .get(&cfg.exporter_type)
            .cloned()
            .ok_or_else(|| {
                EesError::Config(format!(
                    "no transport registered for exporter type <{}>",
                    cfg.exporter_type
                ))
            })?;
        Ok(Self {
            base: SinkBase::new(cfg)?,
            connector,
            conn: RwLock::new(None),
        })
    }

    fn keyed(&self) -> bool {
        matches!(
            self.base.cfg.exporter_type.as_str(),
            types::KAFKA_JSON_MAP | types::S3_JSON_MAP
        )
    }
}

#[async_trait]
impl EventExporter for BrokerExporter {
    fn cfg(&self) -> &EventExporterCfg {
        &self.base.cfg
    }

    async fn connect(&self) -> EesResult<()> {
        let mut conn = self.conn.write().await;
        if conn.is_none() {
            *conn = Some(self.connector.connect(&self.base.cfg).await?);
            info!(
                "<EEs> exporter <{}> connected to <{}>",
                self.base.cfg.id, self.base.cfg.export_path
            );
        }
        Ok(())
    }

    #[instrument(skip(self, ctx, payload), fields(exporter = %self.base.cfg.id))]
    async fn export_event(
        &self,
        ctx: &ExportContext,
        payload: &ExportPayload,
        extra_data: Option<&str>,
    ) -> EesResult<()> {
        let ExportPayload::Bytes(body) = payload else {
            return Err(EesError::Export(format!(
                "unsupported payload <{}> for exporter <{}>",
                payload.kind(),
                self.base.cfg.id
            )));
        };

        let _permit = self.base.gate.get().await;
        let conn = self.conn.read().await;
        let conn = conn.as_ref().ok_or(EesError::Disconnected)?;
        tokio::select! {
            res = conn.publish(body, extra_data) => res?,
            _ = ctx.cancelled() => return Err(EesError::Cancelled),
        }
        debug!("<EEs> published {} bytes", body.len());
        Ok(())
    }

    async fn close(&self) -> EesResult<()> {
        if let Some(conn) = self.conn.write().await.take() {
            conn.close().await?;
        }
        Ok(())
    }

    fn metrics(&self) -> &ExporterMetrics {
        &self.base.metrics
    }

    fn prepare_map(&self, event: &CgrEvent) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Bytes(serde_json::to_vec(&sorted_event_object(event))?))
    }

    fn prepare_order_map(&self, fields: &OrderedMap) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Bytes(ordered_json(fields)?))
    }

    fn extra_data(&self, event: &CgrEvent) -> Option<String> {
        if !self.keyed() {
            return None;
        }
        let origin_id = event
            .field_as_string(fields::ORIGIN_ID)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let run_id = event
            .field_as_string(fields::RUN_ID)
            .unwrap_or_else(|| META_DEFAULT.to_string());
        Some(format!("{}:{}", origin_id, run_id))
    }
}
