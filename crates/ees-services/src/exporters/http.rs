//! HTTP exporters
//!
//! `*http_post` sends url-encoded forms, `*http_json_map` sends JSON bodies.
//! Request headers come from the `*hdr` templates, composed once at
//! construction.

use async_trait::async_trait;
use ees_core::config::{opts, EventExporterCfg};
use ees_core::models::{value_to_string, CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
use ees_core::traits::EventExporter;
use ees_core::{EesError, EesResult, ExportContext};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{ordered_json, sorted_event, sorted_event_object, types, ExporterDeps, SinkBase};
use crate::templates::EventDataProvider;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Form,
    Json,
}

pub struct HttpExporter {
    base: SinkBase,
    kind: BodyKind,
    timeout: Duration,
    headers: Vec<(String, String)>,
    client: RwLock<Option<Client>>,
}

impl HttpExporter {
    pub fn new(cfg: EventExporterCfg, deps: &ExporterDeps) -> EesResult<Self> {
        let kind = match cfg.exporter_type.as_str() {
            types::HTTP_POST => BodyKind::Form,
            _ => BodyKind::Json,
        };
        let timeout = Duration::from_secs(
            cfg.opts
                .get_u64(opts::HTTP_TIMEOUT_SECS)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );
        let base = SinkBase::new(cfg)?;

        let header_fields = base.cfg.header_fields();
        let headers = if header_fields.is_empty() {
            Vec::new()
        } else {
            let dp = EventDataProvider::metrics_only(base.metrics.snapshot());
            deps.projector
                .project("", &header_fields, &dp)?
                .iter()
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect()
        };

        Ok(Self {
            base,
            kind,
            timeout,
            headers,
            client: RwLock::new(None),
        })
    }
}

#[async_trait]
impl EventExporter for HttpExporter {
    fn cfg(&self) -> &EventExporterCfg {
        &self.base.cfg
    }

    async fn connect(&self) -> EesResult<()> {
        let mut client = self.client.write().await;
        if client.is_none() {
            *client = Some(
                ClientBuilder::new()
                    .timeout(self.timeout)
                    .pool_max_idle_per_host(20)
                    .pool_idle_timeout(Duration::from_secs(90))
                    .build()
                    .map_err(|e| EesError::Connection(e.to_string()))?,
            );
        }
        Ok(())
    }

    #[instrument(skip(self, ctx, payload), fields(exporter = %self.base.cfg.id))]
    async fn export_event(
        &self,
        ctx: &ExportContext,
        payload: &ExportPayload,
        _extra_data: Option<&str>,
    ) -> EesResult<()> {
        let _permit = self.base.gate.get().await;
        let client = self.client.read().await;
        let client = client.as_ref().ok_or(EesError::Disconnected)?;

        let mut request = client.post(&self.base.cfg.export_path);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match (self.kind, payload) {
            (BodyKind::Json, ExportPayload::Bytes(body)) => request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone()),
            (BodyKind::Form, ExportPayload::Form(pairs)) => request.form(pairs),
            _ => {
                return Err(EesError::Export(format!(
                    "unsupported payload <{}> for exporter <{}>",
                    payload.kind(),
                    self.base.cfg.id
                )))
            }
        };

        let response = tokio::select! {
            response = request.send() => response.map_err(|e| EesError::Connection(e.to_string()))?,
            _ = ctx.cancelled() => return Err(EesError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(EesError::Export(format!("HTTP status {}", status.as_u16())));
        }
        debug!("<EEs> posted event to <{}>", self.base.cfg.export_path);
        Ok(())
    }

    async fn close(&self) -> EesResult<()> {
        self.client.write().await.take();
        Ok(())
    }

    fn metrics(&self) -> &ExporterMetrics {
        &self.base.metrics
    }

    fn prepare_map(&self, event: &CgrEvent) -> EesResult<ExportPayload> {
        match self.kind {
            BodyKind::Json => Ok(ExportPayload::Bytes(serde_json::to_vec(&sorted_event_object(event))?)),
            BodyKind::Form => Ok(ExportPayload::Form(
                sorted_event(event)
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), value_to_string(v)))
                    .collect(),
            )),
        }
    }

    fn prepare_order_map(&self, fields: &OrderedMap) -> EesResult<ExportPayload> {
        match self.kind {
            BodyKind::Json => Ok(ExportPayload::Bytes(ordered_json(fields)?)),
            BodyKind::Form => Ok(ExportPayload::Form(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_string(v)))
                    .collect(),
            )),
        }
    }
}
