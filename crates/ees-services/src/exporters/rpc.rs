//! JSON-RPC exporter
//!
//! Calls `serviceMethod` on the JSON-RPC 2.0 endpoint at `export_path`,
//! passing the event (plus `rpcAPIOpts`) as the single parameter.

use async_trait::async_trait;
use ees_core::config::{opts, EventExporterCfg};
use ees_core::models::{CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
use ees_core::traits::EventExporter;
use ees_core::{EesError, EesResult, ExportContext};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};

use super::{sorted_event_object, SinkBase};

const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 2;

/// Request JSON-RPC 2.0
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<T> {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<T>,
    pub id: u64,
}

/// Response JSON-RPC 2.0
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub id: Option<u64>,
}

pub struct RpcExporter {
    base: SinkBase,
    method: String,
    api_opts: Option<Value>,
    timeout: Duration,
    request_id: AtomicU64,
    client: RwLock<Option<Client>>,
}

impl RpcExporter {
    pub fn new(cfg: EventExporterCfg) -> EesResult<Self> {
        let base = SinkBase::new(cfg)?;
        let method = base.required_opt(opts::RPC_SERVICE_METHOD)?;
        let api_opts = base.cfg.opts.get(opts::RPC_API_OPTS).cloned();
        let timeout = Duration::from_secs(
            base.cfg
                .opts
                .get_u64(opts::RPC_REPLY_TIMEOUT_SECS)
                .unwrap_or(DEFAULT_REPLY_TIMEOUT_SECS),
        );
        Ok(Self {
            base,
            method,
            api_opts,
            timeout,
            request_id: AtomicU64::new(1),
            client: RwLock::new(None),
        })
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Event parameter, carrying the configured API options
    fn params(&self, tenant: &str, id: &str, event: Value) -> Value {
        let mut params = json!({
            "Tenant": tenant,
            "ID": id,
            "Event": event,
        });
        if let Some(api_opts) = &self.api_opts {
            params["APIOpts"] = api_opts.clone();
        }
        params
    }
}

#[async_trait]
impl EventExporter for RpcExporter {
    fn cfg(&self) -> &EventExporterCfg {
        &self.base.cfg
    }

    async fn connect(&self) -> EesResult<()> {
        let mut client = self.client.write().await;
        if client.is_none() {
            *client = Some(
                ClientBuilder::new()
                    .timeout(self.timeout)
                    .tcp_keepalive(Duration::from_secs(60))
                    .build()
                    .map_err(|e| EesError::Connection(e.to_string()))?,
            );
        }
        Ok(())
    }

    #[instrument(skip(self, ctx, payload), fields(exporter = %self.base.cfg.id, method = %self.method))]
    async fn export_event(
        &self,
        ctx: &ExportContext,
        payload: &ExportPayload,
        _extra_data: Option<&str>,
    ) -> EesResult<()> {
        let ExportPayload::Value(params) = payload else {
            return Err(EesError::Export(format!(
                "unsupported payload <{}> for exporter <{}>",
                payload.kind(),
                self.base.cfg.id
            )));
        };

        let _permit = self.base.gate.get().await;
        let client = self.client.read().await;
        let client = client.as_ref().ok_or(EesError::Disconnected)?;

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: self.method.clone(),
            params: vec![params],
            id: self.next_id(),
        };
        debug!("<EEs> rpc request: method={}, id={}", request.method, request.id);

        let send = client.post(&self.base.cfg.export_path).json(&request).send();
        let response = tokio::select! {
            response = send => response.map_err(|e| EesError::Connection(e.to_string()))?,
            _ = ctx.cancelled() => return Err(EesError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            error!("<EEs> rpc HTTP error: status={}", status);
            return Err(EesError::Export(format!("HTTP status {}", status.as_u16())));
        }

        let reply: JsonRpcResponse<Value> = response
            .json()
            .await
            .map_err(|e| EesError::Serialization(e.to_string()))?;
        match reply.error {
            Some(err) if !err.is_null() => Err(EesError::Export(match err {
                Value::String(s) => s,
                other => other.to_string(),
            })),
            _ => Ok(()),
        }
    }

    async fn close(&self) -> EesResult<()> {
        self.client.write().await.take();
        Ok(())
    }

    fn metrics(&self) -> &ExporterMetrics {
        &self.base.metrics
    }

    fn prepare_map(&self, event: &CgrEvent) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Value(self.params(
            &event.tenant,
            &event.id,
            Value::Object(sorted_event_object(event)),
        )))
    }

    fn prepare_order_map(&self, fields: &OrderedMap) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Value(self.params(
            "",
            "",
            Value::Object(fields.clone()),
        )))
    }
}
