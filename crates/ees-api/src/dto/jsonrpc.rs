//! JSON-RPC 2.0 envelopes

use ees_core::EesError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method names served on the JSON-RPC endpoint
pub mod methods {
    pub const PING: &str = "EeSv1.Ping";
    pub const PROCESS_EVENT: &str = "EeSv1.ProcessEvent";
    pub const RESET_EXPORTER_METRICS: &str = "EeSv1.ResetExporterMetrics";
    pub const REPLAY_FAILED_POSTS: &str = "EeSv1.ReplayFailedPosts";
}

/// Inbound call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    /// Positional parameters; methods read the first one
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub id: Value,
}

/// Outbound reply; exactly one of `result` and `error` is non-null
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: &EesError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error.to_string()),
        }
    }
}
