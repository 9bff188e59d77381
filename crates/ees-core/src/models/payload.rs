//! Prepared export payloads
//!
//! Sinks turn an event (or its ordered projection) into one of these before
//! the export attempts start. Payloads are serializable because exhausted
//! exports are persisted as failed posts and replayed later.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Ordered key -> value projection produced by field templates
///
/// `serde_json` is built with `preserve_order`, so insertion order is kept.
pub type OrderedMap = Map<String, Value>;

/// Reply of `process_event`: exporter ID -> metrics snapshot (empty unless verbose)
pub type ExportReply = BTreeMap<String, Map<String, Value>>;

/// Sink-specific payload, ready to be sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ExportPayload {
    /// One CSV/FWV record, one entry per field
    Record(Vec<String>),

    /// Raw body, typically JSON
    Bytes(Vec<u8>),

    /// url-encoded form pairs, in order
    Form(Vec<(String, String)>),

    /// Parametrised SQL insert
    Sql(SqlStatement),

    /// Structured value for RPC and log sinks
    Value(Value),
}

impl ExportPayload {
    /// Short name of the payload kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ExportPayload::Record(_) => "record",
            ExportPayload::Bytes(_) => "bytes",
            ExportPayload::Form(_) => "form",
            ExportPayload::Sql(_) => "sql",
            ExportPayload::Value(_) => "value",
        }
    }
}

/// Insert statement for the SQL sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

/// Render a JSON value the way it appears inside a text record
///
/// Strings are emitted without quotes, null as the empty string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
