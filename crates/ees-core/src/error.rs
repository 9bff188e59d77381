//! Unified error handling for the event exporter service
//!
//! This module provides one error type covering configuration, filtering,
//! templating, export and aggregation failures, with automatic HTTP
//! response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::models::ExportReply;

/// Main service error type
///
/// Errors only carry owned strings so they can be cloned: a failed exporter
/// build is shared by every caller waiting on the same cache key.
#[derive(Error, Debug, Clone)]
pub enum EesError {
    // ==================== Configuration Errors ====================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unsupported exporter type: <{0}>")]
    UnsupportedExporterType(String),

    #[error("mandatory option <{option}> missing for exporter <{exporter}>")]
    MissingOption { exporter: String, option: String },

    #[error("invalid timezone: <{0}>")]
    InvalidTimezone(String),

    // ==================== Filter Errors ====================
    #[error("{0}")]
    Filter(String),

    #[error("NOT_FOUND:{0}")]
    FilterNotFound(String),

    // ==================== Templating Errors ====================
    #[error("{0}")]
    Template(String),

    #[error("MANDATORY_IE_MISSING: [{0}]")]
    MandatoryFieldMissing(String),

    // ==================== Export Errors ====================
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("DISCONNECTED")]
    Disconnected,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("context canceled")]
    Cancelled,

    // ==================== Aggregate Errors ====================
    /// At least one exporter failed; the reply still lists every exporter
    /// that was attempted.
    #[error("PARTIALLY_EXECUTED")]
    PartiallyExecuted { reply: Option<ExportReply> },

    #[error("NOT_FOUND")]
    NotFound,

    // ==================== Request Errors ====================
    #[error("{0}")]
    Validation(String),

    // ==================== Wiring Errors ====================
    #[error("NOT_CONNECTED: {0}")]
    NotConnected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EesError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 207 Multi-Status
            EesError::PartiallyExecuted { .. } => StatusCode::MULTI_STATUS,

            // 400 Bad Request
            EesError::Filter(_)
            | EesError::Template(_)
            | EesError::MandatoryFieldMissing(_)
            | EesError::Validation(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            EesError::NotFound | EesError::FilterNotFound(_) => StatusCode::NOT_FOUND,

            // 408 Request Timeout
            EesError::Cancelled => StatusCode::REQUEST_TIMEOUT,

            // 502 Bad Gateway
            EesError::Connection(_) | EesError::Export(_) | EesError::Disconnected => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            EesError::NotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            EesError::Config(_) => "config_error",
            EesError::UnsupportedExporterType(_) => "unsupported_exporter_type",
            EesError::MissingOption { .. } => "missing_option",
            EesError::InvalidTimezone(_) => "invalid_timezone",
            EesError::Filter(_) => "filter_error",
            EesError::FilterNotFound(_) => "filter_not_found",
            EesError::Template(_) => "template_error",
            EesError::MandatoryFieldMissing(_) => "mandatory_field_missing",
            EesError::Connection(_) => "connection_error",
            EesError::Export(_) => "export_error",
            EesError::Disconnected => "disconnected",
            EesError::Serialization(_) => "serialization_error",
            EesError::Io(_) => "io_error",
            EesError::Cancelled => "cancelled",
            EesError::PartiallyExecuted { .. } => "partially_executed",
            EesError::NotFound => "not_found",
            EesError::Validation(_) => "validation_error",
            EesError::NotConnected(_) => "not_connected",
            EesError::Internal(_) => "internal_error",
        }
    }

    /// Shorthand for a partial failure without a reply attached
    pub fn partially_executed() -> Self {
        EesError::PartiallyExecuted { reply: None }
    }
}

impl ResponseError for EesError {
    fn status_code(&self) -> StatusCode {
        EesError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        if let EesError::PartiallyExecuted { reply: Some(reply) } = self {
            body["reply"] = json!(reply);
        }

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for EesError {
    fn from(err: serde_json::Error) -> Self {
        EesError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EesError {
    fn from(err: std::io::Error) -> Self {
        EesError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for EesError {
    fn from(err: config::ConfigError) -> Self {
        EesError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(EesError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EesError::partially_executed().status_code(),
            StatusCode::MULTI_STATUS
        );
        assert_eq!(
            EesError::Export("boom".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            EesError::UnsupportedExporterType("*foo".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            EesError::UnsupportedExporterType("*foo".to_string()).to_string(),
            "unsupported exporter type: <*foo>"
        );
        assert_eq!(
            EesError::Filter("inline parse error for string: <*wrong-type>".to_string())
                .to_string(),
            "inline parse error for string: <*wrong-type>"
        );
        assert_eq!(
            EesError::MandatoryFieldMissing("Account".to_string()).to_string(),
            "MANDATORY_IE_MISSING: [Account]"
        );
        assert_eq!(EesError::partially_executed().to_string(), "PARTIALLY_EXECUTED");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(EesError::Disconnected.error_code(), "disconnected");
        assert_eq!(
            EesError::MissingOption {
                exporter: "rpc".to_string(),
                option: "serviceMethod".to_string()
            }
            .error_code(),
            "missing_option"
        );
    }
}
