//! API layer for the event exporter service
//!
//! REST handlers under `/v1` plus a JSON-RPC 2.0 endpoint speaking the
//! `EeSv1.*` method names of the rating engine.

#![forbid(unsafe_code)]

pub mod dto;
pub mod handlers;

use actix_web::web;

// Re-export DTOs (common types)
pub use dto::{ApiResponse, RpcRequest, RpcResponse};

// Re-export handler configuration functions
pub use handlers::{configure_ees, configure_jsonrpc, health_check};

/// Mount every route of the service
///
/// Expects the `EventExporterService` as `web::Data`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            // Health check
            .route("/health", web::get().to(health_check))
            // Exporter operations
            .configure(configure_ees),
    )
    .configure(configure_jsonrpc);
}
