//! Liveness endpoint

use actix_web::HttpResponse;

/// Health check endpoint
///
/// GET /v1/health
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "cgr-ees",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
