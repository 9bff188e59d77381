//! Event Exporter Service server
//!
//! Receives rated events over HTTP or JSON-RPC and fans them out to the
//! configured exporters (files, HTTP, SQL, brokers, RPC).

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use ees_api::configure_routes;
use ees_core::AppConfig;
use ees_services::EventExporterService;
use std::env;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cgr_ees={},ees_api={},ees_services={},ees_cache={},actix_web=info,sqlx=warn",
            log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting CGR EEs v{}", env!("CARGO_PKG_VERSION"));

    let config = match env::var("CGR_EES_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        Err(_) => AppConfig::load().context("failed to load configuration")?,
    };
    let bind_addr = config.server_addr();
    let workers = config.server.workers;

    info!(
        "Configured {} exporters, failed posts TTL {}s",
        config.ees.exporters.len(),
        config.ees.failed_posts_ttl_secs
    );

    let service = EventExporterService::builder(config.ees).build();
    let shutdown = CancellationToken::new();
    service.start_metrics_reset();
    service.spawn_janitors(shutdown.clone());

    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let app_service = web::Data::from(service.clone());
    HttpServer::new(move || {
        App::new()
            .app_data(app_service.clone())
            .app_data(web::JsonConfig::default().limit(10 * 1024 * 1024)) // 10MB max payload
            // Middleware
            .wrap(TracingLogger::default())
            .wrap(middleware::Compress::default())
            .wrap(middleware::NormalizePath::trim())
            // Configure routes
            .configure(configure_routes)
            // Root redirect to health
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run()
    .await?;

    info!("HTTP server stopped, flushing exporters");
    shutdown.cancel();
    service.shutdown().await;
    Ok(())
}
