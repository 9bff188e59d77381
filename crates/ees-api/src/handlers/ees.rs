//! Exporter handlers
//!
//! HTTP handlers for event export, archive, metric reset and failed-post
//! replay.

use crate::dto::common::OK;
use crate::dto::requests::validated;
use crate::dto::{ApiResponse, ArchiveEventsRequest, ReplayFailedPostsRequest, ResetMetricsRequest};
use actix_web::{http::header, web, HttpResponse};
use ees_core::models::{ArchiveEventsArgs, CgrEventWithEeIds, ReplayFailedPostsArgs, ResetMetricsArgs};
use ees_core::EesError;
use ees_services::EventExporterService;
use tracing::{debug, info, instrument};

use super::RequestContext;

/// Export one event through every matching exporter
///
/// POST /v1/ees/process_event
#[instrument(skip(service, req))]
pub async fn process_event(
    service: web::Data<EventExporterService>,
    req: web::Json<CgrEventWithEeIds>,
) -> Result<HttpResponse, EesError> {
    let args = req.into_inner();
    debug!(tenant = %args.event.tenant, event_id = %args.event.id, "Processing event");

    let request = RequestContext::new();
    let reply = service.process_event(request.ctx(), args).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(reply)))
}

/// Render events through a file exporter and answer with the zip
///
/// POST /v1/ees/archive_events
#[instrument(skip(service, req))]
pub async fn archive_events(
    service: web::Data<EventExporterService>,
    req: web::Json<ArchiveEventsRequest>,
) -> Result<HttpResponse, EesError> {
    let args: ArchiveEventsArgs = validated(req.into_inner())?;
    let file_name = format!("{}.zip", args.exporter_id);
    debug!(exporter = %args.exporter_id, events = args.events.len(), "Archiving events");

    let request = RequestContext::new();
    let archive = service.archive_events(request.ctx(), args).await?;

    Ok(HttpResponse::Ok()
        .content_type("application/zip")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        ))
        .body(archive))
}

/// Reset the metrics of a cached exporter
///
/// POST /v1/ees/reset_exporter_metrics
#[instrument(skip(service, req))]
pub async fn reset_exporter_metrics(
    service: web::Data<EventExporterService>,
    req: web::Json<ResetMetricsRequest>,
) -> Result<HttpResponse, EesError> {
    let args: ResetMetricsArgs = validated(req.into_inner())?;
    service.reset_exporter_metrics(&args).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(OK)))
}

/// Replay failed-post files of a directory
///
/// POST /v1/ees/replay_failed_posts
#[instrument(skip(service, req))]
pub async fn replay_failed_posts(
    service: web::Data<EventExporterService>,
    req: web::Json<ReplayFailedPostsRequest>,
) -> Result<HttpResponse, EesError> {
    let args: ReplayFailedPostsArgs = validated(req.into_inner())?;
    info!(source = %args.source_path, failed = %args.failed_path, "Replaying failed posts");

    let request = RequestContext::new();
    service.replay_failed_posts(request.ctx(), &args).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(OK)))
}

/// Configure exporter routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/ees")
            .route("/process_event", web::post().to(process_event))
            .route("/archive_events", web::post().to(archive_events))
            .route("/reset_exporter_metrics", web::post().to(reset_exporter_metrics))
            .route("/replay_failed_posts", web::post().to(replay_failed_posts)),
    );
}
