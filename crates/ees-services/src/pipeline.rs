//! Export of one event through one exporter

use ees_cache::FailedPostCache;
use ees_core::models::{CgrEvent, ExportPayload};
use ees_core::traits::{EventExporter, FieldProjector};
use ees_core::EesResult;
use ees_core::ExportContext;
use tracing::warn;

use crate::attempts::export_with_attempts;
use crate::templates::EventDataProvider;

/// Prepare the payload, run the attempts and account the outcome
///
/// Metrics are updated exactly once whatever the outcome, and one-shot
/// exporters are closed before returning.
pub async fn export_event_with_exporter(
    ctx: &ExportContext,
    exporter: &dyn EventExporter,
    event: &CgrEvent,
    one_time: bool,
    projector: &dyn FieldProjector,
    failed_posts: Option<&FailedPostCache>,
) -> EesResult<()> {
    exporter.metrics().increment_events();

    let result = match prepare(exporter, event, projector) {
        Ok(payload) => {
            let extra_data = exporter.extra_data(event);
            export_with_attempts(ctx, exporter, &payload, extra_data.as_deref(), failed_posts).await
        }
        Err(e) => Err(e),
    };

    exporter.metrics().update(event, result.is_ok());
    if one_time {
        if let Err(e) = exporter.close().await {
            warn!("<EEs> error closing exporter <{}>: {}", exporter.cfg().id, e);
        }
    }
    result
}

fn prepare(
    exporter: &dyn EventExporter,
    event: &CgrEvent,
    projector: &dyn FieldProjector,
) -> EesResult<ExportPayload> {
    let fields = exporter.cfg().content_fields();
    if fields.is_empty() {
        return exporter.prepare_map(event);
    }
    let dp = EventDataProvider::new(event).with_metrics(exporter.get_metrics());
    let projection = projector.project(&event.tenant, &fields, &dp)?;
    exporter.prepare_order_map(&projection)
}
