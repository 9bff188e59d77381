//! Bounded export retry
//!
//! Attempts are immediate, without backoff. Payloads that exhaust their
//! attempts are handed to the failed-post cache for later replay.

use ees_cache::FailedPostCache;
use ees_core::consts::EES_MODULE;
use ees_core::models::ExportPayload;
use ees_core::traits::EventExporter;
use ees_core::{EesError, EesResult, ExportContext};
use tracing::{debug, warn};

/// Connect-then-export up to `cfg.attempts()` times, stopping at the first success
///
/// On exhaustion the payload is queued in `failed_posts` (when the exporter
/// has failed posts enabled) and the last error is returned. A cancelled
/// context stops further attempts.
pub async fn export_with_attempts(
    ctx: &ExportContext,
    exporter: &dyn EventExporter,
    payload: &ExportPayload,
    extra_data: Option<&str>,
    failed_posts: Option<&FailedPostCache>,
) -> EesResult<()> {
    let cfg = exporter.cfg();
    let attempts = cfg.attempts();
    let mut last_err = EesError::Internal("no export attempt was made".to_string());

    for attempt in 1..=attempts {
        if ctx.is_cancelled() {
            last_err = EesError::Cancelled;
            break;
        }

        let result = match exporter.connect().await {
            Ok(()) => exporter.export_event(ctx, payload, extra_data).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(
                    "<EEs> exporter <{}> attempt {}/{} failed: {}",
                    cfg.id, attempt, attempts, e
                );
                let cancelled = matches!(e, EesError::Cancelled);
                last_err = e;
                if cancelled {
                    break;
                }
            }
        }
    }

    warn!(
        "<EEs> exporter <{}> failed to export after {} attempts: {}",
        cfg.id, attempts, last_err
    );
    if let Some(cache) = failed_posts {
        if cfg.failed_posts_enabled() {
            cache
                .add_failed_post(
                    &cfg.failed_posts_dir,
                    &cfg.export_path,
                    &cfg.exporter_type,
                    EES_MODULE,
                    payload.clone(),
                    &cfg.opts,
                )
                .await;
        }
    }
    Err(last_err)
}
