//! Replay of failed posts spilled to disk

use ees_cache::keys::LOCK_SUFFIX;
use ees_cache::ExportEvents;
use ees_core::config::EventExporterCfg;
use ees_core::consts::META_NONE;
use ees_core::models::ReplayFailedPostsArgs;
use ees_core::traits::EventExporter;
use ees_core::{EesError, EesResult, ExportContext};
use std::path::Path;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::attempts::export_with_attempts;
use crate::exporters::{types, ExporterDeps, ExporterRegistry};
use crate::service::EventExporterService;

const REPLAY_EXPORTER_ID: &str = "ReplayFailedPosts";

/// Re-export every payload of a failed-post record
///
/// Returns the payloads that failed again, in a record pointing at the same
/// destination; it is empty when everything went through.
pub async fn replay_export_events(
    ctx: &ExportContext,
    record: &ExportEvents,
    registry: &ExporterRegistry,
    deps: &ExporterDeps,
) -> EesResult<ExportEvents> {
    let mut cfg = EventExporterCfg::new(REPLAY_EXPORTER_ID, &record.format);
    cfg.export_path = record.path.clone();
    cfg.opts = record.opts.clone();
    // Replayed payloads are not queued again
    cfg.failed_posts_dir = META_NONE.to_string();
    let exporter = registry.build(cfg, deps)?;

    let keyed = matches!(record.format.as_str(), types::KAFKA_JSON_MAP | types::S3_JSON_MAP);
    let mut failed = ExportEvents::new(
        &record.failed_posts_dir,
        &record.path,
        &record.format,
        &record.module,
        record.opts.clone(),
    );

    for payload in &record.events {
        let key = keyed.then(|| Uuid::new_v4().to_string());
        if let Err(e) = export_with_attempts(ctx, exporter.as_ref(), payload, key.as_deref(), None).await {
            warn!("<EEs> replay to <{}> failed: {}", record.path, e);
            failed.add_event(payload.clone());
        }
    }

    if let Err(e) = exporter.close().await {
        warn!("<EEs> error closing replay exporter for <{}>: {}", record.path, e);
    }
    Ok(failed)
}

fn selected(file_name: &str, modules: &[String]) -> bool {
    !file_name.ends_with(LOCK_SUFFIX)
        && (modules.is_empty() || modules.iter().any(|m| file_name.starts_with(m.as_str())))
}

impl EventExporterService {
    /// Replay every failed-post file of `args.source_path`
    ///
    /// Payloads failing again are written to `args.failed_path` (the source
    /// directory when empty, dropped when `*none`) and the call reports
    /// `PARTIALLY_EXECUTED`. A record that cannot be replayed at all (e.g. no
    /// exporter can be built for it) is kept whole the same way, and the
    /// remaining files are still processed.
    #[instrument(skip(self, ctx, args), fields(source = %args.source_path))]
    pub async fn replay_failed_posts(&self, ctx: &ExportContext, args: &ReplayFailedPostsArgs) -> EesResult<()> {
        let state = self.snapshot();
        let failed_dir = if args.failed_path.is_empty() {
            args.source_path.as_str()
        } else {
            args.failed_path.as_str()
        };

        // Listed up front: leftovers may be written back into the source directory
        let mut file_names = Vec::new();
        let mut entries = tokio::fs::read_dir(&args.source_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if selected(&file_name, &args.modules) {
                file_names.push(file_name);
            }
        }

        let mut leftovers = 0usize;
        let mut replayed = 0usize;
        let mut unreadable = 0usize;

        for file_name in file_names {
            let file_path = Path::new(&args.source_path).join(&file_name);
            let record = match ExportEvents::load(file_path.clone()).await {
                Ok(record) => record,
                Err(e) => {
                    warn!("<EEs> skipping failed posts file <{}>: {}", file_path.display(), e);
                    unreadable += 1;
                    continue;
                }
            };

            let total = record.events.len();
            let failed = match replay_export_events(ctx, &record, self.registry(), &state.deps).await {
                Ok(failed) => failed,
                Err(e) => {
                    warn!("<EEs> cannot replay <{}>: {}", file_path.display(), e);
                    record
                }
            };
            replayed += total - failed.events.len();
            leftovers += failed.events.len();

            if failed.is_empty() || failed_dir == META_NONE {
                continue;
            }
            failed.store(Path::new(failed_dir).join(&file_name)).await?;
        }

        info!(
            "<EEs> replayed {} failed posts from <{}>, {} failed again, {} files unreadable",
            replayed, args.source_path, leftovers, unreadable
        );
        if leftovers > 0 || unreadable > 0 {
            return Err(EesError::partially_executed());
        }
        Ok(())
    }
}
