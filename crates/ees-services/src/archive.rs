//! Archive export: a batch of events rendered by a file exporter into a zip
//!
//! The exporter definition is taken from the configuration by ID and must be
//! a `*file_csv` or `*file_fwv` one; its records are written to memory
//! instead of disk.

use ees_core::consts::META_NONE;
use ees_core::models::{ArchiveEventsArgs, CgrEvent};
use ees_core::traits::EventExporter;
use ees_core::{EesError, EesResult, ExportContext};
use std::io::{Cursor, Write};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::exporters::{types, FileExporter, FileFormat};
use crate::pipeline::export_event_with_exporter;
use crate::service::EventExporterService;
use crate::templates::EventDataProvider;

impl EventExporterService {
    /// Export `args.events` through the file exporter `args.exporter_id` and zip the result
    ///
    /// Events rejected by the exporter filters are left out. Failed events
    /// make the call fail with `PARTIALLY_EXECUTED`; no event exported at
    /// all is `NOT_FOUND`.
    #[instrument(skip(self, ctx, args), fields(exporter = %args.exporter_id, events = args.events.len()))]
    pub async fn archive_events(&self, ctx: &ExportContext, args: ArchiveEventsArgs) -> EesResult<Vec<u8>> {
        let state = self.snapshot();
        let mut exp_cfg = state
            .cfg
            .exporter(&args.exporter_id)
            .cloned()
            .ok_or_else(|| {
                EesError::Config(format!("exporter config with ID: {} is missing", args.exporter_id))
            })?;
        let format = match exp_cfg.exporter_type.as_str() {
            types::FILE_CSV => FileFormat::Csv,
            types::FILE_FWV => FileFormat::Fwv,
            other => {
                return Err(EesError::Config(format!(
                    "exporter with ID: {} has type <{}>, only file exporters can archive",
                    exp_cfg.id, other
                )))
            }
        };
        // Archived events are never queued for replay
        exp_cfg.failed_posts_dir = META_NONE.to_string();
        let filters = exp_cfg.filters.clone();

        let exporter = FileExporter::buffered(exp_cfg, format, &state.deps)?;
        let mut exported = 0usize;
        let mut failed = 0usize;

        for item in args.events {
            let mut api_opts = args.api_opts.clone();
            api_opts.extend(item.opts);
            let event = CgrEvent {
                tenant: args.tenant.clone(),
                id: Uuid::new_v4().to_string(),
                time: None,
                event: item.event,
                api_opts,
            };

            if !filters.is_empty() {
                let dp = EventDataProvider::new(&event);
                if !state.filters.pass(&event.tenant, &filters, &dp)? {
                    continue;
                }
            }

            match export_event_with_exporter(ctx, &exporter, &event, false, state.projector.as_ref(), None).await {
                Ok(()) => exported += 1,
                Err(e) => {
                    warn!("<EEs> archiving event <{}> failed: {}", event.id, e);
                    failed += 1;
                }
            }
        }

        exporter.close().await?;
        if failed > 0 {
            return Err(EesError::partially_executed());
        }
        if exported == 0 {
            return Err(EesError::NotFound);
        }
        let content = exporter
            .take_output()
            .ok_or_else(|| EesError::Internal("archive buffer missing".to_string()))?;

        let archive = zip_file(exporter.name(), &content)?;
        info!(
            "<EEs> archived {} events into <{}> ({} bytes)",
            exported,
            exporter.name(),
            archive.len()
        );
        Ok(archive)
    }
}

/// Single-entry zip archive
pub fn zip_file(name: &str, content: &[u8]) -> EesResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(name, options)
        .map_err(|e| EesError::Io(format!("cannot create archive entry: {}", e)))?;
    writer.write_all(content)?;
    let cursor = writer
        .finish()
        .map_err(|e| EesError::Io(format!("cannot finish archive: {}", e)))?;
    Ok(cursor.into_inner())
}
