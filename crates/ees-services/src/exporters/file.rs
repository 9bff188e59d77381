//! CSV and fixed-width file exporters
//!
//! One file per exporter lifetime, `<export_path>/<id>_<uuid>.csv` (or
//! `.fwv`). The header is composed from `*hdr` templates when the file is
//! opened and the trailer from `*trl` templates when it is closed; both may
//! reference exporter metrics through `*dc`.

use async_trait::async_trait;
use ees_core::config::{opts, EventExporterCfg, FcTemplate};
use ees_core::models::{value_to_string, CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
use ees_core::traits::{EventExporter, FieldProjector};
use ees_core::{EesError, EesResult, ExportContext};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::{sorted_event, ExporterDeps, SinkBase};
use crate::templates::EventDataProvider;

/// Record layout of a file exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Fwv,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Fwv => "fwv",
        }
    }
}

/// Where records go: a file on disk or an in-memory buffer
enum Target {
    File(BufWriter<File>),
    Buffer(Vec<u8>),
}

impl Target {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            Target::File(w) => {
                w.write_all(line.as_bytes()).await?;
                w.flush().await
            }
            Target::Buffer(b) => {
                b.extend_from_slice(line.as_bytes());
                Ok(())
            }
        }
    }
}

pub struct FileExporter {
    base: SinkBase,
    format: FileFormat,
    separator: char,
    projector: Arc<dyn FieldProjector>,
    file_name: String,
    file_path: Option<PathBuf>,
    /// Header line until the target is attached
    header: Option<String>,
    target: RwLock<Option<AsyncMutex<Target>>>,
    /// Buffer contents once a buffered exporter is closed
    output: Mutex<Option<Vec<u8>>>,
}

impl FileExporter {
    /// Open the export file and write the header
    ///
    /// Records and the trailer are written asynchronously afterwards.
    pub fn new(cfg: EventExporterCfg, format: FileFormat, deps: &ExporterDeps) -> EesResult<Self> {
        let file_name = Self::file_name(&cfg, format);
        let file_path = Path::new(&cfg.export_path).join(&file_name);
        let mut file = std::fs::File::create(&file_path).map_err(|e| {
            EesError::Io(format!("cannot create export file <{}>: {}", file_path.display(), e))
        })?;
        info!("<EEs> exporter <{}> writing to <{}>", cfg.id, file_path.display());

        let mut exporter = Self::open(cfg, format, deps, file_name, Some(file_path))?;
        if let Some(line) = exporter.header.take() {
            file.write_all(line.as_bytes())?;
        }
        exporter.target = RwLock::new(Some(AsyncMutex::new(Target::File(BufWriter::new(File::from_std(file))))));
        Ok(exporter)
    }

    /// In-memory exporter, used to build archives
    pub fn buffered(cfg: EventExporterCfg, format: FileFormat, deps: &ExporterDeps) -> EesResult<Self> {
        let file_name = Self::file_name(&cfg, format);
        let mut exporter = Self::open(cfg, format, deps, file_name, None)?;
        let buffer = exporter.header.take().map(String::into_bytes).unwrap_or_default();
        exporter.target = RwLock::new(Some(AsyncMutex::new(Target::Buffer(buffer))));
        Ok(exporter)
    }

    fn file_name(cfg: &EventExporterCfg, format: FileFormat) -> String {
        format!("{}_{}.{}", cfg.id, Uuid::new_v4(), format.extension())
    }

    fn open(
        cfg: EventExporterCfg,
        format: FileFormat,
        deps: &ExporterDeps,
        file_name: String,
        file_path: Option<PathBuf>,
    ) -> EesResult<Self> {
        let separator = cfg
            .opts
            .get_str(opts::CSV_FIELD_SEPARATOR)
            .and_then(|s| s.chars().next())
            .unwrap_or(',');
        let base = SinkBase::new(cfg)?;
        let projector = Arc::clone(&deps.projector);

        let header_fields = base.cfg.header_fields();
        let header = compose_record(projector.as_ref(), &base.metrics, &header_fields, format, separator)?;

        Ok(Self {
            base,
            format,
            separator,
            projector,
            file_name,
            file_path,
            header,
            target: RwLock::new(None),
            output: Mutex::new(None),
        })
    }

    /// File name, also used as the archive entry name
    pub fn name(&self) -> &str {
        &self.file_name
    }

    /// Path on disk, `None` for buffered exporters
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Contents of a closed buffered exporter
    pub fn take_output(&self) -> Option<Vec<u8>> {
        self.output.lock().take()
    }
}

/// Header or trailer line from `*dc` templates, `None` without templates
fn compose_record(
    projector: &dyn FieldProjector,
    metrics: &ExporterMetrics,
    fields: &[FcTemplate],
    format: FileFormat,
    separator: char,
) -> EesResult<Option<String>> {
    if fields.is_empty() {
        return Ok(None);
    }
    let dp = EventDataProvider::metrics_only(metrics.snapshot());
    let projection = projector.project("", fields, &dp)?;
    let values: Vec<String> = projection.values().map(value_to_string).collect();
    Ok(Some(encode(format, separator, &values)))
}

fn encode(format: FileFormat, separator: char, values: &[String]) -> String {
    match format {
        FileFormat::Csv => csv_line(values, separator),
        FileFormat::Fwv => {
            let mut line = values.concat();
            line.push('\n');
            line
        }
    }
}

/// One CSV line, quoting fields the way Go's `encoding/csv` does
pub fn csv_line(values: &[String], separator: char) -> String {
    let mut line = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            line.push(separator);
        }
        if needs_quotes(value, separator) {
            line.push('"');
            line.push_str(&value.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(value);
        }
    }
    line.push('\n');
    line
}

fn needs_quotes(value: &str, separator: char) -> bool {
    if value.is_empty() {
        return false;
    }
    if value == r"\." {
        return true;
    }
    if value.contains(|c: char| c == separator || c == '"' || c == '\r' || c == '\n') {
        return true;
    }
    value.starts_with(' ') || value.starts_with('\t')
}

#[async_trait]
impl EventExporter for FileExporter {
    fn cfg(&self) -> &EventExporterCfg {
        &self.base.cfg
    }

    async fn connect(&self) -> EesResult<()> {
        // The file is opened at construction
        match self.target.read().await.as_ref() {
            Some(_) => Ok(()),
            None => Err(EesError::Disconnected),
        }
    }

    async fn export_event(
        &self,
        _ctx: &ExportContext,
        payload: &ExportPayload,
        _extra_data: Option<&str>,
    ) -> EesResult<()> {
        let ExportPayload::Record(values) = payload else {
            return Err(EesError::Export(format!(
                "unsupported payload <{}> for exporter <{}>",
                payload.kind(),
                self.base.cfg.id
            )));
        };

        let _permit = self.base.gate.get().await;
        let target = self.target.read().await;
        let writer = target.as_ref().ok_or(EesError::Disconnected)?;
        let line = encode(self.format, self.separator, values);
        writer.lock().await.write_line(&line).await?;
        Ok(())
    }

    async fn close(&self) -> EesResult<()> {
        let mut target = self.target.write().await;
        let Some(writer) = target.take() else {
            return Ok(());
        };
        let mut writer = writer.into_inner();

        let trailer_fields = self.base.cfg.trailer_fields();
        let trailer = compose_record(
            self.projector.as_ref(),
            &self.base.metrics,
            &trailer_fields,
            self.format,
            self.separator,
        )?;
        if let Some(line) = trailer {
            writer.write_line(&line).await?;
        }
        match writer {
            Target::File(mut w) => w.shutdown().await?,
            Target::Buffer(b) => *self.output.lock() = Some(b),
        }
        debug!("<EEs> closed file exporter <{}>", self.base.cfg.id);
        Ok(())
    }

    fn metrics(&self) -> &ExporterMetrics {
        &self.base.metrics
    }

    fn prepare_map(&self, event: &CgrEvent) -> EesResult<ExportPayload> {
        let values = sorted_event(event).into_values().map(value_to_string).collect();
        Ok(ExportPayload::Record(values))
    }

    fn prepare_order_map(&self, fields: &OrderedMap) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Record(fields.values().map(value_to_string).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_csv_line_plain() {
        assert_eq!(csv_line(&strings(&["1001", "1.5"]), ','), "1001,1.5\n");
        assert_eq!(csv_line(&strings(&["a", "", "b"]), ';'), "a;;b\n");
    }

    #[test]
    fn test_csv_line_quoting() {
        assert_eq!(csv_line(&strings(&["a,b", "c"]), ','), "\"a,b\",c\n");
        assert_eq!(csv_line(&strings(&["say \"hi\""]), ','), "\"say \"\"hi\"\"\"\n");
        assert_eq!(csv_line(&strings(&["two\nlines"]), ','), "\"two\nlines\"\n");
        assert_eq!(csv_line(&strings(&[" lead"]), ','), "\" lead\"\n");
        assert_eq!(csv_line(&strings(&["a,b"]), ';'), "a,b\n");
    }

    #[tokio::test]
    async fn test_buffered_header_records_trailer() {
        let mut cfg = EventExporterCfg::new("csv1", "*file_csv");
        cfg.fields = vec![
            FcTemplate::constant("*hdr.Type", "CDR"),
            FcTemplate::variable("*exp.Account", "~*req.Account"),
            FcTemplate::variable("*trl.Events", "~*dc.NumberOfEvents"),
        ];
        let exporter = FileExporter::buffered(cfg, FileFormat::Csv, &ExporterDeps::default()).unwrap();
        assert!(exporter.name().starts_with("csv1_"));
        assert!(exporter.name().ends_with(".csv"));

        exporter.metrics().increment_events();
        exporter
            .export_event(
                &ExportContext::background(),
                &ExportPayload::Record(strings(&["1001"])),
                None,
            )
            .await
            .unwrap();
        exporter.close().await.unwrap();
        exporter.close().await.unwrap();

        let output = String::from_utf8(exporter.take_output().unwrap()).unwrap();
        assert_eq!(output, "CDR\n1001\n1\n");
    }

    #[tokio::test]
    async fn test_file_header_records_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = EventExporterCfg::new("csv2", "*file_csv");
        cfg.export_path = dir.path().to_string_lossy().to_string();
        cfg.fields = vec![
            FcTemplate::constant("*hdr.Type", "CDR"),
            FcTemplate::variable("*exp.Account", "~*req.Account"),
            FcTemplate::constant("*trl.End", "EOF"),
        ];
        let exporter = FileExporter::new(cfg, FileFormat::Csv, &ExporterDeps::default()).unwrap();
        let ctx = ExportContext::background();
        for account in ["1001", "1002"] {
            exporter
                .export_event(&ctx, &ExportPayload::Record(strings(&[account])), None)
                .await
                .unwrap();
        }
        exporter.close().await.unwrap();

        let content = std::fs::read_to_string(exporter.file_path().unwrap()).unwrap();
        assert_eq!(content, "CDR\n1001\n1002\nEOF\n");
    }

    #[tokio::test]
    async fn test_export_after_close_is_disconnected() {
        let cfg = EventExporterCfg::new("fwv1", "*file_fwv");
        let exporter = FileExporter::buffered(cfg, FileFormat::Fwv, &ExporterDeps::default()).unwrap();
        exporter.close().await.unwrap();

        assert!(matches!(exporter.connect().await, Err(EesError::Disconnected)));
        let err = exporter
            .export_event(
                &ExportContext::background(),
                &ExportPayload::Record(strings(&["x"])),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EesError::Disconnected));
    }

    #[tokio::test]
    async fn test_rejects_foreign_payload() {
        let cfg = EventExporterCfg::new("csv1", "*file_csv");
        let exporter = FileExporter::buffered(cfg, FileFormat::Csv, &ExporterDeps::default()).unwrap();
        let err = exporter
            .export_event(&ExportContext::background(), &ExportPayload::Bytes(vec![]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EesError::Export(_)));
    }
}
