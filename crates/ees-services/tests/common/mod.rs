//! Scripted exporter shared by the integration tests
//!
//! Behaviour is driven by the exporter options:
//! - `connectFailures`: number of `connect` calls failing before the first success
//! - `failExport`: every `export_event` fails
//! - `delayMs`: time spent inside the gated section of `export_event`

#![allow(dead_code)]

use async_trait::async_trait;
use ees_core::models::{CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
use ees_core::{EesError, EesResult, EventExporter, EventExporterCfg, ExportContext};
use ees_services::exporters::sorted_event_object;
use ees_services::{ConcurrencyGate, ExporterRegistry};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SCRIPTED: &str = "*scripted";

/// Counters of one scripted exporter ID
#[derive(Debug, Default)]
pub struct Probe {
    pub builds: AtomicUsize,
    pub connects: AtomicUsize,
    pub exports: AtomicUsize,
    pub completed: AtomicUsize,
    pub closes: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Probe {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Probes by exporter ID plus the global order exports started in
#[derive(Clone, Default)]
pub struct Probes {
    probes: Arc<Mutex<HashMap<String, Arc<Probe>>>>,
    pub started: Arc<Mutex<Vec<String>>>,
}

impl Probes {
    pub fn probe(&self, id: &str) -> Arc<Probe> {
        Arc::clone(self.probes.lock().entry(id.to_string()).or_default())
    }

    /// Whether an exporter with this ID was ever built
    pub fn built(&self, id: &str) -> bool {
        self.probes.lock().contains_key(id)
    }

    /// Default registry plus the `*scripted` type
    pub fn registry(&self) -> ExporterRegistry {
        let mut registry = ExporterRegistry::default();
        let probes = self.clone();
        registry.register(SCRIPTED, move |cfg, _deps| {
            Ok(Arc::new(ScriptedExporter::new(cfg, probes.clone())))
        });
        registry
    }
}

pub struct ScriptedExporter {
    cfg: EventExporterCfg,
    metrics: ExporterMetrics,
    gate: ConcurrencyGate,
    probe: Arc<Probe>,
    started: Arc<Mutex<Vec<String>>>,
    connect_failures: AtomicUsize,
    fail_export: bool,
    delay: Duration,
}

impl ScriptedExporter {
    pub fn new(cfg: EventExporterCfg, probes: Probes) -> Self {
        let probe = probes.probe(&cfg.id);
        probe.builds.fetch_add(1, Ordering::SeqCst);
        let connect_failures = cfg.opts.get_u64("connectFailures").unwrap_or(0) as usize;
        let fail_export = cfg
            .opts
            .get("failExport")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let delay = Duration::from_millis(cfg.opts.get_u64("delayMs").unwrap_or(0));
        Self {
            gate: ConcurrencyGate::new(cfg.concurrent_requests),
            cfg,
            metrics: ExporterMetrics::default(),
            probe,
            started: probes.started,
            connect_failures: AtomicUsize::new(connect_failures),
            fail_export,
            delay,
        }
    }
}

#[async_trait]
impl EventExporter for ScriptedExporter {
    fn cfg(&self) -> &EventExporterCfg {
        &self.cfg
    }

    async fn connect(&self) -> EesResult<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EesError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    async fn export_event(
        &self,
        _ctx: &ExportContext,
        _payload: &ExportPayload,
        _extra_data: Option<&str>,
    ) -> EesResult<()> {
        self.probe.exports.fetch_add(1, Ordering::SeqCst);
        self.started.lock().push(self.cfg.id.clone());

        let _permit = self.gate.get().await;
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.probe.completed.fetch_add(1, Ordering::SeqCst);

        if self.fail_export {
            return Err(EesError::Export("sink rejected payload".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> EesResult<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn metrics(&self) -> &ExporterMetrics {
        &self.metrics
    }

    fn prepare_map(&self, event: &CgrEvent) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Value(Value::Object(sorted_event_object(event))))
    }

    fn prepare_order_map(&self, fields: &OrderedMap) -> EesResult<ExportPayload> {
        Ok(ExportPayload::Value(Value::Object(fields.clone())))
    }
}

/// Scripted exporter configuration
pub fn scripted(id: &str) -> EventExporterCfg {
    let mut cfg = EventExporterCfg::new(id, SCRIPTED);
    cfg.failed_posts_dir = "*none".to_string();
    cfg
}
