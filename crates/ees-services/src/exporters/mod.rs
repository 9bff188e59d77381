//! Exporter implementations and their registry
//!
//! Every sink type tag maps to a builder in `ExporterRegistry`. The
//! dispatcher only ever talks to `EventExporter` trait objects.

pub mod broker;
pub mod file;
pub mod http;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod log;
pub mod rpc;
#[cfg(feature = "s3")]
pub mod s3;
pub mod sql;
pub mod virt;

use ees_core::config::EventExporterCfg;
use ees_core::models::{CgrEvent, ExporterMetrics, OrderedMap};
use ees_core::traits::FieldProjector;
use ees_core::{EesError, EesResult, ExporterRef};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::filters::InlineFilterS;
use crate::gate::ConcurrencyGate;
use crate::templates::TemplateEngine;

pub use broker::{BrokerConnection, BrokerConnector, BrokerExporter};
pub use file::{FileExporter, FileFormat};
pub use http::HttpExporter;
pub use log::LogExporter;
pub use rpc::RpcExporter;
pub use sql::SqlExporter;
pub use virt::VirtualExporter;

/// Exporter type tags
pub mod types {
    pub const FILE_CSV: &str = "*file_csv";
    pub const FILE_FWV: &str = "*file_fwv";
    pub const HTTP_POST: &str = "*http_post";
    pub const HTTP_JSON_MAP: &str = "*http_json_map";
    pub const AMQP_JSON_MAP: &str = "*amqp_json_map";
    pub const AMQPV1_JSON_MAP: &str = "*amqpv1_json_map";
    pub const NATS_JSON_MAP: &str = "*nats_json_map";
    pub const SQS_JSON_MAP: &str = "*sqs_json_map";
    pub const KAFKA_JSON_MAP: &str = "*kafka_json_map";
    pub const S3_JSON_MAP: &str = "*s3_json_map";
    pub const SQL: &str = "*sql";
    pub const RPC: &str = "*rpc";
    pub const LOG: &str = "*log";
    pub const VIRT: &str = "*virt";

    /// Tags served by `BrokerExporter`
    pub const BROKERS: [&str; 6] = [
        AMQP_JSON_MAP,
        AMQPV1_JSON_MAP,
        NATS_JSON_MAP,
        SQS_JSON_MAP,
        KAFKA_JSON_MAP,
        S3_JSON_MAP,
    ];
}

/// Shared collaborators handed to every builder
#[derive(Clone)]
pub struct ExporterDeps {
    /// Used for file headers/trailers and HTTP headers
    pub projector: Arc<dyn FieldProjector>,

    /// Broker transports by exporter type tag
    pub broker_connectors: HashMap<String, Arc<dyn BrokerConnector>>,
}

impl ExporterDeps {
    pub fn new(projector: Arc<dyn FieldProjector>) -> Self {
        let mut broker_connectors: HashMap<String, Arc<dyn BrokerConnector>> = HashMap::new();
        #[cfg(feature = "kafka")]
        broker_connectors.insert(
            types::KAFKA_JSON_MAP.to_string(),
            Arc::new(kafka::KafkaConnector) as Arc<dyn BrokerConnector>,
        );
        #[cfg(feature = "s3")]
        broker_connectors.insert(
            types::S3_JSON_MAP.to_string(),
            Arc::new(s3::S3Connector) as Arc<dyn BrokerConnector>,
        );
        Self {
            projector,
            broker_connectors,
        }
    }

    /// Register the transport used by a broker exporter type
    pub fn with_connector(mut self, exporter_type: &str, connector: Arc<dyn BrokerConnector>) -> Self {
        self.broker_connectors.insert(exporter_type.to_string(), connector);
        self
    }
}

impl Default for ExporterDeps {
    fn default() -> Self {
        Self::new(Arc::new(TemplateEngine::new(Arc::new(InlineFilterS::default()))))
    }
}

/// Constructor of one exporter type
pub type ExporterBuilder =
    Arc<dyn Fn(EventExporterCfg, &ExporterDeps) -> EesResult<ExporterRef> + Send + Sync>;

/// Type tag -> constructor table
#[derive(Clone)]
pub struct ExporterRegistry {
    builders: HashMap<String, ExporterBuilder>,
}

impl ExporterRegistry {
    /// Registry with no exporter types
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register or replace the builder of a type tag
    pub fn register<F>(&mut self, exporter_type: &str, builder: F)
    where
        F: Fn(EventExporterCfg, &ExporterDeps) -> EesResult<ExporterRef> + Send + Sync + 'static,
    {
        self.builders.insert(exporter_type.to_string(), Arc::new(builder));
    }

    pub fn is_supported(&self, exporter_type: &str) -> bool {
        self.builders.contains_key(exporter_type)
    }

    /// Build an exporter for `cfg`
    pub fn build(&self, cfg: EventExporterCfg, deps: &ExporterDeps) -> EesResult<ExporterRef> {
        let builder = self
            .builders
            .get(&cfg.exporter_type)
            .ok_or_else(|| EesError::UnsupportedExporterType(cfg.exporter_type.clone()))?;
        builder(cfg, deps)
    }
}

impl Default for ExporterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(types::FILE_CSV, |cfg, deps| {
            Ok(Arc::new(FileExporter::new(cfg, FileFormat::Csv, deps)?))
        });
        registry.register(types::FILE_FWV, |cfg, deps| {
            Ok(Arc::new(FileExporter::new(cfg, FileFormat::Fwv, deps)?))
        });
        registry.register(types::HTTP_POST, |cfg, deps| {
            Ok(Arc::new(HttpExporter::new(cfg, deps)?))
        });
        registry.register(types::HTTP_JSON_MAP, |cfg, deps| {
            Ok(Arc::new(HttpExporter::new(cfg, deps)?))
        });
        for tag in types::BROKERS {
            registry.register(tag, |cfg, deps| Ok(Arc::new(BrokerExporter::new(cfg, deps)?)));
        }
        registry.register(types::SQL, |cfg, _| Ok(Arc::new(SqlExporter::new(cfg)?)));
        registry.register(types::RPC, |cfg, _| Ok(Arc::new(RpcExporter::new(cfg)?)));
        registry.register(types::LOG, |cfg, _| Ok(Arc::new(LogExporter::new(cfg)?)));
        registry.register(types::VIRT, |cfg, _| Ok(Arc::new(VirtualExporter::new(cfg)?)));
        registry
    }
}

/// State every sink carries: configuration, metrics and gate
#[derive(Debug)]
pub struct SinkBase {
    pub cfg: EventExporterCfg,
    pub metrics: ExporterMetrics,
    pub gate: ConcurrencyGate,
}

impl SinkBase {
    /// Validates the timezone, which every sink needs for its metrics
    pub fn new(cfg: EventExporterCfg) -> EesResult<Self> {
        let tz = cfg.location()?;
        let gate = ConcurrencyGate::new(cfg.concurrent_requests);
        Ok(Self {
            cfg,
            metrics: ExporterMetrics::new(tz),
            gate,
        })
    }

    /// Mandatory string option
    pub fn required_opt(&self, key: &str) -> EesResult<String> {
        self.cfg.opts.get_str(key).ok_or_else(|| EesError::MissingOption {
            exporter: self.cfg.id.clone(),
            option: key.to_string(),
        })
    }
}

/// Event fields sorted by key, for deterministic flat payloads
pub fn sorted_event(event: &CgrEvent) -> BTreeMap<&str, &Value> {
    event.event.iter().map(|(k, v)| (k.as_str(), v)).collect()
}

/// Event fields as an ordered JSON object, sorted by key
pub fn sorted_event_object(event: &CgrEvent) -> Map<String, Value> {
    sorted_event(event)
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Ordered projection as JSON bytes
pub fn ordered_json(fields: &OrderedMap) -> EesResult<Vec<u8>> {
    Ok(serde_json::to_vec(fields)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type() {
        let registry = ExporterRegistry::default();
        let err = registry
            .build(EventExporterCfg::new("x", "*carrier_pigeon"), &ExporterDeps::default())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "unsupported exporter type: <*carrier_pigeon>");
    }

    #[test]
    fn test_default_tags() {
        let registry = ExporterRegistry::default();
        for tag in [
            types::FILE_CSV,
            types::FILE_FWV,
            types::HTTP_POST,
            types::HTTP_JSON_MAP,
            types::KAFKA_JSON_MAP,
            types::S3_JSON_MAP,
            types::SQL,
            types::RPC,
            types::LOG,
            types::VIRT,
        ] {
            assert!(registry.is_supported(tag), "{} not registered", tag);
        }
    }

    #[test]
    fn test_invalid_timezone_fails_build() {
        let mut cfg = EventExporterCfg::new("virt1", types::VIRT);
        cfg.timezone = "Nowhere/Null".to_string();
        let err = ExporterRegistry::default()
            .build(cfg, &ExporterDeps::default())
            .err()
            .unwrap();
        assert!(matches!(err, EesError::InvalidTimezone(_)));
    }

    #[test]
    fn test_broker_without_transport() {
        let cfg = EventExporterCfg::new("amqp1", types::AMQP_JSON_MAP);
        let err = ExporterRegistry::default()
            .build(cfg, &ExporterDeps::default())
            .err()
            .unwrap();
        assert!(matches!(err, EesError::Config(_)));
    }

    #[test]
    fn test_sorted_event_object() {
        let event = CgrEvent::new("cgrates.org", "ev1")
            .with_field("b", 2)
            .with_field("a", 1);
        let keys: Vec<_> = sorted_event_object(&event).keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
