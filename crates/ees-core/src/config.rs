//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.
//! Exporter definitions are consumed read-only by the service: the dispatcher
//! never mutates an `EventExporterCfg`.

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;

use crate::consts::META_NONE;
use crate::error::EesError;
use crate::EesResult;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub ees: EesConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Event exporter service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EesConfig {
    /// Whether the service accepts events at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Exporter cache buckets, keyed by exporter type
    #[serde(default = "default_cache")]
    pub cache: HashMap<String, CacheParamCfg>,

    /// TTL of the failed-post aggregators from creation, in seconds
    #[serde(default = "default_failed_posts_ttl")]
    pub failed_posts_ttl_secs: u64,

    /// Named filter profiles: profile ID -> inline rules (all must pass)
    #[serde(default)]
    pub filter_profiles: HashMap<String, Vec<String>>,

    /// Configured exporters, in dispatch order
    #[serde(default)]
    pub exporters: Vec<EventExporterCfg>,
}

fn default_true() -> bool {
    true
}

fn default_cache() -> HashMap<String, CacheParamCfg> {
    HashMap::from([("*file_csv".to_string(), CacheParamCfg::default())])
}

fn default_failed_posts_ttl() -> u64 {
    5
}

impl Default for EesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: default_cache(),
            failed_posts_ttl_secs: default_failed_posts_ttl(),
            filter_profiles: HashMap::new(),
            exporters: Vec::new(),
        }
    }
}

impl EesConfig {
    /// Find an exporter definition by ID
    pub fn exporter(&self, id: &str) -> Option<&EventExporterCfg> {
        self.exporters.iter().find(|e| e.id == id)
    }
}

/// Cache sizing for one exporter type
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CacheParamCfg {
    /// Maximum number of cached exporters, negative for unbounded, 0 disables caching
    #[serde(default = "default_cache_limit")]
    pub limit: i64,

    /// Expiry in seconds, 0 disables expiry
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Expire relative to insertion instead of last access
    #[serde(default)]
    pub static_ttl: bool,
}

fn default_cache_limit() -> i64 {
    -1
}

fn default_cache_ttl() -> u64 {
    5
}

impl Default for CacheParamCfg {
    fn default() -> Self {
        Self {
            limit: default_cache_limit(),
            ttl_secs: default_cache_ttl(),
            static_ttl: false,
        }
    }
}

/// Option keys understood by the built-in sinks
pub mod opts {
    pub const CSV_FIELD_SEPARATOR: &str = "csvFieldSeparator";
    pub const HTTP_TIMEOUT_SECS: &str = "httpTimeoutSecs";

    pub const AMQP_QUEUE_ID: &str = "amqpQueueID";
    pub const KAFKA_TOPIC: &str = "kafkaTopic";
    pub const NATS_SUBJECT: &str = "natsSubject";
    pub const SQS_QUEUE_ID: &str = "sqsQueueID";

    pub const S3_BUCKET_ID: &str = "s3BucketID";
    pub const S3_FOLDER_PATH: &str = "s3FolderPath";
    pub const AWS_REGION: &str = "awsRegion";
    pub const AWS_KEY: &str = "awsKey";
    pub const AWS_SECRET: &str = "awsSecret";
    pub const AWS_TOKEN: &str = "awsToken";

    pub const SQL_TABLE_NAME: &str = "sqlTableName";
    pub const SQL_DB_NAME: &str = "sqlDBName";
    pub const SQL_MAX_OPEN_CONNS: &str = "sqlMaxOpenConns";

    pub const RPC_SERVICE_METHOD: &str = "serviceMethod";
    pub const RPC_API_OPTS: &str = "rpcAPIOpts";
    pub const RPC_REPLY_TIMEOUT_SECS: &str = "rpcReplyTimeoutSecs";
}

/// Sink-specific key/value options, passed through verbatim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExporterOpts(pub HashMap<String, Value>);

impl ExporterOpts {
    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Option rendered as a string; empty strings count as missing
    pub fn get_str(&self, key: &str) -> Option<String> {
        let s = match self.0.get(key)? {
            Value::String(s) => s.clone(),
            Value::Null => return None,
            other => other.to_string(),
        };
        (!s.is_empty()).then_some(s)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Destination discriminator used to split failed-post batches
    pub fn queue_id(&self) -> Option<String> {
        [
            opts::AMQP_QUEUE_ID,
            opts::S3_BUCKET_ID,
            opts::SQS_QUEUE_ID,
            opts::KAFKA_TOPIC,
        ]
        .iter()
        .find_map(|k| self.get_str(k))
    }
}

/// Field template: one projected output field
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FcTemplate {
    #[serde(default)]
    pub tag: String,

    /// Output path, e.g. `*exp.Account`, `*hdr.Version`, `*trl.Total`
    pub path: String,

    /// `*variable`, `*composed`, `*constant` or `*filler`
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,

    /// `;`-separated parts; `~`-prefixed parts are data-provider paths
    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default)]
    pub mandatory: bool,

    /// Fixed width, 0 for free width
    #[serde(default)]
    pub width: usize,

    /// `*left` or `*right` when the value may be truncated
    #[serde(default)]
    pub strip: String,

    /// `*left`, `*right` or `*zeroleft`
    #[serde(default)]
    pub padding: String,

    #[serde(default)]
    pub blocker: bool,
}

fn default_field_type() -> String {
    "*variable".to_string()
}

impl FcTemplate {
    /// Shorthand for a `*variable` field
    pub fn variable(path: &str, value: &str) -> Self {
        Self {
            tag: String::new(),
            path: path.to_string(),
            field_type: default_field_type(),
            value: value.to_string(),
            filters: Vec::new(),
            mandatory: false,
            width: 0,
            strip: String::new(),
            padding: String::new(),
            blocker: false,
        }
    }

    /// Shorthand for a `*constant` field
    pub fn constant(path: &str, value: &str) -> Self {
        Self {
            field_type: "*constant".to_string(),
            ..Self::variable(path, value)
        }
    }

    /// Tag used in error messages, falling back to the path
    pub fn tag(&self) -> &str {
        if self.tag.is_empty() {
            &self.path
        } else {
            &self.tag
        }
    }
}

/// Configuration of one exporter
#[derive(Debug, Deserialize, Clone)]
pub struct EventExporterCfg {
    pub id: String,

    /// Sink type tag, e.g. `*file_csv`
    #[serde(rename = "type", default = "default_exporter_type")]
    pub exporter_type: String,

    #[serde(default)]
    pub export_path: String,

    #[serde(default)]
    pub opts: ExporterOpts,

    /// IANA timezone used for event times, empty for UTC
    #[serde(default)]
    pub timezone: String,

    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default)]
    pub flags: Vec<String>,

    #[serde(default)]
    pub attribute_ids: Vec<String>,

    #[serde(default)]
    pub attribute_context: String,

    /// Dispatcher waits for this exporter before replying
    #[serde(default)]
    pub synchronous: bool,

    /// No further exporters are started after this one
    #[serde(default)]
    pub blocker: bool,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Simultaneous exports allowed, 0 or negative for unbounded
    #[serde(default)]
    pub concurrent_requests: i32,

    #[serde(default = "default_failed_posts_dir")]
    pub failed_posts_dir: String,

    /// Reset the exporter metrics on this period
    #[serde(default)]
    pub metrics_reset_interval_secs: Option<u64>,

    #[serde(default)]
    pub fields: Vec<FcTemplate>,
}

fn default_exporter_type() -> String {
    META_NONE.to_string()
}

fn default_attempts() -> u32 {
    1
}

fn default_failed_posts_dir() -> String {
    "/var/spool/cgrates/failed_posts".to_string()
}

impl Default for EventExporterCfg {
    fn default() -> Self {
        Self {
            id: String::new(),
            exporter_type: default_exporter_type(),
            export_path: String::new(),
            opts: ExporterOpts::default(),
            timezone: String::new(),
            filters: Vec::new(),
            flags: Vec::new(),
            attribute_ids: Vec::new(),
            attribute_context: String::new(),
            synchronous: false,
            blocker: false,
            attempts: default_attempts(),
            concurrent_requests: 0,
            failed_posts_dir: default_failed_posts_dir(),
            metrics_reset_interval_secs: None,
            fields: Vec::new(),
        }
    }
}

const HEADER_PREFIX: &str = "*hdr";
const TRAILER_PREFIX: &str = "*trl";

impl EventExporterCfg {
    /// Exporter with the given ID and type, everything else defaulted
    pub fn new(id: &str, exporter_type: &str) -> Self {
        Self {
            id: id.to_string(),
            exporter_type: exporter_type.to_string(),
            ..Self::default()
        }
    }

    pub fn header_fields(&self) -> Vec<FcTemplate> {
        self.fields_with_prefix(HEADER_PREFIX)
    }

    pub fn trailer_fields(&self) -> Vec<FcTemplate> {
        self.fields_with_prefix(TRAILER_PREFIX)
    }

    pub fn content_fields(&self) -> Vec<FcTemplate> {
        self.fields
            .iter()
            .filter(|f| !f.path.starts_with(HEADER_PREFIX) && !f.path.starts_with(TRAILER_PREFIX))
            .cloned()
            .collect()
    }

    fn fields_with_prefix(&self, prefix: &str) -> Vec<FcTemplate> {
        self.fields
            .iter()
            .filter(|f| f.path.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Whether exhausted exports are queued for durable retry
    pub fn failed_posts_enabled(&self) -> bool {
        !self.failed_posts_dir.is_empty() && self.failed_posts_dir != META_NONE
    }

    /// At least one attempt is always made
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Timezone used to interpret naive event times
    pub fn location(&self) -> EesResult<Tz> {
        match self.timezone.as_str() {
            "" | "UTC" | "Local" => Ok(Tz::UTC),
            tz => tz
                .parse::<Tz>()
                .map_err(|_| EesError::InvalidTimezone(tz.to_string())),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 2080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("ees.enabled", true)?
            .set_default("ees.failed_posts_ttl_secs", 5)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CGR_EES prefix
            .add_source(
                Environment::with_prefix("CGR_EES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 2080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CGR_EES").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
