//! Event Exporter Service core library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the event exporter service. It includes:
//!
//! - Domain models (CgrEvent, ExporterMetrics, ExportPayload)
//! - The `EventExporter` capability and the collaborator traits
//!   (filters, field templating, attributes)
//! - Unified error handling with HTTP response mapping
//! - Application and exporter configuration

pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod traits;

pub use config::{AppConfig, EesConfig, EventExporterCfg, FcTemplate};
pub use context::ExportContext;
pub use error::EesError;
pub use traits::{EventExporter, ExporterRef};

/// Result type alias using EesError
pub type EesResult<T> = Result<T, EesError>;

/// Well-known constants shared by every crate of the service
pub mod consts {
    /// Sentinel disabling an exporter or a failed-posts directory
    pub const META_NONE: &str = "*none";

    /// Default value used when a run ID is missing
    pub const META_DEFAULT: &str = "*default";

    /// Flag enabling attribute enrichment on an exporter
    pub const META_ATTRIBUTES: &str = "*attributes";

    /// Module name recorded on failed posts written by the exporter service
    pub const EES_MODULE: &str = "EEs";

    /// API option requesting metric snapshots in the reply
    pub const OPT_EES_VERBOSE: &str = "*eesVerbose";

    /// API option carrying explicit exporter IDs
    pub const OPT_EE_IDS: &str = "*eeIDs";

    /// API option naming the attribute profiles to apply
    pub const OPT_ATTRIBUTE_IDS: &str = "*attributeIDs";

    /// API option carrying the processing context
    pub const OPT_CONTEXT: &str = "*context";

    /// Default attribute context for exporter enrichment
    pub const META_EES: &str = "*ees";

    /// Separator used when concatenating cache keys
    pub const CONCATENATED_KEY_SEP: &str = ":";

    /// Extension of failed-post files
    pub const GOB_SUFFIX: &str = ".gob";

    /// Separator between module and unique ID in failed-post file names
    pub const PIPE_SEP: &str = "|";

    /// Well-known event fields
    pub mod fields {
        pub const CGRID: &str = "CGRID";
        pub const ORIGIN_ID: &str = "OriginID";
        pub const RUN_ID: &str = "RunID";
        pub const ANSWER_TIME: &str = "AnswerTime";
        pub const ORDER_ID: &str = "OrderID";
        pub const COST: &str = "Cost";
        pub const TOR: &str = "ToR";
        pub const USAGE: &str = "Usage";
    }

    /// Traffic types accumulated by exporter metrics
    pub mod tor {
        pub const VOICE: &str = "*voice";
        pub const SMS: &str = "*sms";
        pub const MMS: &str = "*mms";
        pub const GENERIC: &str = "*generic";
        pub const DATA: &str = "*data";
    }
}
