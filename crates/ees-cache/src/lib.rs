//! Caching layer for the event exporter service
//!
//! Provides the two in-memory caches the dispatcher relies on, both built on
//! `moka` with eviction listeners doing the teardown work.
//!
//! # Features
//!
//! - `ExporterCache`: built exporters per type bucket, closed on eviction
//! - `FailedPostCache`: fixed-TTL aggregation of exhausted exports,
//!   spilled to disk on eviction
//! - `ExportEvents`: the persisted failed-post record and its locked reader
//!
//! # Example
//!
//! ```no_run
//! use ees_cache::FailedPostCache;
//! use ees_core::config::ExporterOpts;
//! use ees_core::models::ExportPayload;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = FailedPostCache::new(Duration::from_secs(5));
//!
//!     cache
//!         .add_failed_post(
//!             "/var/spool/cgrates/failed_posts",
//!             "http://localhost:8080/cdrs",
//!             "*http_json_map",
//!             "EEs",
//!             ExportPayload::Bytes(b"{}".to_vec()),
//!             &ExporterOpts::default(),
//!         )
//!         .await;
//!
//!     // Write everything to disk right away
//!     cache.flush().await;
//! }
//! ```

pub mod exporter_cache;
pub mod failed_posts;
pub mod keys;

pub use exporter_cache::ExporterCache;
pub use failed_posts::{ExportEvents, FailedPostCache};
