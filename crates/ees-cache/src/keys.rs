//! Cache key builders for the exporter service
//!
//! Provides standardized key naming for the failed-post aggregators and the
//! files they spill to, so that unrelated destinations never share a batch.
//!
//! # Key Patterns
//!
//! - `{dir}:{path}:{format}:{module}` - failed posts of one destination
//! - `{dir}:{path}:{format}:{module}:{queue}` - same, split per queue, bucket or topic
//! - `{module}|{uuid}.gob` - file a failed-post batch is written to
//!
//! # Example
//!
//! ```
//! use ees_cache::keys;
//! use ees_core::config::ExporterOpts;
//!
//! let key = keys::failed_post_key("/var/spool", "http://host", "*http_post", "EEs", &ExporterOpts::default());
//! assert_eq!(key, "/var/spool:http://host:*http_post:EEs");
//! ```

use ees_core::config::ExporterOpts;
use ees_core::consts::{CONCATENATED_KEY_SEP, GOB_SUFFIX, PIPE_SEP};
use uuid::Uuid;

/// Default TTL of a failed-post aggregator (5 seconds)
pub const FAILED_POSTS_TTL_SECS: u64 = 5;

/// Suffix of the lock file guarding a failed-post file during replay
pub const LOCK_SUFFIX: &str = ".lck";

/// Build the aggregation key of a failed post
///
/// The first non-empty of `amqpQueueID`, `s3BucketID`, `sqsQueueID` and
/// `kafkaTopic` is appended when present.
pub fn failed_post_key(
    failed_posts_dir: &str,
    path: &str,
    format: &str,
    module: &str,
    opts: &ExporterOpts,
) -> String {
    let mut parts = vec![failed_posts_dir, path, format, module];
    let queue_id = opts.queue_id();
    if let Some(queue_id) = queue_id.as_deref() {
        parts.push(queue_id);
    }
    parts.join(CONCATENATED_KEY_SEP)
}

/// Build a unique failed-post file name: `{module}|{uuid}.gob`
pub fn failed_post_file_name(module: &str) -> String {
    format!("{}{}{}{}", module, PIPE_SEP, Uuid::new_v4(), GOB_SUFFIX)
}
