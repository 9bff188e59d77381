//! Failed-post aggregation and persistence
//!
//! Payloads whose export attempts are exhausted are grouped per destination
//! in a cache with a fixed TTL counted from the group's creation, so a sink
//! failing continuously still has its batch spilled once per TTL. When a
//! group expires (or the cache is flushed) it is written to
//! `{failed_posts_dir}/{module}|{uuid}.gob`, from where it can be replayed
//! later.

use ees_core::config::ExporterOpts;
use ees_core::models::ExportPayload;
use ees_core::{EesError, EesResult};
use moka::future::Cache;
use moka::notification::{ListenerFuture, RemovalCause};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::keys::{self, LOCK_SUFFIX};

/// Failed-post record, persisted as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEvents {
    #[serde(rename = "Path")]
    pub path: String,

    #[serde(rename = "Opts", default)]
    pub opts: ExporterOpts,

    /// Exporter type the payloads were prepared for
    #[serde(rename = "Format")]
    pub format: String,

    #[serde(rename = "Events", default)]
    pub events: Vec<ExportPayload>,

    #[serde(rename = "Module")]
    pub module: String,

    /// Directory the record is written to, never persisted
    #[serde(skip)]
    pub failed_posts_dir: String,
}

impl ExportEvents {
    pub fn new(
        failed_posts_dir: &str,
        path: &str,
        format: &str,
        module: &str,
        opts: ExporterOpts,
    ) -> Self {
        Self {
            path: path.to_string(),
            opts,
            format: format.to_string(),
            events: Vec::new(),
            module: module.to_string(),
            failed_posts_dir: failed_posts_dir.to_string(),
        }
    }

    pub fn add_event(&mut self, payload: ExportPayload) {
        self.events.push(payload);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Write the record to `file_path`
    pub fn write_to_file(&self, file_path: &Path) -> EesResult<()> {
        let content = serde_json::to_vec(self)?;
        fs::write(file_path, content)?;
        Ok(())
    }

    /// Write the record under its failed-posts directory with a fresh name
    pub fn write_to_dir(&self) -> EesResult<PathBuf> {
        let file_path = Path::new(&self.failed_posts_dir).join(keys::failed_post_file_name(&self.module));
        self.write_to_file(&file_path)?;
        Ok(file_path)
    }

    /// Read a record and delete its file
    ///
    /// The file is guarded by a `.lck` sibling for the duration of the read,
    /// so two processes never replay the same file.
    pub fn from_file(file_path: &Path) -> EesResult<Self> {
        let _lock = FileLock::acquire(file_path)?;
        let content = fs::read(file_path)?;
        let record: ExportEvents = serde_json::from_slice(&content)?;
        fs::remove_file(file_path)?;
        Ok(record)
    }

    /// `from_file` on the blocking pool
    pub async fn load(file_path: PathBuf) -> EesResult<Self> {
        tokio::task::spawn_blocking(move || Self::from_file(&file_path))
            .await
            .map_err(|e| EesError::Internal(format!("failed post reader panicked: {}", e)))?
    }

    /// `write_to_file` on the blocking pool
    pub async fn store(self, file_path: PathBuf) -> EesResult<()> {
        tokio::task::spawn_blocking(move || self.write_to_file(&file_path))
            .await
            .map_err(|e| EesError::Internal(format!("failed post writer panicked: {}", e)))?
    }
}

/// Lock file removed on drop
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(target: &Path) -> EesResult<Self> {
        let mut lock_name = target.as_os_str().to_owned();
        lock_name.push(LOCK_SUFFIX);
        let path = PathBuf::from(lock_name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(EesError::Io(format!(
                "file <{}> is locked by another process",
                target.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("<EEs> failed removing lock file <{}>: {}", self.path.display(), e);
        }
    }
}

/// One live aggregation group
///
/// `sealed` is set once the group has been handed to persistence; late
/// writers then start a new group instead of appending to a lost one.
#[derive(Debug)]
struct Aggregator {
    events: ExportEvents,
    sealed: bool,
}

type SharedAggregator = Arc<Mutex<Aggregator>>;

/// Process-wide cache of failed posts
///
/// Writers hold the inner lock shared; `set_ttl` takes it exclusively to
/// swap the cache, so no payload is ever added to a cache being replaced.
pub struct FailedPostCache {
    cache: RwLock<Cache<String, SharedAggregator>>,
}

impl FailedPostCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(Self::build_cache(ttl)),
        }
    }

    fn build_cache(ttl: Duration) -> Cache<String, SharedAggregator> {
        let mut builder = Cache::builder().async_eviction_listener(
            |key: Arc<String>, aggregator: SharedAggregator, cause: RemovalCause| -> ListenerFuture {
                Box::pin(async move {
                    debug!("<EEs> failed posts <{}> evicted: {:?}", key, cause);
                    if let Err(e) = tokio::task::spawn_blocking(move || persist(&aggregator)).await {
                        error!("<EEs> failed posts writer for <{}> panicked: {}", key, e);
                    }
                })
            },
        );
        // Appending is an access: expiry must not be reset by it
        if !ttl.is_zero() {
            builder = builder.time_to_live(ttl);
        }
        builder.build()
    }

    /// Append a payload to the group of its destination, creating it if needed
    pub async fn add_failed_post(
        &self,
        failed_posts_dir: &str,
        path: &str,
        format: &str,
        module: &str,
        payload: ExportPayload,
        opts: &ExporterOpts,
    ) {
        let key = keys::failed_post_key(failed_posts_dir, path, format, module, opts);
        let cache = self.cache.read().await;
        let mut payload = Some(payload);

        // A sealed group was evicted between lookup and lock: retry on a fresh one
        while payload.is_some() {
            let aggregator = cache
                .get_with(key.clone(), async {
                    Arc::new(Mutex::new(Aggregator {
                        events: ExportEvents::new(failed_posts_dir, path, format, module, opts.clone()),
                        sealed: false,
                    }))
                })
                .await;

            let mut guard = aggregator.lock();
            if !guard.sealed {
                if let Some(payload) = payload.take() {
                    guard.events.add_event(payload);
                }
            }
        }
    }

    /// Copy of the live group for a key, if any
    pub async fn get(&self, key: &str) -> Option<ExportEvents> {
        let cache = self.cache.read().await;
        let aggregator = cache.get(key).await?;
        let guard = aggregator.lock();
        (!guard.sealed).then(|| guard.events.clone())
    }

    /// Keys of all live groups
    pub async fn keys(&self) -> Vec<String> {
        let cache = self.cache.read().await;
        cache.run_pending_tasks().await;
        cache.iter().map(|(k, _)| (*k).clone()).collect()
    }

    /// Replace the cache with one using the new TTL
    ///
    /// Groups of the old cache are persisted right away.
    pub async fn set_ttl(&self, ttl: Duration) {
        let old = {
            let mut cache = self.cache.write().await;
            std::mem::replace(&mut *cache, Self::build_cache(ttl))
        };
        Self::flush_cache(&old).await;
        info!("<EEs> failed posts TTL set to {:?}", ttl);
    }

    /// Persist every live group now
    pub async fn flush(&self) {
        let cache = self.cache.read().await;
        Self::flush_cache(&cache).await;
    }

    /// Process pending expirations, persisting expired groups
    pub async fn run_pending_tasks(&self) {
        self.cache.read().await.run_pending_tasks().await;
    }

    async fn flush_cache(cache: &Cache<String, SharedAggregator>) {
        cache.invalidate_all();
        cache.run_pending_tasks().await;
    }

    /// Periodically run cache maintenance; flushes on `shutdown`
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.run_pending_tasks().await,
                    _ = shutdown.cancelled() => {
                        cache.flush().await;
                        break;
                    }
                }
            }
        });
    }
}

impl Default for FailedPostCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(keys::FAILED_POSTS_TTL_SECS))
    }
}

/// Seal a group and write it to disk; failures are only logged
fn persist(aggregator: &SharedAggregator) {
    let events = {
        let mut guard = aggregator.lock();
        if guard.sealed {
            return;
        }
        guard.sealed = true;
        guard.events.clone()
    };
    if events.is_empty() {
        return;
    }

    match events.write_to_dir() {
        Ok(file_path) => info!(
            "<EEs> wrote {} failed posts to <{}>",
            events.events.len(),
            file_path.display()
        ),
        Err(e) => error!(
            "<EEs> failed writing failed posts for <{}> to <{}>: {}",
            events.path, events.failed_posts_dir, e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_prevents_second_reader() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("EEs|x.gob");
        ExportEvents::new("", "/out", "*file_csv", "EEs", ExporterOpts::default())
            .write_to_file(&file_path)
            .unwrap();

        let lock = FileLock::acquire(&file_path).unwrap();
        assert!(matches!(ExportEvents::from_file(&file_path), Err(EesError::Io(_))));
        drop(lock);

        assert!(ExportEvents::from_file(&file_path).is_ok());
        assert!(!file_path.exists());
    }

    #[test]
    fn test_persist_seals_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut events = ExportEvents::new(
            dir.path().to_str().unwrap(),
            "/out",
            "*file_csv",
            "EEs",
            ExporterOpts::default(),
        );
        events.add_event(ExportPayload::Record(vec!["1001".into()]));
        let aggregator = Arc::new(Mutex::new(Aggregator { events, sealed: false }));

        persist(&aggregator);
        persist(&aggregator);

        assert!(aggregator.lock().sealed);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
