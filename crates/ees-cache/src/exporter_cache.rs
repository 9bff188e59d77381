//! Per-type cache of built exporters
//!
//! Every exporter type configured under `ees.cache` gets its own bucket with
//! its own capacity and expiry. Entries leaving a bucket, for whatever
//! reason, are closed by the eviction listener.

use ees_core::config::CacheParamCfg;
use ees_core::{EesError, EesResult, ExporterRef};
use moka::future::Cache;
use moka::notification::{ListenerFuture, RemovalCause};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type Bucket = Cache<String, ExporterRef>;

/// Exporter instances keyed by exporter ID, bucketed by exporter type
#[derive(Clone)]
pub struct ExporterCache {
    buckets: HashMap<String, Bucket>,
}

impl ExporterCache {
    /// Create one bucket per configured exporter type
    ///
    /// A `limit` of 0 disables caching for the type: it gets no bucket.
    pub fn new(params: &HashMap<String, CacheParamCfg>) -> Self {
        let buckets = params
            .iter()
            .filter(|(_, cfg)| cfg.limit != 0)
            .map(|(exporter_type, cfg)| (exporter_type.clone(), Self::build_bucket(cfg)))
            .collect();
        Self { buckets }
    }

    fn build_bucket(cfg: &CacheParamCfg) -> Bucket {
        let mut builder = Cache::builder().async_eviction_listener(
            |id: Arc<String>, exporter: ExporterRef, cause: RemovalCause| -> ListenerFuture {
                Box::pin(async move {
                    debug!("<EEs> closing exporter <{}>, removal cause: {:?}", id, cause);
                    if let Err(e) = exporter.close().await {
                        warn!("<EEs> error closing exporter <{}>: {}", id, e);
                    }
                })
            },
        );

        if cfg.limit > 0 {
            builder = builder.max_capacity(cfg.limit as u64);
        }
        if cfg.ttl_secs > 0 {
            let ttl = Duration::from_secs(cfg.ttl_secs);
            builder = if cfg.static_ttl {
                builder.time_to_live(ttl)
            } else {
                builder.time_to_idle(ttl)
            };
        }
        builder.build()
    }

    /// Whether exporters of this type are cached at all
    ///
    /// Types without a bucket are built per call and closed after the export.
    pub fn has_bucket(&self, exporter_type: &str) -> bool {
        self.buckets.contains_key(exporter_type)
    }

    pub async fn get(&self, exporter_type: &str, id: &str) -> Option<ExporterRef> {
        self.buckets.get(exporter_type)?.get(id).await
    }

    /// Insert an exporter, closing any instance it replaces
    pub async fn set(&self, exporter_type: &str, id: &str, exporter: ExporterRef) -> EesResult<()> {
        let bucket = self.bucket(exporter_type)?;
        bucket.insert(id.to_string(), exporter).await;
        Ok(())
    }

    /// Cached exporter, or the one built by `init` on a miss
    ///
    /// Concurrent misses for the same ID run `init` once; every waiter gets
    /// the same instance, or a copy of the same error.
    pub async fn get_or_build<F>(&self, exporter_type: &str, id: &str, init: F) -> EesResult<ExporterRef>
    where
        F: Future<Output = EesResult<ExporterRef>>,
    {
        let bucket = self.bucket(exporter_type)?;
        bucket
            .try_get_with(id.to_string(), init)
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drop one exporter, closing it
    pub async fn remove(&self, exporter_type: &str, id: &str) {
        if let Some(bucket) = self.buckets.get(exporter_type) {
            bucket.invalidate(id).await;
            bucket.run_pending_tasks().await;
        }
    }

    /// Close and drop every cached exporter
    pub async fn clear(&self) {
        for bucket in self.buckets.values() {
            bucket.invalidate_all();
            bucket.run_pending_tasks().await;
        }
    }

    /// Process pending expirations so that expired exporters get closed
    pub async fn run_pending_tasks(&self) {
        for bucket in self.buckets.values() {
            bucket.run_pending_tasks().await;
        }
    }

    /// Number of cached exporters of a type
    pub async fn len(&self, exporter_type: &str) -> usize {
        match self.buckets.get(exporter_type) {
            Some(bucket) => {
                bucket.run_pending_tasks().await;
                bucket.entry_count() as usize
            }
            None => 0,
        }
    }

    fn bucket(&self, exporter_type: &str) -> EesResult<&Bucket> {
        self.buckets.get(exporter_type).ok_or_else(|| {
            EesError::Internal(format!("no cache bucket for exporter type <{}>", exporter_type))
        })
    }
}
