//! Integration tests for the exporter cache

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ees_cache::ExporterCache;
    use ees_core::config::CacheParamCfg;
    use ees_core::models::{CgrEvent, ExportPayload, ExporterMetrics, OrderedMap};
    use ees_core::{EesError, EesResult, EventExporter, EventExporterCfg, ExportContext, ExporterRef};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingExporter {
        cfg: EventExporterCfg,
        metrics: ExporterMetrics,
        closed: Arc<AtomicUsize>,
    }

    impl CountingExporter {
        fn new(id: &str, closed: Arc<AtomicUsize>) -> ExporterRef {
            Arc::new(Self {
                cfg: EventExporterCfg::new(id, "*virt"),
                metrics: ExporterMetrics::default(),
                closed,
            })
        }
    }

    #[async_trait]
    impl EventExporter for CountingExporter {
        fn cfg(&self) -> &EventExporterCfg {
            &self.cfg
        }

        async fn connect(&self) -> EesResult<()> {
            Ok(())
        }

        async fn export_event(
            &self,
            _ctx: &ExportContext,
            _payload: &ExportPayload,
            _extra_data: Option<&str>,
        ) -> EesResult<()> {
            Ok(())
        }

        async fn close(&self) -> EesResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn metrics(&self) -> &ExporterMetrics {
            &self.metrics
        }

        fn prepare_map(&self, _event: &CgrEvent) -> EesResult<ExportPayload> {
            Ok(ExportPayload::Record(Vec::new()))
        }

        fn prepare_order_map(&self, _fields: &OrderedMap) -> EesResult<ExportPayload> {
            Ok(ExportPayload::Record(Vec::new()))
        }
    }

    fn cache_with(params: CacheParamCfg) -> ExporterCache {
        ExporterCache::new(&HashMap::from([("*virt".to_string(), params)]))
    }

    #[tokio::test]
    async fn test_buckets_follow_config() {
        let cache = cache_with(CacheParamCfg::default());
        assert!(cache.has_bucket("*virt"));
        assert!(!cache.has_bucket("*http_post"));
        assert!(cache.get("*http_post", "x").await.is_none());
    }

    #[tokio::test]
    async fn test_get_or_build_builds_once() {
        let cache = cache_with(CacheParamCfg::default());
        let closed = Arc::new(AtomicUsize::new(0));
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let closed = closed.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build("*virt", "virt1", async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(CountingExporter::new("virt1", closed))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len("*virt").await, 1);
    }

    #[tokio::test]
    async fn test_build_error_is_not_cached() {
        let cache = cache_with(CacheParamCfg::default());
        let err = cache
            .get_or_build("*virt", "virt1", async {
                Err(EesError::Config("bad".to_string()))
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EesError::Config(_)));
        assert!(cache.get("*virt", "virt1").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_closes_exporters() {
        let cache = cache_with(CacheParamCfg::default());
        let closed = Arc::new(AtomicUsize::new(0));

        cache.set("*virt", "a", CountingExporter::new("a", closed.clone())).await.unwrap();
        cache.set("*virt", "b", CountingExporter::new("b", closed.clone())).await.unwrap();
        cache.clear().await;

        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(cache.get("*virt", "a").await.is_none());
    }

    #[tokio::test]
    async fn test_expiry_closes_exporter() {
        let cache = cache_with(CacheParamCfg {
            limit: -1,
            ttl_secs: 1,
            static_ttl: true,
        });
        let closed = Arc::new(AtomicUsize::new(0));
        cache.set("*virt", "a", CountingExporter::new("a", closed.clone())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        cache.run_pending_tasks().await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_limit_disables_caching() {
        let cache = cache_with(CacheParamCfg {
            limit: 0,
            ..CacheParamCfg::default()
        });
        assert!(!cache.has_bucket("*virt"));
        assert!(cache.get("*virt", "virt1").await.is_none());
    }

    #[tokio::test]
    async fn test_set_without_bucket_fails() {
        let cache = cache_with(CacheParamCfg::default());
        let closed = Arc::new(AtomicUsize::new(0));
        let result = cache.set("*http_post", "h", CountingExporter::new("h", closed)).await;
        assert!(matches!(result, Err(EesError::Internal(_))));
    }
}
