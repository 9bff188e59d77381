//! Integration tests for the export retry runner

mod common;

#[cfg(test)]
mod tests {
    use super::common::{scripted, Probe, Probes, ScriptedExporter};
    use ees_cache::{keys, FailedPostCache};
    use ees_core::consts::EES_MODULE;
    use ees_core::models::ExportPayload;
    use ees_core::{EesError, ExportContext};
    use ees_services::export_with_attempts;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn payload() -> ExportPayload {
        ExportPayload::Value(json!({"Account": "1001"}))
    }

    #[tokio::test]
    async fn test_exhausted_attempts_queue_one_failed_post() {
        let dir = TempDir::new().unwrap();
        let probes = Probes::default();
        let mut cfg = scripted("fail3");
        cfg.attempts = 3;
        cfg.export_path = "scripted://sink".to_string();
        cfg.failed_posts_dir = dir.path().to_string_lossy().to_string();
        cfg.opts = cfg.opts.with("failExport", true);
        let exporter = ScriptedExporter::new(cfg.clone(), probes.clone());
        let failed_posts = FailedPostCache::new(Duration::from_secs(60));

        let err = export_with_attempts(
            &ExportContext::background(),
            &exporter,
            &payload(),
            None,
            Some(&failed_posts),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EesError::Export(_)));
        let probe = probes.probe("fail3");
        assert_eq!(Probe::get(&probe.exports), 3);
        assert_eq!(Probe::get(&probe.connects), 3);

        let key = keys::failed_post_key(
            &cfg.failed_posts_dir,
            &cfg.export_path,
            &cfg.exporter_type,
            EES_MODULE,
            &cfg.opts,
        );
        let queued = failed_posts.get(&key).await.unwrap();
        assert_eq!(queued.events, vec![payload()]);
        assert_eq!(failed_posts.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failures_then_success() {
        let dir = TempDir::new().unwrap();
        let probes = Probes::default();
        let mut cfg = scripted("flaky");
        cfg.attempts = 3;
        cfg.failed_posts_dir = dir.path().to_string_lossy().to_string();
        cfg.opts = cfg.opts.with("connectFailures", 2);
        let exporter = ScriptedExporter::new(cfg, probes.clone());
        let failed_posts = FailedPostCache::new(Duration::from_secs(60));

        export_with_attempts(
            &ExportContext::background(),
            &exporter,
            &payload(),
            None,
            Some(&failed_posts),
        )
        .await
        .unwrap();

        let probe = probes.probe("flaky");
        assert_eq!(Probe::get(&probe.connects), 3);
        assert_eq!(Probe::get(&probe.exports), 1);
        assert!(failed_posts.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_failed_posts_are_not_queued() {
        let probes = Probes::default();
        let mut cfg = scripted("nofp");
        cfg.attempts = 2;
        cfg.opts = cfg.opts.with("failExport", true);
        let exporter = ScriptedExporter::new(cfg, probes.clone());
        let failed_posts = FailedPostCache::new(Duration::from_secs(60));

        assert!(export_with_attempts(
            &ExportContext::background(),
            &exporter,
            &payload(),
            None,
            Some(&failed_posts),
        )
        .await
        .is_err());
        assert_eq!(Probe::get(&probes.probe("nofp").exports), 2);
        assert!(failed_posts.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_attempts() {
        let probes = Probes::default();
        let mut cfg = scripted("cancelled");
        cfg.attempts = 5;
        let exporter = ScriptedExporter::new(cfg, probes.clone());

        let ctx = ExportContext::background();
        ctx.cancel();
        let err = export_with_attempts(&ctx, &exporter, &payload(), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, EesError::Cancelled));
        assert_eq!(Probe::get(&probes.probe("cancelled").connects), 0);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let probes = Probes::default();
        let mut cfg = scripted("zero");
        cfg.attempts = 0;
        let exporter = ScriptedExporter::new(cfg, probes.clone());

        export_with_attempts(&ExportContext::background(), &exporter, &payload(), None, None)
            .await
            .unwrap();
        assert_eq!(Probe::get(&probes.probe("zero").exports), 1);
    }
}
