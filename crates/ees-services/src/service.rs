//! Event exporter service
//!
//! Matches incoming events against the configured exporters and dispatches
//! them:
//! - exporters run in configuration order; `*none` exporters are skipped
//! - a filter miss skips the exporter, a filter error aborts the call
//! - synchronous exporters are joined before replying, the others are
//!   detached on a background context
//! - a `blocker` exporter stops any further exporter from starting
//! - exhausted exports are queued in the failed-post cache

use ees_cache::{ExporterCache, FailedPostCache};
use ees_core::config::{EesConfig, EventExporterCfg};
use ees_core::consts::{EES_MODULE, META_ATTRIBUTES, META_EES, META_NONE, OPT_ATTRIBUTE_IDS, OPT_CONTEXT};
use ees_core::models::{value_to_string, CgrEvent, CgrEventWithEeIds, ExportReply, ResetMetricsArgs};
use ees_core::traits::{AttrArgs, AttributeService, FieldProjector, FilterService};
use ees_core::{EesError, EesResult, ExportContext, ExporterRef};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::constants;
use crate::exporters::{BrokerConnector, ExporterDeps, ExporterRegistry};
use crate::filters::InlineFilterS;
use crate::pipeline::export_event_with_exporter;
use crate::templates::{EventDataProvider, TemplateEngine};

/// Everything derived from one configuration version
///
/// Each call works on a clone taken under the read lock, so a concurrent
/// reload never changes the exporters of an event being dispatched.
#[derive(Clone)]
pub(crate) struct ServiceState {
    pub(crate) cfg: Arc<EesConfig>,
    pub(crate) filters: Arc<dyn FilterService>,
    pub(crate) projector: Arc<dyn FieldProjector>,
    pub(crate) deps: ExporterDeps,
    pub(crate) cache: ExporterCache,
}

/// Top-level dispatcher
pub struct EventExporterService {
    state: RwLock<ServiceState>,
    registry: ExporterRegistry,
    attributes: Option<Arc<dyn AttributeService>>,
    failed_posts: Arc<FailedPostCache>,
    custom_filters: Option<Arc<dyn FilterService>>,
    broker_connectors: HashMap<String, Arc<dyn BrokerConnector>>,
    metrics_reset: Mutex<CancellationToken>,
}

/// Builder for `EventExporterService`
pub struct EventExporterServiceBuilder {
    cfg: EesConfig,
    filters: Option<Arc<dyn FilterService>>,
    attributes: Option<Arc<dyn AttributeService>>,
    registry: ExporterRegistry,
    broker_connectors: HashMap<String, Arc<dyn BrokerConnector>>,
    failed_posts: Option<Arc<FailedPostCache>>,
}

impl EventExporterServiceBuilder {
    /// Replace the inline filter engine
    pub fn filters(mut self, filters: Arc<dyn FilterService>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn attributes(mut self, attributes: Arc<dyn AttributeService>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn registry(mut self, registry: ExporterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Transport of a broker exporter type (`*amqp_json_map`, `*nats_json_map`, ...)
    pub fn broker_connector(mut self, exporter_type: &str, connector: Arc<dyn BrokerConnector>) -> Self {
        self.broker_connectors.insert(exporter_type.to_string(), connector);
        self
    }

    /// Share an existing failed-post cache
    pub fn failed_posts(mut self, failed_posts: Arc<FailedPostCache>) -> Self {
        self.failed_posts = Some(failed_posts);
        self
    }

    pub fn build(self) -> Arc<EventExporterService> {
        let failed_posts = self.failed_posts.unwrap_or_else(|| {
            Arc::new(FailedPostCache::new(Duration::from_secs(self.cfg.failed_posts_ttl_secs)))
        });
        let state = EventExporterService::make_state(self.cfg, &self.filters, &self.broker_connectors);
        info!(
            "<EEs> service built with {} exporters",
            state.cfg.exporters.len()
        );

        Arc::new(EventExporterService {
            state: RwLock::new(state),
            registry: self.registry,
            attributes: self.attributes,
            failed_posts,
            custom_filters: self.filters,
            broker_connectors: self.broker_connectors,
            metrics_reset: Mutex::new(CancellationToken::new()),
        })
    }
}

impl EventExporterService {
    pub fn builder(cfg: EesConfig) -> EventExporterServiceBuilder {
        EventExporterServiceBuilder {
            cfg,
            filters: None,
            attributes: None,
            registry: ExporterRegistry::default(),
            broker_connectors: HashMap::new(),
            failed_posts: None,
        }
    }

    fn make_state(
        cfg: EesConfig,
        custom_filters: &Option<Arc<dyn FilterService>>,
        broker_connectors: &HashMap<String, Arc<dyn BrokerConnector>>,
    ) -> ServiceState {
        let filters: Arc<dyn FilterService> = match custom_filters {
            Some(filters) => Arc::clone(filters),
            None => Arc::new(InlineFilterS::new(cfg.filter_profiles.clone())),
        };
        let projector: Arc<dyn FieldProjector> = Arc::new(TemplateEngine::new(Arc::clone(&filters)));
        let deps = broker_connectors
            .iter()
            .fold(ExporterDeps::new(Arc::clone(&projector)), |deps, (tag, connector)| {
                deps.with_connector(tag, Arc::clone(connector))
            });
        let cache = ExporterCache::new(&cfg.cache);

        ServiceState {
            cfg: Arc::new(cfg),
            filters,
            projector,
            deps,
            cache,
        }
    }

    pub(crate) fn snapshot(&self) -> ServiceState {
        self.state.read().clone()
    }

    pub(crate) fn registry(&self) -> &ExporterRegistry {
        &self.registry
    }

    /// Current configuration
    pub fn config(&self) -> Arc<EesConfig> {
        Arc::clone(&self.state.read().cfg)
    }

    pub fn failed_posts(&self) -> &Arc<FailedPostCache> {
        &self.failed_posts
    }

    /// Cached exporters of the current configuration
    pub fn exporter_cache(&self) -> ExporterCache {
        self.state.read().cache.clone()
    }

    /// Export one event through every matching exporter
    ///
    /// The reply lists every exporter that was started, with its metrics
    /// when `*eesVerbose` is set. When any exporter failed, the reply is
    /// attached to a `PARTIALLY_EXECUTED` error.
    #[instrument(skip(self, ctx, args), fields(tenant = %args.event.tenant, event_id = %args.event.id))]
    pub async fn process_event(
        &self,
        ctx: &ExportContext,
        args: CgrEventWithEeIds,
    ) -> EesResult<ExportReply> {
        let state = self.snapshot();
        if !state.cfg.enabled {
            return Err(EesError::NotConnected(EES_MODULE.to_string()));
        }

        let exp_ids = args.requested_ids();
        let event = args.event;
        let verbose = event.verbose();
        let with_err = Arc::new(AtomicBool::new(false));
        let mut attempted: Vec<(String, ExporterRef)> = Vec::new();
        let mut sync_tasks = Vec::new();

        for exp_cfg in &state.cfg.exporters {
            if exp_cfg.exporter_type == META_NONE
                || (!exp_ids.is_empty() && !exp_ids.contains(&exp_cfg.id))
            {
                continue;
            }

            if !exp_cfg.filters.is_empty() {
                let dp = EventDataProvider::new(&event);
                if !state.filters.pass(&event.tenant, &exp_cfg.filters, &dp)? {
                    debug!("<EEs> exporter <{}> filtered out event <{}>", exp_cfg.id, event.id);
                    continue;
                }
            }

            let mut exp_event = event.clone();
            if exp_cfg.has_flag(META_ATTRIBUTES) {
                exp_event = self.process_attributes(exp_cfg, exp_event).await?;
            }

            let (exporter, one_time) = self.resolve_exporter(&state, exp_cfg).await?;
            attempted.push((exp_cfg.id.clone(), Arc::clone(&exporter)));

            // Detached exports must survive the caller going away
            let export_ctx = if exp_cfg.synchronous {
                ctx.clone()
            } else {
                ExportContext::background()
            };
            let projector = Arc::clone(&state.projector);
            let failed_posts = Arc::clone(&self.failed_posts);
            let with_err = Arc::clone(&with_err);
            let handle = tokio::spawn(async move {
                let result = export_event_with_exporter(
                    &export_ctx,
                    exporter.as_ref(),
                    &exp_event,
                    one_time,
                    projector.as_ref(),
                    Some(failed_posts.as_ref()),
                )
                .await;
                if let Err(e) = result {
                    error!(
                        "<EEs> exporter <{}> failed exporting event <{}>: {}",
                        exporter.cfg().id,
                        exp_event.id,
                        e
                    );
                    with_err.store(true, Ordering::SeqCst);
                }
            });
            if exp_cfg.synchronous {
                sync_tasks.push(handle);
            }

            if exp_cfg.blocker {
                debug!("<EEs> exporter <{}> is a blocker, stopping", exp_cfg.id);
                break;
            }
        }

        for joined in join_all(sync_tasks).await {
            if let Err(e) = joined {
                error!("<EEs> export task failed: {}", e);
                with_err.store(true, Ordering::SeqCst);
            }
        }

        let reply: ExportReply = attempted
            .iter()
            .map(|(id, exporter)| {
                let metrics = if verbose {
                    exporter.get_metrics().to_map()
                } else {
                    Map::new()
                };
                (id.clone(), metrics)
            })
            .collect();

        if with_err.load(Ordering::SeqCst) {
            return Err(EesError::PartiallyExecuted { reply: Some(reply) });
        }
        if reply.is_empty() {
            return Err(EesError::NotFound);
        }
        Ok(reply)
    }

    /// Cached exporter (built on a miss), or a one-shot one for types without a cache bucket
    async fn resolve_exporter(
        &self,
        state: &ServiceState,
        exp_cfg: &EventExporterCfg,
    ) -> EesResult<(ExporterRef, bool)> {
        if !state.cache.has_bucket(&exp_cfg.exporter_type) {
            let exporter = self.registry.build(exp_cfg.clone(), &state.deps)?;
            return Ok((exporter, true));
        }
        let exporter = state
            .cache
            .get_or_build(&exp_cfg.exporter_type, &exp_cfg.id, async {
                info!("<EEs> building exporter <{}> of type <{}>", exp_cfg.id, exp_cfg.exporter_type);
                self.registry.build(exp_cfg.clone(), &state.deps)
            })
            .await?;
        Ok((exporter, false))
    }

    /// Enrich the event through the attribute service
    ///
    /// A `NOT_FOUND` reply leaves the event untouched.
    async fn process_attributes(&self, exp_cfg: &EventExporterCfg, mut event: CgrEvent) -> EesResult<CgrEvent> {
        let attributes = self
            .attributes
            .as_ref()
            .ok_or_else(|| EesError::NotConnected("AttributeS".to_string()))?;

        let attribute_ids: Vec<String> = if exp_cfg.attribute_ids.is_empty() {
            match event.api_opts.get(OPT_ATTRIBUTE_IDS) {
                Some(Value::Array(ids)) => ids.iter().map(value_to_string).collect(),
                Some(Value::String(ids)) => ids.split(';').filter(|s| !s.is_empty()).map(String::from).collect(),
                _ => Vec::new(),
            }
        } else {
            exp_cfg.attribute_ids.clone()
        };
        let context = event
            .api_opts
            .get(OPT_CONTEXT)
            .map(value_to_string)
            .filter(|c| !c.is_empty())
            .or_else(|| Some(exp_cfg.attribute_context.clone()).filter(|c| !c.is_empty()))
            .unwrap_or_else(|| META_EES.to_string());

        event.api_opts.insert(OPT_ATTRIBUTE_IDS.to_string(), json!(attribute_ids));
        event.api_opts.insert(OPT_CONTEXT.to_string(), json!(context));

        let args = AttrArgs {
            event: event.clone(),
            attribute_ids,
            context,
        };
        match attributes.process_event(args).await {
            Ok(altered) => Ok(altered),
            Err(EesError::NotFound) => Ok(event),
            Err(e) => {
                warn!("<EEs> attribute processing for exporter <{}> failed: {}", exp_cfg.id, e);
                Err(e)
            }
        }
    }

    /// Reset the metrics of a cached exporter
    #[instrument(skip(self, args), fields(exporter = %args.id))]
    pub async fn reset_exporter_metrics(&self, args: &ResetMetricsArgs) -> EesResult<()> {
        let state = self.snapshot();
        let exp_cfg = state.cfg.exporter(&args.id).ok_or(EesError::NotFound)?;
        let exporter = state
            .cache
            .get(&exp_cfg.exporter_type, &exp_cfg.id)
            .await
            .ok_or(EesError::NotFound)?;
        exporter.metrics().reset();
        info!("<EEs> reset metrics of exporter <{}>", exp_cfg.id);
        Ok(())
    }

    /// Swap in a new configuration
    ///
    /// Cached exporters of the previous configuration are closed; a changed
    /// failed-post TTL replaces the failed-post cache.
    pub async fn reload(self: &Arc<Self>, cfg: EesConfig) {
        let new_state = Self::make_state(cfg, &self.custom_filters, &self.broker_connectors);
        let new_ttl = new_state.cfg.failed_posts_ttl_secs;
        let old = std::mem::replace(&mut *self.state.write(), new_state);

        old.cache.clear().await;
        if old.cfg.failed_posts_ttl_secs != new_ttl {
            self.failed_posts.set_ttl(Duration::from_secs(new_ttl)).await;
        }
        self.start_metrics_reset();
        info!("<EEs> configuration reloaded");
    }

    /// (Re)start the periodic metric resets of exporters with `metrics_reset_interval_secs`
    pub fn start_metrics_reset(self: &Arc<Self>) {
        let token = CancellationToken::new();
        std::mem::replace(&mut *self.metrics_reset.lock(), token.clone()).cancel();

        let state = self.snapshot();
        for exp_cfg in &state.cfg.exporters {
            let Some(secs) = exp_cfg.metrics_reset_interval_secs.filter(|s| *s > 0) else {
                continue;
            };
            let service = Arc::downgrade(self);
            let token = token.clone();
            let exporter_type = exp_cfg.exporter_type.clone();
            let id = exp_cfg.id.clone();

            tokio::spawn(async move {
                let period = Duration::from_secs(secs);
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let Some(service) = service.upgrade() else { break };
                            let cache = service.exporter_cache();
                            if let Some(exporter) = cache.get(&exporter_type, &id).await {
                                exporter.metrics().reset();
                                debug!("<EEs> periodic metrics reset of exporter <{}>", id);
                            }
                        }
                        _ = token.cancelled() => break,
                    }
                }
            });
        }
    }

    /// Run cache maintenance in the background until `shutdown` fires
    ///
    /// Expired exporters get closed and expired failed-post batches written to
    /// disk. The exporter cache is looked up on every tick so that reloads are
    /// followed.
    pub fn spawn_janitors(self: &Arc<Self>, shutdown: CancellationToken) {
        self.failed_posts.spawn_janitor(
            Duration::from_secs(constants::FAILED_POSTS_JANITOR_INTERVAL_SECS),
            shutdown.clone(),
        );

        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(constants::CACHE_JANITOR_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(service) = service.upgrade() else { break };
                        service.exporter_cache().run_pending_tasks().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Stop background tasks, close every cached exporter and persist failed posts
    pub async fn shutdown(&self) {
        self.metrics_reset.lock().cancel();
        let cache = self.exporter_cache();
        cache.clear().await;
        self.failed_posts.flush().await;
        info!("<EEs> service shut down");
    }
}
