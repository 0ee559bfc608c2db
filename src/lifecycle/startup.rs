//! Startup orchestration.
//!
//! Builds every subsystem in dependency order (clock and stores, then the
//! registries, then the pipeline, queue and services), restores persisted
//! state, and owns the background loops until shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::Router;
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::cache::Cache;
use crate::clock::{self, SharedClock};
use crate::config::{ConfigWatcher, GatewayConfig};
use crate::credentials::{PoolRegistry, RolloverListener};
use crate::domain::{DefaultPolicy, DomainPolicy};
use crate::error::{GatewayError, GatewayResult};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::ports::{
    EventPublisher, EventStore, HttpTransport, JsonFileStateStore, MemoryStore, RequestRepository, StateRepository,
    Transport,
};
use crate::queue::QueueManager;
use crate::ratelimit::RateLimiterRegistry;
use crate::resilience::BreakerRegistry;
use crate::service::{ManagementService, Orchestrator, OrchestratorSettings, Pipeline, PipelineSettings, ResponseCache};

/// Optional overrides for the collaborators a gateway is built from.
///
/// Anything left unset comes from the configuration: the system clock, an
/// HTTP transport to the configured base URL, in-memory request and event
/// stores, and a JSON state file when one is configured.
#[derive(Default)]
pub struct GatewayBuilder {
    clock: Option<SharedClock>,
    transport: Option<Arc<dyn Transport>>,
    requests: Option<Arc<dyn RequestRepository>>,
    state: Option<Arc<dyn StateRepository>>,
    events: Option<Arc<dyn EventStore>>,
    policy: Option<Arc<dyn DomainPolicy>>,
}

impl GatewayBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn requests(mut self, requests: Arc<dyn RequestRepository>) -> Self {
        self.requests = Some(requests);
        self
    }

    pub fn state(mut self, state: Arc<dyn StateRepository>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn DomainPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub async fn build(self, config: GatewayConfig) -> GatewayResult<Gateway> {
        let clock = self.clock.unwrap_or_else(clock::system);
        let memory = Arc::new(MemoryStore::new());

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => {
                let upstream = &config.upstream;
                let http = HttpTransport::new(&upstream.base_url, upstream.timeout())
                    .map_err(|e| GatewayError::Configuration(e.to_string()))?
                    .with_retries(
                        upstream.transport_attempts,
                        upstream.transport_base_delay_ms,
                        upstream.transport_max_delay_ms,
                    );
                Arc::new(http)
            }
        };
        let requests = self.requests.unwrap_or_else(|| memory.clone() as Arc<dyn RequestRepository>);
        let events = self.events.unwrap_or_else(|| memory.clone() as Arc<dyn EventStore>);
        let state: Arc<dyn StateRepository> = match (self.state, &config.persistence.state_file) {
            (Some(state), _) => state,
            (None, Some(path)) => Arc::new(JsonFileStateStore::open(path).await?),
            (None, None) => memory.clone(),
        };
        let policy = self.policy.unwrap_or_else(|| Arc::new(DefaultPolicy));
        let publisher = EventPublisher::new(events);

        let pools = Arc::new(PoolRegistry::new(
            config.pool.default_strategy,
            config.quota.rollover(),
            Arc::clone(&clock),
        ));
        let breakers = Arc::new(BreakerRegistry::new(
            config.circuit_breaker.breaker_config(),
            Arc::clone(&clock),
        ));
        let limiters = Arc::new(RateLimiterRegistry::new(
            config.rate_limit.tier_defaults(config.quota.default_daily_limit),
            Arc::clone(&clock),
        ));
        pools.set_rollover_listener(Arc::clone(&limiters) as Arc<dyn RolloverListener>);
        let cache: Arc<ResponseCache> = Arc::new(Cache::new(config.cache.cache_config(), Arc::clone(&clock)));

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&cache),
            Arc::clone(&breakers),
            Arc::clone(&pools),
            Arc::clone(&limiters),
            transport,
            publisher.clone(),
            Arc::clone(&policy),
            Arc::clone(&clock),
            pipeline_settings(&config),
        ));
        let queue = Arc::new(QueueManager::new(
            Arc::clone(&pipeline),
            Arc::clone(&requests),
            config.queue.settings(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&pipeline),
            Arc::clone(&queue),
            requests,
            orchestrator_settings(&config),
        ));
        let management = Arc::new(ManagementService::new(
            Arc::clone(&pools),
            Arc::clone(&breakers),
            Arc::clone(&limiters),
            Arc::clone(&cache),
            state,
            publisher.clone(),
            policy,
            clock,
            config.quota.default_daily_limit,
        ));

        management.restore_all().await?;
        for name in &config.circuit_breaker.default_breakers {
            breakers.get_or_create(name);
        }

        tracing::info!(
            pools = pools.len(),
            breakers = breakers.len(),
            workers = config.queue.workers,
            "Gateway initialized"
        );

        Ok(Gateway {
            config: Arc::new(ArcSwap::from_pointee(config)),
            pools,
            breakers,
            limiters,
            cache,
            queue,
            orchestrator,
            management,
            events: publisher,
            shutdown: Shutdown::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

fn pipeline_settings(config: &GatewayConfig) -> PipelineSettings {
    PipelineSettings {
        upstream_timeout: config.upstream.timeout(),
        cache_enabled: config.cache.enabled,
        credential_window: Duration::from_secs(config.rate_limit.credential_window_secs),
    }
}

fn orchestrator_settings(config: &GatewayConfig) -> OrchestratorSettings {
    OrchestratorSettings {
        retry_delay: config.upstream.retry_delay(),
        retry_ceiling: config.upstream.retry_ceiling(),
        max_retries: config.upstream.max_retries,
        bulk_max_items: config.bulk.max_items,
        bulk_throttle: Duration::from_millis(config.bulk.throttle_ms),
    }
}

/// The assembled gateway: services for the routers plus the background loops.
pub struct Gateway {
    config: Arc<ArcSwap<GatewayConfig>>,
    pools: Arc<PoolRegistry>,
    breakers: Arc<BreakerRegistry>,
    limiters: Arc<RateLimiterRegistry>,
    cache: Arc<ResponseCache>,
    queue: Arc<QueueManager>,
    orchestrator: Arc<Orchestrator>,
    management: Arc<ManagementService>,
    events: EventPublisher,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn management(&self) -> &Arc<ManagementService> {
        &self.management
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    /// State for the admin router; shares the live configuration.
    pub fn admin_state(&self) -> AdminState {
        AdminState {
            management: Arc::clone(&self.management),
            queue: Arc::clone(&self.queue),
            config: Arc::clone(&self.config),
        }
    }

    pub fn query_router(&self) -> Router {
        let config = self.config.load();
        HttpServer::build_router(
            &config.server,
            AppState {
                orchestrator: Arc::clone(&self.orchestrator),
            },
        )
    }

    pub fn admin_router(&self) -> Router {
        setup_admin_router(self.admin_state())
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Start the queue workers and every maintenance loop.
    pub async fn start(&self) -> GatewayResult<()> {
        let reloaded = self.queue.start().await?;
        let config = self.config.load_full();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(Arc::clone(&self.cache).run_sweeper(
            Duration::from_secs(config.cache.sweep_interval_secs),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(Arc::clone(&self.limiters).run_cleanup(
            Duration::from_secs(config.rate_limit.cleanup_interval_secs),
            Duration::from_secs(config.rate_limit.idle_ttl_secs),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(Arc::clone(&self.breakers).run_health_check(
            Duration::from_secs(config.circuit_breaker.health_check_interval_secs),
            self.shutdown.subscribe(),
        )));

        tasks.push(tokio::spawn(Arc::clone(&self.pools).run_quota_sweep(
            Duration::from_secs(config.quota.sweep_interval_secs),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(Arc::clone(&self.queue).run_maintenance(
            Duration::from_secs(config.queue.retry_sweep_interval_secs),
            Duration::from_secs(config.queue.retention_secs),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(Arc::clone(&self.management).run_snapshots(
            Duration::from_secs(config.persistence.snapshot_interval_secs),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(
            self.events
                .clone()
                .run_transition_forwarder(self.breakers.subscribe(), self.shutdown.subscribe()),
        ));

        tracing::info!(reloaded, loops = tasks.len(), "Gateway started");
        self.tasks.lock().extend(tasks);
        Ok(())
    }

    /// Swap in a new configuration and re-apply the settings that can change
    /// at runtime. Listener addresses, worker count and queue capacities
    /// need a restart.
    pub fn apply_config(&self, config: GatewayConfig) {
        self.limiters
            .update_defaults(config.rate_limit.tier_defaults(config.quota.default_daily_limit));
        if let Err(e) = self.breakers.update_default_config(config.circuit_breaker.breaker_config()) {
            tracing::error!(error = %e, "Rejected circuit breaker settings from reloaded config");
        }
        self.cache.update_config(config.cache.cache_config());
        self.config.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
    }

    /// Watch `path` and apply every valid change. Keep the returned watcher alive.
    pub fn watch_config(self: &Arc<Self>, path: &Path) -> Result<RecommendedWatcher, notify::Error> {
        let (watcher, mut updates) = ConfigWatcher::new(path);
        let watcher = watcher.run()?;
        let gateway = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(config) => gateway.apply_config(config),
                        None => break,
                    },
                    _ = shutdown.recv() => {
                        tracing::info!("Config reload loop received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        });
        Ok(watcher)
    }

    /// Stop workers after their in-flight item, stop the loops, and write
    /// a final state snapshot.
    pub async fn shutdown(&self) {
        tracing::info!("Gateway shutting down");
        self.shutdown.trigger();
        self.queue.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        if let Err(e) = self.management.persist_all().await {
            tracing::error!(error = %e, "Failed to persist state on shutdown");
        }
        tracing::info!("Gateway stopped");
    }
}
