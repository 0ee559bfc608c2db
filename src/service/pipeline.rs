//! Admission and execution shared by the synchronous orchestrator and the
//! queue workers.
//!
//! One pass is: breaker check → credential selection → compound rate limit
//! (with a single alternative credential on denial) → upstream call under the
//! breaker and a deadline → quota debit and cache fill. Retry policy is left
//! to the caller.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::cache::{Cache, CacheTags};
use crate::clock::{elapsed, SharedClock};
use crate::credentials::{CredentialPool, PoolRegistry, SharedCredential};
use crate::domain::{DataJudRequest, DataJudResponse, DomainEvent, DomainPolicy, EventKind};
use crate::error::{GatewayError, GatewayResult};
use crate::ports::{CallCredential, EventPublisher, Transport, TransportError, UpstreamCall};
use crate::ratelimit::{RateLimitDenial, RateLimiterRegistry, TierLimit};
use crate::resilience::timeouts::with_deadline;
use crate::resilience::BreakerRegistry;

pub type ResponseCache = Cache<DataJudResponse>;

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Deadline for one upstream call.
    pub upstream_timeout: Duration,
    pub cache_enabled: bool,
    /// Credential-tier window; the limit is the credential's daily limit.
    pub credential_window: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(30),
            cache_enabled: true,
            credential_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// A cache hit that passed the freshness policy.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: DataJudResponse,
    pub cached_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug)]
pub struct Pipeline {
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) breakers: Arc<BreakerRegistry>,
    pub(crate) pools: Arc<PoolRegistry>,
    pub(crate) limiters: Arc<RateLimiterRegistry>,
    transport: Arc<dyn Transport>,
    events: EventPublisher,
    policy: Arc<dyn DomainPolicy>,
    clock: SharedClock,
    settings: PipelineSettings,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<ResponseCache>,
        breakers: Arc<BreakerRegistry>,
        pools: Arc<PoolRegistry>,
        limiters: Arc<RateLimiterRegistry>,
        transport: Arc<dyn Transport>,
        events: EventPublisher,
        policy: Arc<dyn DomainPolicy>,
        clock: SharedClock,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            cache,
            breakers,
            pools,
            limiters,
            transport,
            events,
            policy,
            clock,
            settings,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn policy(&self) -> &Arc<dyn DomainPolicy> {
        &self.policy
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Serve from cache when enabled for the request and still fresh for its type.
    pub async fn lookup_cache(&self, request: &DataJudRequest) -> Option<CacheHit> {
        if !request.use_cache || !self.settings.cache_enabled {
            return None;
        }
        let now = self.clock.now();
        let hit = self.cache.get(&request.cache_key).filter(|cached| {
            self.policy
                .should_use_cache(request.request_type, elapsed(cached.created_at, now))
        });

        match hit {
            Some(cached) => {
                tracing::debug!(request_id = %request.id, key = %request.cache_key, "Cache hit");
                self.events
                    .publish(
                        DomainEvent::new(EventKind::CacheHit, request.cache_key.clone(), now)
                            .with("request_id", request.id.to_string())
                            .with("hits", cached.hits),
                    )
                    .await;
                let mut response = cached.value;
                response.from_cache = true;
                response.request_id = request.id;
                Some(CacheHit {
                    response,
                    cached_at: cached.created_at,
                })
            }
            None => {
                self.events
                    .publish(
                        DomainEvent::new(EventKind::CacheMiss, request.cache_key.clone(), now)
                            .with("request_id", request.id.to_string()),
                    )
                    .await;
                None
            }
        }
    }

    /// One admission and execution pass. Transport failures come back as
    /// [`GatewayError::Execution`]; admission denials as their own variants.
    pub async fn execute(&self, request: &mut DataJudRequest) -> GatewayResult<DataJudResponse> {
        let breaker_key = DataJudRequest::breaker_key_for(&request.court_id);
        let breaker = self.breakers.get_or_create(&breaker_key);
        if !breaker.can_execute() {
            tracing::warn!(request_id = %request.id, breaker = %breaker_key, "Circuit breaker open, call not attempted");
            return Err(GatewayError::CircuitOpen {
                breaker: breaker_key,
                retry_at: breaker.retry_at(),
            });
        }

        let pool = self.pools.require(request.tenant_id)?;
        let credential = self.admit(&pool, request).await?;
        let call_credential = {
            let c = credential.lock();
            CallCredential {
                id: c.id,
                external_id: c.external_id.clone(),
                secret: c.secret.clone(),
            }
        };
        let credential_id = call_credential.id;
        request.assign(credential_id, breaker_key.clone());
        self.events
            .publish(DomainEvent::request_started(request.id, credential_id, self.clock.now()))
            .await;

        let call = UpstreamCall::for_request(request, call_credential);
        let timeout = self.settings.upstream_timeout;
        let transport = Arc::clone(&self.transport);
        tracing::debug!(
            request_id = %request.id,
            credential_id = %credential_id,
            endpoint = %call.endpoint,
            "Executing upstream call"
        );
        let result = breaker
            .execute_classified(TransportError::counts_against_breaker, || async move {
                with_deadline(timeout, transport.execute(call)).await
            })
            .await;

        let upstream = match result.outcome {
            None => {
                return Err(GatewayError::CircuitOpen {
                    breaker: breaker_key,
                    retry_at: result.retry_at,
                })
            }
            Some(Err(e)) => {
                tracing::warn!(request_id = %request.id, breaker = %breaker_key, error = %e, "Upstream call failed");
                return Err(GatewayError::Execution(e));
            }
            Some(Ok(upstream)) => upstream,
        };

        if let Err(e) = pool.use_quota(credential_id, 1) {
            tracing::warn!(credential_id = %credential_id, error = %e, "Quota debit failed after a completed call");
        }

        let now = self.clock.now();
        let response = DataJudResponse {
            id: Uuid::new_v4(),
            request_id: request.id,
            status_code: upstream.status,
            data: upstream.body,
            size: upstream.size as usize,
            duration_ms: upstream.duration.as_millis() as u64,
            from_cache: false,
            received_at: now,
        };
        self.store(request, &response).await;
        Ok(response)
    }

    /// Select a credential and pass the compound limit, trying one other
    /// credential if the first is denied.
    async fn admit(&self, pool: &CredentialPool, request: &DataJudRequest) -> GatewayResult<SharedCredential> {
        let first = pool.next_credential()?;
        let denial = match self.check_limits(&first, request.tenant_id) {
            Ok(()) => return Ok(first),
            Err(denial) => denial,
        };
        self.publish_denial(request, &denial).await;

        let first_id = first.lock().id;
        match pool.next_credential_excluding(&[first_id]) {
            Ok(alternative) => {
                tracing::debug!(
                    request_id = %request.id,
                    credential_id = %alternative.lock().id,
                    "Trying alternative credential after rate limit denial"
                );
                match self.check_limits(&alternative, request.tenant_id) {
                    Ok(()) => Ok(alternative),
                    Err(second) => {
                        self.publish_denial(request, &second).await;
                        Err(GatewayError::RateLimited(denial))
                    }
                }
            }
            Err(_) => Err(GatewayError::RateLimited(denial)),
        }
    }

    fn check_limits(&self, credential: &SharedCredential, tenant_id: Uuid) -> Result<(), RateLimitDenial> {
        let (key, daily_limit) = {
            let c = credential.lock();
            (c.id.to_string(), c.daily_limit)
        };
        let limit = TierLimit::new(self.settings.credential_window, daily_limit);
        self.limiters
            .check_allowance(&key, Some(limit), &tenant_id.to_string())
            .map(|_| ())
    }

    async fn publish_denial(&self, request: &DataJudRequest, denial: &RateLimitDenial) {
        tracing::warn!(
            request_id = %request.id,
            tenant_id = %request.tenant_id,
            tier = %denial.tier,
            key = %denial.key,
            "Rate limit denied request"
        );
        self.events
            .publish(
                DomainEvent::new(EventKind::RateLimitExceeded, denial.key.clone(), self.clock.now())
                    .with("tier", denial.tier.as_str())
                    .with("used", denial.used)
                    .with("limit", denial.limit)
                    .with("reset_at", denial.reset_at.to_rfc3339())
                    .with("request_id", request.id.to_string()),
            )
            .await;
    }

    async fn store(&self, request: &DataJudRequest, response: &DataJudResponse) {
        if !request.use_cache || !self.settings.cache_enabled {
            return;
        }
        let tags = CacheTags::for_request(
            request.tenant_id,
            request.request_type,
            &request.process_number,
            &request.court_id,
        );
        match self
            .cache
            .set(&request.cache_key, response.clone(), Some(request.cache_ttl), tags)
        {
            Ok(()) => {
                self.events
                    .publish(
                        DomainEvent::new(EventKind::CacheStored, request.cache_key.clone(), self.clock.now())
                            .with("request_id", request.id.to_string())
                            .with("size", response.size)
                            .with("ttl_secs", request.cache_ttl.as_secs()),
                    )
                    .await;
            }
            Err(e) => tracing::warn!(request_id = %request.id, error = %e, "Response not cached"),
        }
    }
}
