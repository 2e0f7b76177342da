//! Dispatcher - Request Orchestration
//!
//! Ties the pieces together for one request:
//!
//! ```text
//! ExecutionContext ─► interceptors ─► breaker(provider) ─► service.send ─► processors
//!                                         │      ▲
//!                                         └──────┘ retry with backoff
//!                                           (retryable errors only)
//! ```
//!
//! Service handles are created lazily, one per provider, after the
//! provider's configuration passes the factory's validation. Each provider
//! gets one shared breaker from the [`CircuitBreakerRegistry`], named by the
//! provider's key.
//!
//! Routed requests ([`Dispatcher::execute_routed`]) leave the provider choice
//! to the dispatcher: the pinned current provider if it can serve the
//! request, then registered providers ranked by the
//! [`ProviderSelector`], falling back down the list on provider failures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{RetryConfig, SwitchboardConfig};
use crate::model::{AiRequest, AiResponse};
use crate::pipeline::{ExecutionContext, InterceptorError, ProcessorError, RequestPipeline};
use crate::provider::{
    AiService, ProviderConfig, ProviderKind, ProviderRegistry, RequiredCapabilities,
    ServiceCreationError, ServiceError,
};
use crate::resilience::{
    BreakerMetrics, CircuitBreaker, CircuitBreakerRegistry, CircuitOpenError, ExecutionError,
};
use crate::routing::{ProviderSelector, RoutingConfig, FAILED_PROVIDERS_ATTRIBUTE};

/// Buffer between the stream-processing task and the caller
const STREAM_BUFFER: usize = 64;

/// Context attribute holding the number of backend attempts (`u32`)
pub const ATTEMPTS_ATTRIBUTE: &str = "switchboard.attempts";

// ============================================================================
// Errors
// ============================================================================

/// Any failure along the dispatch path
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No factory is registered for the provider
    #[error("No factory registered for provider: {0}")]
    NotRegistered(ProviderKind),

    /// The provider's service could not be created
    #[error(transparent)]
    Creation(#[from] ServiceCreationError),

    /// An interceptor aborted the request
    #[error("Request rejected by interceptor: {0}")]
    Interceptor(#[from] InterceptorError),

    /// A processor failed on the response
    #[error("Response processing failed: {0}")]
    Processor(#[from] ProcessorError),

    /// The provider's breaker is open
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The backend call failed
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// No registered provider offers what a routed request needs
    #[error("No registered provider satisfies {0:?}")]
    NoSuitableProvider(RequiredCapabilities),
}

impl DispatchError {
    /// Whether the caller may retry the request later
    ///
    /// An open circuit counts as retryable once its reset timeout passes; the
    /// dispatcher itself never retries into an open circuit.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotRegistered(_) | Self::Creation(_) | Self::NoSuitableProvider(_) => false,
            Self::Interceptor(e) => e.is_retryable(),
            Self::Processor(e) => e.is_retryable(),
            Self::CircuitOpen(_) => true,
            Self::Service(e) => e.is_retryable(),
        }
    }

    /// Whether a routed request should move on to the next provider
    ///
    /// Only failures tied to the provider qualify; a rejected request or a
    /// failing processor would fail the same way anywhere.
    #[must_use]
    pub fn allows_fallback(&self) -> bool {
        match self {
            Self::NotRegistered(_) | Self::Creation(_) | Self::CircuitOpen(_) | Self::Service(_) => {
                true
            }
            Self::Interceptor(_) | Self::Processor(_) | Self::NoSuitableProvider(_) => false,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// A completed request
#[derive(Debug)]
pub struct Dispatched {
    /// Processed response
    pub response: AiResponse,

    /// Context the request ran under (timings, attributes)
    pub context: ExecutionContext,
}

/// A streaming request in flight
///
/// `responses` yields processed chunks and ends with the complete response.
/// A processor failure is delivered as the last item.
#[derive(Debug)]
pub struct DispatchStream {
    /// Processed chunks
    pub responses: mpsc::Receiver<Result<AiResponse, DispatchError>>,

    /// Context shared with the processing task
    pub context: Arc<ExecutionContext>,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes requests to provider services through the pipeline and breakers
pub struct Dispatcher {
    providers: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    pipeline: Arc<RequestPipeline>,
    provider_configs: HashMap<ProviderKind, ProviderConfig>,
    retry: RetryConfig,
    routing: RoutingConfig,
    selector: ProviderSelector,

    /// Provider routed requests try first
    current: RwLock<Option<ProviderKind>>,

    /// Lazily created service handles
    services: DashMap<ProviderKind, Arc<dyn AiService>>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty pipeline and default retry policy
    pub fn new(providers: Arc<ProviderRegistry>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            providers,
            breakers,
            pipeline: Arc::new(RequestPipeline::new()),
            provider_configs: HashMap::new(),
            retry: RetryConfig::default(),
            routing: RoutingConfig::default(),
            selector: ProviderSelector::default(),
            current: RwLock::new(None),
            services: DashMap::new(),
        }
    }

    /// Create a dispatcher from loaded configuration
    ///
    /// Builds a breaker registry whose default breaker configuration comes
    /// from `config.circuit_breaker`.
    pub fn from_config(providers: Arc<ProviderRegistry>, config: &SwitchboardConfig) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::with_config(
            config.circuit_breaker.clone(),
        ));
        Self {
            provider_configs: config.providers.clone(),
            retry: config.retry.clone(),
            ..Self::new(providers, breakers)
        }
        .with_routing(config.routing.clone())
    }

    /// Use a shared pipeline
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Arc<RequestPipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Set one provider's configuration
    #[must_use]
    pub fn with_provider_config(mut self, kind: ProviderKind, config: ProviderConfig) -> Self {
        self.provider_configs.insert(kind, config);
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the routing policy
    #[must_use]
    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.selector = ProviderSelector::new(routing.preferred_providers.iter().copied());
        self.routing = routing;
        self
    }

    /// The routing policy
    #[must_use]
    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    /// The request pipeline
    #[must_use]
    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    /// The breaker registry
    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Breaker guarding a provider
    #[must_use]
    pub fn breaker(&self, kind: ProviderKind) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create_default(kind.key())
    }

    /// Snapshot of every breaker
    #[must_use]
    pub fn breaker_metrics(&self) -> HashMap<String, BreakerMetrics> {
        self.breakers.all_metrics()
    }

    fn provider_config(&self, kind: ProviderKind) -> ProviderConfig {
        self.provider_configs.get(&kind).cloned().unwrap_or_default()
    }

    /// Get the provider's service, creating it on first use
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotRegistered`] if no factory serves `kind`
    /// - [`DispatchError::Creation`] if the provider is disabled, its
    ///   configuration fails validation, or the factory fails
    pub fn service(&self, kind: ProviderKind) -> Result<Arc<dyn AiService>, DispatchError> {
        if let Some(service) = self.services.get(&kind) {
            return Ok(Arc::clone(service.value()));
        }

        let factory = self
            .providers
            .factory(kind)
            .ok_or(DispatchError::NotRegistered(kind))?;
        let config = self.provider_config(kind);
        if !config.enabled {
            return Err(ServiceCreationError::Disabled(kind).into());
        }

        let validation = factory.validate_configuration(&config);
        for warning in &validation.warnings {
            tracing::warn!(provider = %kind, warning = %warning, "Provider configuration warning");
        }
        if !validation.is_valid() {
            return Err(ServiceCreationError::InvalidConfiguration {
                kind,
                errors: validation.errors,
            }
            .into());
        }

        let entry = self
            .services
            .entry(kind)
            .or_try_insert_with(|| factory.create_service(&config))?;
        tracing::info!(provider = %kind, service = entry.value().name(), "Service ready");
        Ok(Arc::clone(entry.value()))
    }

    /// Drop a cached service; the next request creates a fresh one
    pub fn evict_service(&self, kind: ProviderKind) -> bool {
        self.services.remove(&kind).is_some()
    }

    /// Providers with a cached service
    #[must_use]
    pub fn active_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.services.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }

    /// Pin the provider routed requests try first
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotRegistered`] if no factory serves `kind`.
    pub fn switch_provider(&self, kind: ProviderKind) -> Result<(), DispatchError> {
        if !self.providers.is_registered(kind) {
            return Err(DispatchError::NotRegistered(kind));
        }
        let previous = self.current.write().replace(kind);
        tracing::info!(from = ?previous, to = %kind, "Switched current provider");
        Ok(())
    }

    /// Unpin the current provider
    pub fn clear_current_provider(&self) -> Option<ProviderKind> {
        self.current.write().take()
    }

    /// The pinned provider, if any
    #[must_use]
    pub fn current_provider(&self) -> Option<ProviderKind> {
        *self.current.read()
    }

    /// Providers a routed request would try, in order
    ///
    /// The pinned provider leads when it is still registered and can serve
    /// the request; the rest follow the selector's ranking. Providers that
    /// lack a required capability never appear.
    #[must_use]
    pub fn select_providers(&self, request: &AiRequest) -> Vec<ProviderKind> {
        let required = request.required_capabilities();
        let infos = self.providers.provider_info();

        let mut ordered = Vec::with_capacity(infos.len());
        if let Some(current) = self.current_provider() {
            if infos
                .iter()
                .any(|info| info.kind == current && required.is_satisfied_by(&info.capabilities))
            {
                ordered.push(current);
            }
        }
        for candidate in self.selector.rank(&infos, &required) {
            if !ordered.contains(&candidate.kind) {
                ordered.push(candidate.kind);
            }
        }
        ordered
    }

    /// Run a request on the best available provider
    ///
    /// Provider failures move on to the next candidate while the fallback
    /// budget lasts. Providers that failed first are recorded on the
    /// context under [`FAILED_PROVIDERS_ATTRIBUTE`].
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NoSuitableProvider`] if no registered provider
    ///   offers the required capabilities
    /// - the first failure that does not allow fallback
    /// - the last provider failure once candidates or budget run out
    pub async fn execute_routed(&self, request: AiRequest) -> Result<Dispatched, DispatchError> {
        let (done, failed) = self
            .with_fallback(request, move |kind, request| self.execute(kind, request))
            .await?;
        if !failed.is_empty() {
            done.context.set_attribute(FAILED_PROVIDERS_ATTRIBUTE, failed);
        }
        Ok(done)
    }

    /// Start a streaming request on the best streaming-capable provider
    ///
    /// Fallback covers establishing the stream only; once chunks flow the
    /// provider is fixed.
    ///
    /// # Errors
    ///
    /// As [`Dispatcher::execute_routed`].
    pub async fn execute_streaming_routed(
        &self,
        request: AiRequest,
    ) -> Result<DispatchStream, DispatchError> {
        let (stream, failed) = self
            .with_fallback(request.with_stream(true), move |kind, request| {
                self.execute_streaming(kind, request)
            })
            .await?;
        if !failed.is_empty() {
            stream.context.set_attribute(FAILED_PROVIDERS_ATTRIBUTE, failed);
        }
        Ok(stream)
    }

    async fn with_fallback<T, F, Fut>(
        &self,
        request: AiRequest,
        mut call: F,
    ) -> Result<(T, Vec<ProviderKind>), DispatchError>
    where
        F: FnMut(ProviderKind, AiRequest) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let required = request.required_capabilities();
        let candidates = self.select_providers(&request);
        if candidates.is_empty() {
            return Err(DispatchError::NoSuitableProvider(required));
        }

        let mut failed = Vec::new();
        let mut last_error = DispatchError::NoSuitableProvider(required);
        for kind in candidates.into_iter().take(self.routing.attempt_budget()) {
            match call(kind, request.clone()).await {
                Ok(value) => return Ok((value, failed)),
                Err(e) if e.allows_fallback() => {
                    tracing::warn!(
                        request_id = %request.id,
                        provider = %kind,
                        error = %e,
                        "Routed provider failed"
                    );
                    failed.push(kind);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// Run a request to completion
    ///
    /// Retryable backend errors are retried with exponential backoff up to
    /// the policy's `max_retries`; an open circuit ends the attempt loop
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable failure, the last retryable one once
    /// retries are exhausted, or [`DispatchError::CircuitOpen`].
    pub async fn execute(
        &self,
        kind: ProviderKind,
        request: AiRequest,
    ) -> Result<Dispatched, DispatchError> {
        let context = ExecutionContext::with_request_id(request.id.clone(), kind);
        let request = self.pipeline.run_interceptors(request, &context).await?;
        let service = self.service(kind)?;
        let breaker = self.breaker(kind);
        let call_timeout = breaker.config().call_timeout;

        let mut attempt: u32 = 0;
        let response = loop {
            attempt += 1;
            context.mark_service_call_start();
            let outcome = breaker
                .execute_async(|| with_timeout(call_timeout, service.send(&request)))
                .await;
            context.mark_service_call_end();

            match outcome {
                Ok(response) => break response,
                Err(ExecutionError::CircuitOpen(e)) => {
                    tracing::debug!(request_id = context.request_id(), breaker = %e.name, "Circuit open, not calling provider");
                    return Err(e.into());
                }
                Err(ExecutionError::Failed(e)) => {
                    if !e.is_retryable() || attempt > self.retry.max_retries {
                        return Err(e.into());
                    }
                    let delay = self.retry_delay(attempt, &e);
                    tracing::warn!(
                        request_id = context.request_id(),
                        provider = %kind,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };
        context.set_attribute(ATTEMPTS_ATTRIBUTE, attempt);

        let response = self.pipeline.run_processors(response, &context).await?;
        Ok(Dispatched { response, context })
    }

    /// Start a streaming request
    ///
    /// The breaker guards establishing the stream; chunks then flow through
    /// the streaming-capable processors on a background task. Streams are
    /// not retried.
    ///
    /// # Errors
    ///
    /// Fails before any chunk is produced if an interceptor rejects the
    /// request, the service is unavailable, the circuit is open or the
    /// backend refuses the stream.
    pub async fn execute_streaming(
        &self,
        kind: ProviderKind,
        request: AiRequest,
    ) -> Result<DispatchStream, DispatchError> {
        let context = Arc::new(ExecutionContext::with_request_id(request.id.clone(), kind));
        let request = self
            .pipeline
            .run_interceptors(request.with_stream(true), &context)
            .await?;
        let service = self.service(kind)?;
        let breaker = self.breaker(kind);
        let call_timeout = breaker.config().call_timeout;

        context.mark_service_call_start();
        let mut upstream = breaker
            .execute_async(|| with_timeout(call_timeout, service.send_streaming(&request)))
            .await
            .map_err(|e| match e {
                ExecutionError::CircuitOpen(open) => DispatchError::from(open),
                ExecutionError::Failed(failed) => DispatchError::from(failed),
            })?;

        let (tx, responses) = mpsc::channel(STREAM_BUFFER);
        let pipeline = Arc::clone(&self.pipeline);
        let task_context = Arc::clone(&context);
        tokio::spawn(async move {
            while let Some(chunk) = upstream.recv().await {
                let item = pipeline
                    .run_processors(chunk, &task_context)
                    .await
                    .map_err(DispatchError::from);
                let failed = item.is_err();
                if tx.send(item).await.is_err() {
                    tracing::debug!(request_id = task_context.request_id(), "Stream receiver dropped");
                    break;
                }
                if failed {
                    break;
                }
            }
            // Stamped on every exit, before `tx` drops and the caller sees the end
            task_context.mark_service_call_end();
        });

        Ok(DispatchStream { responses, context })
    }

    /// Health-check every cached service concurrently
    pub async fn health_check_all(&self) -> HashMap<ProviderKind, bool> {
        let services: Vec<_> = self
            .services
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        let checks = services.into_iter().map(|(kind, service)| async move {
            let healthy = service.health_check().await;
            if !healthy {
                tracing::warn!(provider = %kind, "Provider health check failed");
            }
            (kind, healthy)
        });
        futures::future::join_all(checks).await.into_iter().collect()
    }

    fn retry_delay(&self, attempt: u32, error: &ServiceError) -> Duration {
        let mut delay = self.retry.backoff(attempt);
        if let ServiceError::RateLimited {
            retry_after_ms: Some(hint),
        } = error
        {
            delay = delay.max(Duration::from_millis(*hint));
        }
        if self.retry.use_jitter && !delay.is_zero() {
            let full = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            delay = Duration::from_millis(rand::thread_rng().gen_range(full / 2..=full));
        }
        delay
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("providers", &self.providers)
            .field("active", &self.active_providers())
            .field("retry", &self.retry)
            .field("routing", &self.routing)
            .field("current", &self.current_provider())
            .finish()
    }
}

async fn with_timeout<T>(
    limit: Duration,
    call: impl std::future::Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(ServiceError::Timeout))
}
