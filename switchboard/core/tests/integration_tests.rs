//! End-to-end tests: registry, pipeline and dispatcher working together
//!
//! Uses a scripted in-memory backend in place of a real provider.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use switchboard_core::config::load_config_with_env;
use switchboard_core::routing::FAILED_PROVIDERS_ATTRIBUTE;
use switchboard_core::{
    AiRequest, AiResponse, AiService, CircuitBreakerRegistry, CircuitState, DispatchError,
    Dispatcher, ExecutionContext, InterceptorError, ProcessorError, ProviderConfig, ProviderInfo,
    ProviderKind, ProviderRegistry, RegistrationError, RequestInterceptor, RequestPipeline,
    ResponseProcessor, RetryConfig, ServiceCreationError, ServiceError, ServiceFactory,
    ValidationResult,
};

// =============================================================================
// Scripted Backend
// =============================================================================

/// Replays a script of outcomes, then succeeds
struct ScriptedService {
    script: Mutex<VecDeque<Result<String, ServiceError>>>,
    calls: AtomicUsize,
}

impl ScriptedService {
    fn new(script: Vec<Result<String, ServiceError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiService for ScriptedService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: &AiRequest) -> Result<AiResponse, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("reply to {}", request.prompt)));
        next.map(|content| AiResponse::complete(&request.id, content))
    }

    async fn send_streaming(
        &self,
        request: &AiRequest,
    ) -> Result<mpsc::Receiver<AiResponse>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(8);
        let id = request.id.clone();
        tokio::spawn(async move {
            for word in ["one ", "two ", "three"] {
                let _ = tx.send(AiResponse::chunk(&id, word)).await;
            }
            let _ = tx.send(AiResponse::complete(&id, "one two three")).await;
        });
        Ok(rx)
    }
}

/// Factory that requires an API key
struct KeyedFactory {
    kind: ProviderKind,
    service: Arc<ScriptedService>,
}

impl ServiceFactory for KeyedFactory {
    fn provider_kind(&self) -> ProviderKind {
        self.kind
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo::new(self.kind, self.kind.display_name(), "scripted backend")
    }

    fn requires_network_access(&self) -> bool {
        true
    }

    fn validate_configuration(&self, config: &ProviderConfig) -> ValidationResult {
        let mut result = ValidationResult::ok();
        if !config.has_api_key() {
            result.add_error("API key is required");
        }
        if config.base_url.is_none() {
            result.add_warning("using default base URL");
        }
        result
    }

    fn create_service(
        &self,
        _config: &ProviderConfig,
    ) -> Result<Arc<dyn AiService>, ServiceCreationError> {
        Ok(Arc::clone(&self.service) as Arc<dyn AiService>)
    }
}

fn keyed(kind: ProviderKind, service: &Arc<ScriptedService>) -> Arc<dyn ServiceFactory> {
    Arc::new(KeyedFactory {
        kind,
        service: Arc::clone(service),
    })
}

fn with_key() -> ProviderConfig {
    ProviderConfig::default().with_api_key("test-key")
}

// =============================================================================
// Pipeline Stages
// =============================================================================

/// Records the order stages ran in
struct Recorder {
    name: &'static str,
    priority: i32,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl RequestInterceptor for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn intercept(
        &self,
        request: AiRequest,
        _ctx: &ExecutionContext,
    ) -> Result<AiRequest, InterceptorError> {
        self.log.lock().push(format!("intercept:{}", self.name));
        Ok(request)
    }
}

#[async_trait]
impl ResponseProcessor for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn process(
        &self,
        response: AiResponse,
        ctx: &ExecutionContext,
    ) -> Result<AiResponse, ProcessorError> {
        self.log.lock().push(format!("process:{}", self.name));
        ctx.set_attribute(format!("processed_by_{}", self.name), true);
        Ok(response)
    }
}

/// Counts streamed chunks in a context attribute
struct ChunkCounter;

#[async_trait]
impl ResponseProcessor for ChunkCounter {
    fn name(&self) -> &str {
        "chunk-counter"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn process(
        &self,
        response: AiResponse,
        ctx: &ExecutionContext,
    ) -> Result<AiResponse, ProcessorError> {
        let seen = ctx.attribute_as::<usize>("chunks").map_or(0, |n| *n);
        ctx.set_attribute("chunks", seen + 1);
        Ok(response)
    }
}

// =============================================================================
// Provider Registry
// =============================================================================

#[test]
fn test_registry_one_factory_per_kind() {
    let registry = ProviderRegistry::new();
    let service = ScriptedService::new(vec![]);

    registry.register(ProviderKind::Google, keyed(ProviderKind::Google, &service)).unwrap();
    assert_eq!(
        registry.register(ProviderKind::Google, keyed(ProviderKind::Google, &service)),
        Err(RegistrationError::AlreadyRegistered(ProviderKind::Google))
    );
    assert_eq!(
        registry.register(ProviderKind::Cohere, keyed(ProviderKind::Kimi, &service)),
        Err(RegistrationError::KindMismatch {
            expected: ProviderKind::Cohere,
            actual: ProviderKind::Kimi,
        })
    );

    registry.unregister(ProviderKind::Google);
    registry.register(ProviderKind::Google, keyed(ProviderKind::Google, &service)).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.network_required_factories().len(), 1);
    assert!(registry.offline_factories().is_empty());
    assert_eq!(
        registry.provider_info_for(ProviderKind::Google).unwrap().description,
        "scripted backend"
    );
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_stage_ordering_around_backend() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let service = ScriptedService::new(vec![]);
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(ProviderKind::Google, keyed(ProviderKind::Google, &service)).unwrap();

    let pipeline = Arc::new(RequestPipeline::new());
    for (name, priority) in [("late", 200), ("early", 10), ("default", 100)] {
        let stage = Arc::new(Recorder {
            name,
            priority,
            log: Arc::clone(&log),
        });
        pipeline.add_interceptor(stage.clone());
        pipeline.add_processor(stage);
    }

    let dispatcher = Dispatcher::new(providers, Arc::new(CircuitBreakerRegistry::new()))
        .with_pipeline(pipeline)
        .with_provider_config(ProviderKind::Google, with_key());

    let done = dispatcher
        .execute(ProviderKind::Google, AiRequest::new("ping", "m"))
        .await
        .unwrap();

    assert_eq!(done.response.content, "reply to ping");
    assert_eq!(
        *log.lock(),
        vec![
            "intercept:early",
            "intercept:default",
            "intercept:late",
            "process:early",
            "process:default",
            "process:late",
        ]
    );
    assert!(done.context.has_attribute("processed_by_late"));
}

#[tokio::test]
async fn test_missing_api_key_blocks_creation() {
    let service = ScriptedService::new(vec![]);
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(ProviderKind::Alibaba, keyed(ProviderKind::Alibaba, &service)).unwrap();
    let dispatcher = Dispatcher::new(providers, Arc::new(CircuitBreakerRegistry::new()));

    let err = dispatcher
        .execute(ProviderKind::Alibaba, AiRequest::new("x", "m"))
        .await
        .unwrap_err();

    match err {
        DispatchError::Creation(ServiceCreationError::InvalidConfiguration { kind, errors }) => {
            assert_eq!(kind, ProviderKind::Alibaba);
            assert_eq!(errors, vec!["API key is required".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(service.calls(), 0);
}

#[tokio::test]
async fn test_breaker_recovers_after_reset_timeout() {
    let service = ScriptedService::new(vec![
        Err(ServiceError::RequestFailed("500".into())),
        Err(ServiceError::RequestFailed("500".into())),
    ]);
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(ProviderKind::Kimi, keyed(ProviderKind::Kimi, &service)).unwrap();

    let breakers = Arc::new(CircuitBreakerRegistry::with_config(
        switchboard_core::CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_reset_timeout(Duration::from_millis(50)),
    ));
    let dispatcher = Dispatcher::new(providers, Arc::clone(&breakers))
        .with_provider_config(ProviderKind::Kimi, with_key())
        .with_retry(RetryConfig::disabled());

    for _ in 0..2 {
        assert!(dispatcher
            .execute(ProviderKind::Kimi, AiRequest::new("x", "m"))
            .await
            .is_err());
    }
    assert_eq!(breakers.get("kimi").unwrap().state(), CircuitState::Open);

    let rejected = dispatcher
        .execute(ProviderKind::Kimi, AiRequest::new("x", "m"))
        .await
        .unwrap_err();
    assert!(matches!(rejected, DispatchError::CircuitOpen(_)));
    assert!(rejected.is_retryable());

    tokio::time::sleep(Duration::from_millis(80)).await;
    let done = dispatcher
        .execute(ProviderKind::Kimi, AiRequest::new("again", "m"))
        .await
        .unwrap();

    assert_eq!(done.response.content, "reply to again");
    let metrics = breakers.get("kimi").unwrap().metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!((metrics.failure_count, metrics.success_count), (0, 0));
    assert_eq!(service.calls(), 3);
}

#[tokio::test]
async fn test_streaming_through_dispatcher() {
    let service = ScriptedService::new(vec![]);
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(ProviderKind::Cloudflare, keyed(ProviderKind::Cloudflare, &service)).unwrap();

    let dispatcher = Dispatcher::new(providers, Arc::new(CircuitBreakerRegistry::new()))
        .with_provider_config(ProviderKind::Cloudflare, with_key());
    dispatcher.pipeline().add_processor(Arc::new(ChunkCounter));

    let mut stream = dispatcher
        .execute_streaming(ProviderKind::Cloudflare, AiRequest::new("count", "m"))
        .await
        .unwrap();

    let mut partial = 0;
    let mut last = None;
    while let Some(item) = stream.responses.recv().await {
        let response = item.unwrap();
        if response.is_partial() {
            partial += 1;
        } else {
            last = Some(response.content);
        }
    }

    assert_eq!(partial, 3);
    assert_eq!(last.as_deref(), Some("one two three"));
    assert_eq!(stream.context.attribute_as::<usize>("chunks").as_deref(), Some(&4));
}

#[tokio::test]
async fn test_dispatcher_from_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[circuit_breaker]
failure_threshold = 1
reset_timeout_ms = 60000

[retry]
max_retries = 0

[providers.deep_infra]
api_key = "from-file"
base_url = "http://localhost:9999"
"#,
    )
    .unwrap();
    let config = load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();

    let service = ScriptedService::new(vec![Err(ServiceError::Timeout)]);
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(ProviderKind::DeepInfra, keyed(ProviderKind::DeepInfra, &service)).unwrap();
    let dispatcher = Dispatcher::from_config(providers, &config);

    let err = dispatcher
        .execute(ProviderKind::DeepInfra, AiRequest::new("x", "m"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Service(ServiceError::Timeout)));

    // Threshold 1 from the file: one failure opens the breaker
    assert_eq!(dispatcher.breaker_metrics()["deep_infra"].state, CircuitState::Open);
    assert_eq!(service.calls(), 1);
}

#[tokio::test]
async fn test_routed_fallback_from_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[routing]
preferred_providers = ["kimi"]
max_fallbacks = 1

[providers.deep_infra]
api_key = "from-file"
"#,
    )
    .unwrap();
    let config = load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();

    let kimi = ScriptedService::new(Vec::new());
    let deep_infra = ScriptedService::new(Vec::new());
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(ProviderKind::Kimi, keyed(ProviderKind::Kimi, &kimi)).unwrap();
    providers
        .register(ProviderKind::DeepInfra, keyed(ProviderKind::DeepInfra, &deep_infra))
        .unwrap();
    let dispatcher = Dispatcher::from_config(providers, &config);

    // Kimi is preferred but has no API key, so its service cannot be built
    let done = dispatcher.execute_routed(AiRequest::new("x", "m")).await.unwrap();

    assert_eq!(done.response.content, "reply to x");
    assert_eq!(done.context.provider(), ProviderKind::DeepInfra);
    assert_eq!(
        done.context
            .attribute_as::<Vec<ProviderKind>>(FAILED_PROVIDERS_ATTRIBUTE)
            .as_deref(),
        Some(&vec![ProviderKind::Kimi])
    );
    assert_eq!((kimi.calls(), deep_infra.calls()), (0, 1));
}
