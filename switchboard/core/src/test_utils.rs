//! Test doubles shared by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::model::{AiRequest, AiResponse};
use crate::provider::{
    AiService, ProviderCapabilities, ProviderConfig, ProviderInfo, ProviderKind, ServiceCreationError, ServiceError,
    ServiceFactory, ValidationResult,
};

/// Scripted service: pops queued failures first, then echoes the prompt
pub struct MockService {
    name: String,
    failures: Mutex<VecDeque<ServiceError>>,
    chunks: Vec<String>,
    healthy: bool,
    pub calls: AtomicUsize,
}

impl MockService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: Mutex::new(VecDeque::new()),
            chunks: vec!["Hel".into(), "lo".into()],
            healthy: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_with(self, errors: impl IntoIterator<Item = ServiceError>) -> Self {
        self.failures.lock().extend(errors);
        self
    }

    pub fn with_chunks(mut self, chunks: &[&str]) -> Self {
        self.chunks = chunks.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.failures.lock().pop_front()
    }
}

#[async_trait]
impl AiService for MockService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &AiRequest) -> Result<AiResponse, ServiceError> {
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        Ok(AiResponse::complete(&request.id, format!("echo: {}", request.prompt))
            .with_model(request.model.clone()))
    }

    async fn send_streaming(
        &self,
        request: &AiRequest,
    ) -> Result<mpsc::Receiver<AiResponse>, ServiceError> {
        if let Some(err) = self.next_failure() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(self.chunks.len() + 1);
        for chunk in &self.chunks {
            let _ = tx.try_send(AiResponse::chunk(&request.id, chunk.clone()));
        }
        let _ = tx.try_send(AiResponse::complete(&request.id, self.chunks.concat()));
        Ok(rx)
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }
}

/// Factory handing out one shared [`MockService`]
pub struct MockFactory {
    kind: ProviderKind,
    display_name: String,
    capabilities: ProviderCapabilities,
    network: bool,
    service: Arc<MockService>,
    pub created: AtomicUsize,
}

impl MockFactory {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            display_name: kind.display_name().to_string(),
            capabilities: ProviderCapabilities::default(),
            network: true,
            service: Arc::new(MockService::new(kind.key())),
            created: AtomicUsize::new(0),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn streaming(self) -> Self {
        self.with_capabilities(ProviderCapabilities {
            streaming: true,
            ..ProviderCapabilities::default()
        })
    }

    pub fn with_service(mut self, service: MockService) -> Self {
        self.service = Arc::new(service);
        self
    }

    pub fn offline(mut self) -> Self {
        self.network = false;
        self
    }

    pub fn service(&self) -> Arc<MockService> {
        Arc::clone(&self.service)
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ServiceFactory for MockFactory {
    fn provider_kind(&self) -> ProviderKind {
        self.kind
    }

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo::new(self.kind, self.display_name.clone(), "mock provider")
            .with_capabilities(self.capabilities.clone())
    }

    fn requires_network_access(&self) -> bool {
        self.network
    }

    fn validate_configuration(&self, config: &ProviderConfig) -> ValidationResult {
        let mut result = ValidationResult::ok();
        if config.setting("reject").is_some() {
            result.add_error("rejected by mock");
        }
        result
    }

    fn create_service(
        &self,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn AiService>, ServiceCreationError> {
        if !config.enabled {
            return Err(ServiceCreationError::Disabled(self.kind));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.service() as Arc<dyn AiService>)
    }
}
