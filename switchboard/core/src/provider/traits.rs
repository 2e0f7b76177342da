//! Service and Factory Traits
//!
//! Trait definitions for backend connectors. The middleware never talks to a
//! network itself: a [`ServiceFactory`] produces an [`AiService`] handle and
//! the orchestrator hands that handle to the guarded unit of work.
//!
//! # Design Philosophy
//!
//! The factory is the unit of registration. It reports:
//! - which [`ProviderKind`] it serves
//! - descriptive [`ProviderInfo`]
//! - whether creating/using its service needs network access
//! - whether a [`ProviderConfig`] is usable, before any service is built

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::kind::ProviderKind;
use crate::model::{AiRequest, AiResponse};

// ============================================================================
// Provider Metadata
// ============================================================================

/// What a provider can do
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Supports streamed responses
    pub streaming: bool,
    /// Accepts image input
    pub vision: bool,
    /// Supports tool/function calls
    pub tools: bool,
    /// Can search the web
    pub web_search: bool,
    /// Exposes reasoning ("thinking") output
    pub thinking: bool,
    /// Accepts mixed-media input
    pub multimodal: bool,
    /// Context window in tokens
    pub max_tokens: u32,
    /// Accepted input formats ("text", "image", ...)
    pub supported_formats: HashSet<String>,
}

/// Capabilities a request needs from whichever provider serves it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredCapabilities {
    /// Needs streamed responses
    pub streaming: bool,
    /// Needs image input
    pub vision: bool,
    /// Needs tool/function calls
    pub tools: bool,
    /// Needs web search
    pub web_search: bool,
    /// Needs reasoning output
    pub thinking: bool,
    /// Needs mixed-media input
    pub multimodal: bool,
}

impl RequiredCapabilities {
    /// Whether a provider offers everything required
    #[must_use]
    pub fn is_satisfied_by(&self, capabilities: &ProviderCapabilities) -> bool {
        (!self.streaming || capabilities.streaming)
            && (!self.vision || capabilities.vision)
            && (!self.tools || capabilities.tools)
            && (!self.web_search || capabilities.web_search)
            && (!self.thinking || capabilities.thinking)
            && (!self.multimodal || capabilities.multimodal)
    }

    /// Required streaming, vision and tool support the provider offers
    #[must_use]
    pub fn matched(&self, capabilities: &ProviderCapabilities) -> u32 {
        [
            self.streaming && capabilities.streaming,
            self.vision && capabilities.vision,
            self.tools && capabilities.tools,
        ]
        .into_iter()
        .map(u32::from)
        .sum()
    }
}

/// Descriptive metadata for a registered provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider tag
    pub kind: ProviderKind,
    /// Human-readable name
    pub display_name: String,
    /// One-line description
    pub description: String,
    /// Capability flags
    pub capabilities: ProviderCapabilities,
}

impl ProviderInfo {
    /// Create provider info with default capabilities
    pub fn new(
        kind: ProviderKind,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            description: description.into(),
            capabilities: ProviderCapabilities::default(),
        }
    }

    /// Replace the capability flags
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Per-provider connection settings passed to a factory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key, if the provider needs one
    pub api_key: Option<String>,
    /// Base URL override
    pub base_url: Option<String>,
    /// Extra headers sent with every request
    pub custom_headers: HashMap<String, String>,
    /// Provider-specific settings (cookies, region, ...)
    pub settings: HashMap<String, String>,
    /// Whether the provider may be used at all
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            custom_headers: HashMap::new(),
            settings: HashMap::new(),
            enabled: true,
        }
    }
}

impl ProviderConfig {
    /// Whether a non-blank API key is present
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Look up a provider-specific setting
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set a provider-specific setting
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

/// Outcome of [`ServiceFactory::validate_configuration`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Problems that prevent service creation
    pub errors: Vec<String>,
    /// Problems worth reporting that do not block creation
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// An empty (valid) result
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Record a blocking problem
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Record a non-blocking problem
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// True when no errors were recorded
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a service handle while serving a request
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Connection to the backend failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// The backend answered with an error
    #[error("Request failed: {0}")]
    RequestFailed(String),
    /// The caller's deadline elapsed
    #[error("Request timed out")]
    Timeout,
    /// The backend asked us to slow down
    #[error("Rate limited")]
    RateLimited {
        /// Hint from the backend, if any
        retry_after_ms: Option<u64>,
    },
    /// Credentials were rejected
    #[error("Authentication failed")]
    AuthenticationFailed,
}

impl ServiceError {
    /// Transient failures worth retrying
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::Timeout | Self::RateLimited { .. }
        )
    }
}

/// Errors raised when a factory cannot produce a service
#[derive(Debug, Error)]
pub enum ServiceCreationError {
    /// Configuration failed validation
    #[error("Configuration validation failed for {kind}: {}", .errors.join("; "))]
    InvalidConfiguration {
        /// Provider being created
        kind: ProviderKind,
        /// Validation errors
        errors: Vec<String>,
    },
    /// The provider is disabled in configuration
    #[error("Provider {0} is disabled")]
    Disabled(ProviderKind),
    /// Any other construction failure
    #[error("Failed to create {kind} service: {message}")]
    Failed {
        /// Provider being created
        kind: ProviderKind,
        /// What went wrong
        message: String,
    },
}

// ============================================================================
// Traits
// ============================================================================

/// A usable backend-service handle
///
/// The middleware never inspects a service beyond handing it to the caller's
/// unit of work.
#[async_trait]
pub trait AiService: Send + Sync {
    /// Service name for diagnostics
    fn name(&self) -> &str;

    /// Send a request and wait for the complete response
    async fn send(&self, request: &AiRequest) -> Result<AiResponse, ServiceError>;

    /// Send a request and receive the response as a stream of chunks
    ///
    /// The last message on the channel should be a complete (non-partial)
    /// response; the channel closes afterwards.
    async fn send_streaming(
        &self,
        request: &AiRequest,
    ) -> Result<mpsc::Receiver<AiResponse>, ServiceError>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool {
        true
    }
}

/// Produces [`AiService`] handles for one [`ProviderKind`]
pub trait ServiceFactory: Send + Sync {
    /// The provider this factory serves
    fn provider_kind(&self) -> ProviderKind;

    /// Descriptive metadata
    fn provider_info(&self) -> ProviderInfo;

    /// Whether creating or using the service needs network access
    fn requires_network_access(&self) -> bool;

    /// Check a configuration before creating a service
    fn validate_configuration(&self, config: &ProviderConfig) -> ValidationResult {
        let _ = config;
        ValidationResult::ok()
    }

    /// Create a service handle
    ///
    /// # Errors
    ///
    /// Returns [`ServiceCreationError`] when the configuration is unusable or
    /// the connector cannot be built.
    fn create_service(
        &self,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn AiService>, ServiceCreationError>;
}
