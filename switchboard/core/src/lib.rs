//! Switchboard Core - Resilient Middleware for Pluggable AI Providers
//!
//! This crate sits between an application and a set of interchangeable AI
//! backends. It does not talk to any network itself; backend connectors plug
//! in as [`ServiceFactory`] implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Dispatcher                              │
//! │                                                                  │
//! │  AiRequest                                                       │
//! │     │                                                            │
//! │     ▼                                                            │
//! │  ┌──────────────┐   ┌────────────────┐   ┌────────────────────┐  │
//! │  │ Interceptors │──►│ CircuitBreaker │──►│ AiService (lazily  │  │
//! │  │ (priority ↑) │   │ (per provider) │   │ built by factory)  │  │
//! │  └──────────────┘   └────────────────┘   └─────────┬──────────┘  │
//! │                                                     │             │
//! │  ┌──────────────┐                                   │             │
//! │  │  Processors  │◄──────────────────────────────────┘             │
//! │  │ (priority ↑) │                                                 │
//! │  └──────┬───────┘                                                 │
//! │         ▼                                                         │
//! │     AiResponse + ExecutionContext                                 │
//! └──────────────────────────────────────────────────────────────────┘
//!        ▲                         ▲
//!        │                         │
//!  ProviderRegistry        CircuitBreakerRegistry
//!  (kind → factory)        (name → shared breaker)
//! ```
//!
//! Routed requests skip naming a provider: a [`ProviderSelector`] ranks the
//! registered providers that offer the request's [`RequiredCapabilities`],
//! and the dispatcher falls back down that list when a provider fails.
//!
//! # Key Types
//!
//! - [`ProviderRegistry`]: maps each [`ProviderKind`] to one [`ServiceFactory`]
//! - [`CircuitBreaker`] / [`CircuitBreakerRegistry`]: per-provider failure isolation
//! - [`ExecutionContext`]: per-request identity, timings and attributes
//! - [`RequestInterceptor`] / [`ResponseProcessor`]: ordered extension points
//! - [`ProviderSelector`] / [`RoutingConfig`]: capability-based provider choice
//! - [`Dispatcher`]: reference orchestrator wiring all of the above
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchboard_core::{
//!     config::load_config, AiRequest, Dispatcher, ProviderKind, ProviderRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     switchboard_core::telemetry::init_tracing("info");
//!     let config = load_config()?;
//!
//!     let providers = Arc::new(ProviderRegistry::new());
//!     providers.register(ProviderKind::Google, Arc::new(GeminiFactory::default()))?;
//!
//!     let dispatcher = Dispatcher::from_config(providers, &config);
//!     let done = dispatcher
//!         .execute(ProviderKind::Google, AiRequest::new("Hello", "gemini-pro"))
//!         .await?;
//!     println!("{}", done.response.content);
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod resilience;
pub mod routing;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigError, ConfigOverrides, ConfigSource, RetryConfig, SwitchboardConfig};
pub use dispatch::{DispatchError, DispatchStream, Dispatched, Dispatcher};
pub use model::{AiRequest, AiResponse};
pub use pipeline::{
    ExecutionContext, InterceptorError, ProcessorError, RequestInterceptor, RequestPipeline,
    ResponseProcessor, DEFAULT_PRIORITY,
};
pub use provider::{
    AiService, ProviderCapabilities, ProviderConfig, ProviderInfo, ProviderKind,
    ProviderRegistry, RegistrationError, RequiredCapabilities, ServiceCreationError, ServiceError,
    ServiceFactory, ValidationResult,
};
pub use resilience::{
    BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitOpenError, CircuitState, ExecutionError,
};
pub use routing::{ProviderSelector, RoutingConfig};
