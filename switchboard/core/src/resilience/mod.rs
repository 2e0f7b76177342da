//! Resilience
//!
//! Circuit breakers that isolate failing providers, and the registry that
//! shares one breaker per provider across concurrent requests.

mod circuit_breaker;
mod registry;

pub use circuit_breaker::{
    BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState,
    ExecutionError,
};
pub use registry::CircuitBreakerRegistry;
