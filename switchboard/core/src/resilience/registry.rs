//! Circuit Breaker Registry
//!
//! Keyed store of shared breakers. The first caller for a name builds the
//! breaker; everyone else, including callers racing that first access, gets
//! the same instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Registry of named circuit breakers
pub struct CircuitBreakerRegistry {
    /// Breakers by name
    breakers: DashMap<String, Arc<CircuitBreaker>>,

    /// Configuration for breakers created through `get_or_create_default`
    default_config: RwLock<CircuitBreakerConfig>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry with the default breaker configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create an empty registry with a custom default breaker configuration
    #[must_use]
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config: RwLock::new(config),
        }
    }

    /// Replace the configuration used for breakers created from now on
    pub fn set_default_config(&self, config: CircuitBreakerConfig) {
        *self.default_config.write() = config;
    }

    /// Configuration used for new breakers
    #[must_use]
    pub fn default_config(&self) -> CircuitBreakerConfig {
        self.default_config.read().clone()
    }

    /// Get the breaker for `name`, building it with `factory` on first access
    ///
    /// `factory` runs at most once per name, even under concurrent first
    /// access. It runs while the map shard is locked, so it must not touch
    /// this registry.
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> CircuitBreaker,
    {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(breaker = %name, "Creating circuit breaker");
            Arc::new(factory())
        });
        Arc::clone(entry.value())
    }

    /// Get the breaker for `name`, building it from the default configuration
    pub fn get_or_create_default(&self, name: &str) -> Arc<CircuitBreaker> {
        // Read the config before touching the map so two locks are never held together
        let config = self.default_config();
        self.get_or_create(name, || CircuitBreaker::new(name, config))
    }

    /// Get an existing breaker
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Drop a breaker; the next access for `name` builds a fresh one
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Snapshot of every breaker's metrics, keyed by name
    #[must_use]
    pub fn all_metrics(&self) -> HashMap<String, BreakerMetrics> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().metrics()))
            .collect()
    }

    /// Reset every breaker to `Closed`
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        tracing::info!(count = self.breakers.len(), "All circuit breakers reset");
    }

    /// Names of every registered breaker, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Names of breakers currently `Open`, sorted
    #[must_use]
    pub fn open_breakers(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .breakers
            .iter()
            .filter(|e| e.value().state() == CircuitState::Open)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Number of breakers
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether the registry holds no breakers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}
