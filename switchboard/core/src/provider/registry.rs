//! Provider Registry - Service Factory Discovery
//!
//! Maps each [`ProviderKind`] to exactly one [`ServiceFactory`]. The registry
//! is an explicitly constructed value injected into the orchestrator; tests
//! build their own instance.
//!
//! # Thread Safety
//!
//! ```text
//!   register / unregister / clear          factory / is_registered / ...
//!              │                                         │
//!      ┌───────▼────────┐                                │
//!      │ mutation lock  │  (parking_lot::Mutex<()>)      │
//!      └───────┬────────┘                                │
//!              │                                         │
//!      ┌───────▼─────────────────────────────────────────▼──────┐
//!      │        DashMap<ProviderKind, Arc<dyn ServiceFactory>>   │
//!      └────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutations are serialized so the duplicate check and the insert happen as
//! one step. Lookups go straight to the map and never wait on the lock.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use super::kind::ProviderKind;
use super::traits::{ProviderInfo, ServiceFactory};

/// Rejected registrations
///
/// These are caller configuration errors and are never retryable.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The factory serves a different provider than the one it was registered under
    #[error("Factory provider type mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        /// Kind passed to `register`
        expected: ProviderKind,
        /// Kind the factory reports
        actual: ProviderKind,
    },

    /// A factory is already registered for this provider
    #[error("Factory already registered for provider: {0}")]
    AlreadyRegistered(ProviderKind),
}

/// Registry of service factories keyed by provider
#[derive(Default)]
pub struct ProviderRegistry {
    factories: DashMap<ProviderKind, Arc<dyn ServiceFactory>>,
    mutation_lock: Mutex<()>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a provider
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::KindMismatch`] if the factory reports a different kind
    /// - [`RegistrationError::AlreadyRegistered`] if `kind` already has a factory;
    ///   the original factory stays in place
    pub fn register(
        &self,
        kind: ProviderKind,
        factory: Arc<dyn ServiceFactory>,
    ) -> Result<(), RegistrationError> {
        let actual = factory.provider_kind();
        if actual != kind {
            tracing::warn!(expected = %kind, actual = %actual, "Rejected factory registration");
            return Err(RegistrationError::KindMismatch {
                expected: kind,
                actual,
            });
        }

        let network = factory.requires_network_access();
        let _guard = self.mutation_lock.lock();
        if self.factories.contains_key(&kind) {
            tracing::warn!(provider = %kind, "Factory already registered");
            return Err(RegistrationError::AlreadyRegistered(kind));
        }
        self.factories.insert(kind, factory);

        tracing::info!(provider = %kind, network, "Provider registered");
        Ok(())
    }

    /// Remove the factory for a provider
    ///
    /// Returns the previously registered factory, if any. Calling this for an
    /// unregistered provider is a no-op.
    pub fn unregister(&self, kind: ProviderKind) -> Option<Arc<dyn ServiceFactory>> {
        let _guard = self.mutation_lock.lock();
        let removed = self.factories.remove(&kind).map(|(_, factory)| factory);
        if removed.is_some() {
            tracing::info!(provider = %kind, "Provider unregistered");
        }
        removed
    }

    /// Get the factory for a provider
    #[must_use]
    pub fn factory(&self, kind: ProviderKind) -> Option<Arc<dyn ServiceFactory>> {
        self.factories.get(&kind).map(|f| Arc::clone(f.value()))
    }

    /// Check whether a provider has a factory
    #[must_use]
    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Snapshot of all registered providers
    #[must_use]
    pub fn available_providers(&self) -> HashSet<ProviderKind> {
        self.factories.iter().map(|e| *e.key()).collect()
    }

    /// Metadata for every registered provider
    #[must_use]
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        self.factories
            .iter()
            .map(|e| e.value().provider_info())
            .collect()
    }

    /// Metadata for one provider
    #[must_use]
    pub fn provider_info_for(&self, kind: ProviderKind) -> Option<ProviderInfo> {
        self.factories.get(&kind).map(|f| f.provider_info())
    }

    /// Factories that need network access
    #[must_use]
    pub fn network_required_factories(&self) -> Vec<Arc<dyn ServiceFactory>> {
        self.partition(true)
    }

    /// Factories that work without network access
    #[must_use]
    pub fn offline_factories(&self) -> Vec<Arc<dyn ServiceFactory>> {
        self.partition(false)
    }

    fn partition(&self, network: bool) -> Vec<Arc<dyn ServiceFactory>> {
        self.factories
            .iter()
            .filter(|e| e.value().requires_network_access() == network)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no providers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Remove every registration
    pub fn clear(&self) {
        let _guard = self.mutation_lock.lock();
        self.factories.clear();
        tracing::info!("Provider registry cleared");
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<_> = self.available_providers().into_iter().collect();
        providers.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &providers)
            .finish()
    }
}
