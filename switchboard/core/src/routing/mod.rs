//! Provider Routing
//!
//! Picks which registered provider serves a request when the caller does not
//! name one, and which providers to fall back to when it fails.
//!
//! # Flow
//!
//! ```text
//! AiRequest.required_capabilities()
//!          │
//!          ▼
//! ┌──────────────────┐    incompatible providers dropped
//! │ ProviderSelector │──► compatible ones scored:
//! └────────┬─────────┘      100 + 50 per matched capability + 200 if preferred
//!          ▼
//!   [best, fallback 1, fallback 2, ...]   (at most 1 + max_fallbacks tried)
//! ```
//!
//! The [`Dispatcher`](crate::Dispatcher) owns the selector and walks the
//! ranked list; a pinned "current" provider, when compatible, is always
//! tried first.

mod selector;

use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

pub use selector::{Candidate, ProviderSelector, BASE_SCORE, CAPABILITY_BONUS, PREFERRED_BONUS};

/// Default number of extra providers tried after the first one fails
pub const DEFAULT_MAX_FALLBACKS: u32 = 2;

/// Context attribute listing providers that failed before the one that
/// answered (`Vec<ProviderKind>`)
pub const FAILED_PROVIDERS_ATTRIBUTE: &str = "switchboard.failed_providers";

/// Preferred order and fallback policy for routed requests
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Providers favoured by the selector, most preferred first
    pub preferred_providers: Vec<ProviderKind>,

    /// Try the next candidate when a provider fails
    pub fallback_enabled: bool,

    /// Extra candidates tried after the first
    pub max_fallbacks: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            preferred_providers: Vec::new(),
            fallback_enabled: true,
            max_fallbacks: DEFAULT_MAX_FALLBACKS,
        }
    }
}

impl RoutingConfig {
    /// Set the preferred providers
    #[must_use]
    pub fn with_preferred(mut self, providers: impl IntoIterator<Item = ProviderKind>) -> Self {
        self.preferred_providers = providers.into_iter().collect();
        self
    }

    /// Enable or disable fallback
    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Set the fallback budget
    #[must_use]
    pub fn with_max_fallbacks(mut self, max: u32) -> Self {
        self.max_fallbacks = max;
        self
    }

    /// Providers a routed request may try in total
    #[must_use]
    pub fn attempt_budget(&self) -> usize {
        if self.fallback_enabled {
            usize::try_from(self.max_fallbacks)
                .unwrap_or(usize::MAX)
                .saturating_add(1)
        } else {
            1
        }
    }
}
