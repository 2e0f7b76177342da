//! Provider Abstraction
//!
//! Backend connectors plug in through a [`ServiceFactory`] registered under a
//! [`ProviderKind`] in a [`ProviderRegistry`].
//!
//! # Usage
//!
//! ```ignore
//! use switchboard_core::provider::{ProviderKind, ProviderRegistry};
//!
//! let registry = ProviderRegistry::new();
//! registry.register(ProviderKind::Google, Arc::new(GeminiFactory::official()))?;
//! let factory = registry.factory(ProviderKind::Google).expect("registered");
//! let service = factory.create_service(&config)?;
//! ```

mod kind;
mod registry;
mod traits;

pub use kind::{ProviderKind, UnknownProvider};
pub use registry::{ProviderRegistry, RegistrationError};
pub use traits::{
    AiService, ProviderCapabilities, ProviderConfig, ProviderInfo, RequiredCapabilities,
    ServiceCreationError, ServiceError, ServiceFactory, ValidationResult,
};
