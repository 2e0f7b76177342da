//! Per-request execution context
//!
//! Created once per request, shared by reference with every interceptor,
//! the guarded call and every processor. Identity and start time never
//! change; timing marks are atomics and attributes live in a concurrent map,
//! so several tasks of one request may use the context at once.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::provider::ProviderKind;

/// Shared attribute value
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// Context for one request's trip through the pipeline
pub struct ExecutionContext {
    request_id: String,
    provider: ProviderKind,
    created_at: Instant,

    /// Micros since `created_at` (+1); 0 means unset
    call_start_us: AtomicU64,
    call_end_us: AtomicU64,

    attributes: DashMap<String, Attribute>,
}

impl ExecutionContext {
    /// Create a context with a generated (UUID v4) request id
    #[must_use]
    pub fn new(provider: ProviderKind) -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string(), provider)
    }

    /// Create a context with a caller-supplied request id
    pub fn with_request_id(request_id: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            request_id: request_id.into(),
            provider,
            created_at: Instant::now(),
            call_start_us: AtomicU64::new(0),
            call_end_us: AtomicU64::new(0),
            attributes: DashMap::new(),
        }
    }

    /// Request id
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Provider this request targets
    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// When the context was created
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Mark the start of the backend call; a repeat call overwrites
    pub fn mark_service_call_start(&self) {
        self.call_start_us.store(self.now_micros(), Ordering::Release);
    }

    /// Mark the end of the backend call; a repeat call overwrites
    pub fn mark_service_call_end(&self) {
        self.call_end_us.store(self.now_micros(), Ordering::Release);
    }

    /// Milliseconds since the context was created
    #[must_use]
    pub fn processing_time_millis(&self) -> u64 {
        duration_millis(self.created_at.elapsed())
    }

    /// Duration of the backend call, once both marks are set
    #[must_use]
    pub fn service_call_duration_millis(&self) -> Option<u64> {
        let start = self.call_start_us.load(Ordering::Acquire);
        let end = self.call_end_us.load(Ordering::Acquire);
        if start == 0 || end == 0 {
            return None;
        }
        Some(end.saturating_sub(start) / 1000)
    }

    /// Store an attribute, returning the value it replaced
    pub fn set_attribute<T>(&self, key: impl Into<String>, value: T) -> Option<Attribute>
    where
        T: Any + Send + Sync,
    {
        self.attributes.insert(key.into(), Arc::new(value))
    }

    /// Get an attribute as an untyped shared value
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<Attribute> {
        self.attributes.get(key).map(|v| Arc::clone(v.value()))
    }

    /// Get an attribute as `T`
    ///
    /// Absence and a type mismatch both yield `None`.
    #[must_use]
    pub fn attribute_as<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.attribute(key)?.downcast::<T>().ok()
    }

    /// Whether an attribute is set
    #[must_use]
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Remove an attribute, returning its value
    pub fn remove_attribute(&self, key: &str) -> Option<Attribute> {
        self.attributes.remove(key).map(|(_, v)| v)
    }

    /// Snapshot of attribute keys
    #[must_use]
    pub fn attribute_keys(&self) -> Vec<String> {
        self.attributes.iter().map(|e| e.key().clone()).collect()
    }

    fn now_micros(&self) -> u64 {
        u64::try_from(self.created_at.elapsed().as_micros()).unwrap_or(u64::MAX - 1) + 1
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.attribute_keys();
        keys.sort();
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("provider", &self.provider)
            .field("attributes", &keys)
            .finish()
    }
}
