//! Request interceptors
//!
//! Interceptors transform a request before it reaches the backend: auth
//! headers, prompt rewriting, validation, rate limiting and the like.

use async_trait::async_trait;
use thiserror::Error;

use super::context::ExecutionContext;
use crate::model::AiRequest;

/// Priority given to stages that don't override [`RequestInterceptor::priority`]
/// or [`ResponseProcessor::priority`](super::ResponseProcessor::priority)
pub const DEFAULT_PRIORITY: i32 = 100;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An interceptor rejected or failed to transform a request
///
/// Aborts the request before the backend is contacted.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InterceptorError {
    message: String,
    retryable: bool,
    #[source]
    source: Option<BoxError>,
}

impl InterceptorError {
    /// A non-retryable failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    /// A failure worth retrying (e.g. a transient rate limit)
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(message)
        }
    }

    /// Attach the underlying cause
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Failure description
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the request may be retried
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Transforms requests before they are sent
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Name used for removal and diagnostics
    fn name(&self) -> &str;

    /// Lower values run first
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Produce the request to forward
    ///
    /// # Errors
    ///
    /// Returns [`InterceptorError`] to abort the request.
    async fn intercept(
        &self,
        request: AiRequest,
        ctx: &ExecutionContext,
    ) -> Result<AiRequest, InterceptorError>;
}
