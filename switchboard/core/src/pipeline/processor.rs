//! Response processors
//!
//! Processors transform a backend response on its way back: filtering,
//! formatting, annotation. For streamed responses they run once per chunk,
//! but only if they opt in through [`ResponseProcessor::supports_streaming`].

use async_trait::async_trait;
use thiserror::Error;

use super::context::ExecutionContext;
use super::interceptor::DEFAULT_PRIORITY;
use crate::model::AiResponse;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A processor failed to transform a response
///
/// Aborts any further processing of that response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessorError {
    message: String,
    retryable: bool,
    #[source]
    source: Option<BoxError>,
}

impl ProcessorError {
    /// A non-retryable failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    /// A failure worth retrying
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

/// Transforms responses after they are received
#[async_trait]
pub trait ResponseProcessor: Send + Sync {
    /// Name used for removal and diagnostics
    fn name(&self) -> &str;

    /// Lower values run first
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// Whether to run on partial (streamed) chunks
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Produce the response to hand back
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] to stop processing.
    async fn process(
        &self,
        response: AiResponse,
        ctx: &ExecutionContext,
    ) -> Result<AiResponse, ProcessorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    struct Upper;

    #[async_trait]
    impl ResponseProcessor for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn process(
            &self,
            mut response: AiResponse,
            _ctx: &ExecutionContext,
        ) -> Result<AiResponse, ProcessorError> {
            response.content = response.content.to_uppercase();
            Ok(response)
        }
    }

    #[tokio::test]
    async fn test_defaults() {
        let processor = Upper;
        assert_eq!(processor.priority(), DEFAULT_PRIORITY);
        assert!(!processor.supports_streaming());

        let ctx = ExecutionContext::new(ProviderKind::Google);
        let out = processor
            .process(AiResponse::complete("r", "hi"), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "HI");
    }

    #[test]
    fn test_error_flags() {
        assert!(ProcessorError::retryable("upstream hiccup").is_retryable());
        assert!(!ProcessorError::new("bad json").is_retryable());
    }
}
