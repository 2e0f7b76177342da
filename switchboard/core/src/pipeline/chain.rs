//! Request Pipeline
//!
//! Ordered chains of interceptors and processors around the guarded call.
//!
//! ```text
//!   request ──► interceptor(10) ──► interceptor(100) ──► [ backend ]
//!                                                            │
//!   response ◄── processor(100) ◄── processor(10) ◄──────────┘
//! ```
//!
//! Both chains run in ascending priority; ties keep insertion order. Stages
//! may be added and removed while requests are in flight: each run works on
//! a snapshot taken when it starts, and no lock is held across an await.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ExecutionContext;
use super::interceptor::{InterceptorError, RequestInterceptor};
use super::processor::{ProcessorError, ResponseProcessor};
use crate::model::{AiRequest, AiResponse};

/// Ordered interceptor and processor chains
#[derive(Default)]
pub struct RequestPipeline {
    interceptors: RwLock<Vec<Arc<dyn RequestInterceptor>>>,
    processors: RwLock<Vec<Arc<dyn ResponseProcessor>>>,
}

impl RequestPipeline {
    /// Create an empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interceptor at its priority position
    pub fn add_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) {
        let mut chain = self.interceptors.write();
        tracing::debug!(
            interceptor = interceptor.name(),
            priority = interceptor.priority(),
            "Adding request interceptor"
        );
        chain.push(interceptor);
        chain.sort_by_key(|i| i.priority());
    }

    /// Add a processor at its priority position
    pub fn add_processor(&self, processor: Arc<dyn ResponseProcessor>) {
        let mut chain = self.processors.write();
        tracing::debug!(
            processor = processor.name(),
            priority = processor.priority(),
            streaming = processor.supports_streaming(),
            "Adding response processor"
        );
        chain.push(processor);
        chain.sort_by_key(|p| p.priority());
    }

    /// Remove every interceptor with this name; returns whether any was removed
    pub fn remove_interceptor(&self, name: &str) -> bool {
        let mut chain = self.interceptors.write();
        let before = chain.len();
        chain.retain(|i| i.name() != name);
        chain.len() != before
    }

    /// Remove every processor with this name; returns whether any was removed
    pub fn remove_processor(&self, name: &str) -> bool {
        let mut chain = self.processors.write();
        let before = chain.len();
        chain.retain(|p| p.name() != name);
        chain.len() != before
    }

    /// Remove all stages
    pub fn clear(&self) {
        self.interceptors.write().clear();
        self.processors.write().clear();
    }

    /// Number of interceptors
    #[must_use]
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.read().len()
    }

    /// Number of processors
    #[must_use]
    pub fn processor_count(&self) -> usize {
        self.processors.read().len()
    }

    /// Interceptor names in execution order
    #[must_use]
    pub fn interceptor_names(&self) -> Vec<String> {
        self.interceptors
            .read()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Processor names in execution order
    #[must_use]
    pub fn processor_names(&self) -> Vec<String> {
        self.processors
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Run the request through every interceptor
    ///
    /// # Errors
    ///
    /// Stops at the first failing interceptor and returns its error.
    pub async fn run_interceptors(
        &self,
        mut request: AiRequest,
        ctx: &ExecutionContext,
    ) -> Result<AiRequest, InterceptorError> {
        let chain = self.interceptors.read().clone();
        for interceptor in chain {
            tracing::debug!(
                request_id = ctx.request_id(),
                interceptor = interceptor.name(),
                "Running request interceptor"
            );
            request = interceptor.intercept(request, ctx).await.map_err(|e| {
                tracing::debug!(
                    request_id = ctx.request_id(),
                    interceptor = interceptor.name(),
                    error = %e,
                    "Request interceptor failed"
                );
                e
            })?;
        }
        Ok(request)
    }

    /// Run the response through every applicable processor
    ///
    /// For partial responses, processors that don't support streaming are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Stops at the first failing processor and returns its error.
    pub async fn run_processors(
        &self,
        mut response: AiResponse,
        ctx: &ExecutionContext,
    ) -> Result<AiResponse, ProcessorError> {
        let chain = self.processors.read().clone();
        for processor in chain {
            if response.is_partial() && !processor.supports_streaming() {
                tracing::debug!(
                    request_id = ctx.request_id(),
                    processor = processor.name(),
                    "Skipping non-streaming processor for partial response"
                );
                continue;
            }
            response = processor.process(response, ctx).await.map_err(|e| {
                tracing::debug!(
                    request_id = ctx.request_id(),
                    processor = processor.name(),
                    error = %e,
                    "Response processor failed"
                );
                e
            })?;
        }
        Ok(response)
    }
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("interceptors", &self.interceptor_names())
            .field("processors", &self.processor_names())
            .finish()
    }
}
