//! Request Pipeline
//!
//! Per-request [`ExecutionContext`], the [`RequestInterceptor`] and
//! [`ResponseProcessor`] extension points, and the [`RequestPipeline`] that
//! orders them around the guarded backend call.

mod chain;
mod context;
mod interceptor;
mod processor;

pub use chain::RequestPipeline;
pub use context::{Attribute, ExecutionContext};
pub use interceptor::{InterceptorError, RequestInterceptor, DEFAULT_PRIORITY};
pub use processor::{ProcessorError, ResponseProcessor};
