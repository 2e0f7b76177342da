//! Request and Response Payloads
//!
//! The middleware treats these as opaque carriers: interceptors and processors
//! receive them by value and hand back a (possibly replaced) value. The only
//! property the pipeline itself looks at is [`AiResponse::is_partial`], which
//! decides whether non-streaming processors run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::RequiredCapabilities;

/// A single logical request to an AI provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    /// Caller-visible request identifier
    pub id: String,
    /// Model to use (provider-specific identifier)
    pub model: String,
    /// The prompt/message to send
    pub prompt: String,
    /// System prompt (optional, prepended by the backend)
    pub system: Option<String>,
    /// Whether the caller wants a streamed response
    pub stream: bool,
    /// Capabilities a routed request needs from its provider
    #[serde(default)]
    pub required: RequiredCapabilities,
    /// Free-form metadata attached by the caller or by interceptors
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AiRequest {
    /// Create a new request with a generated id
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            stream: false,
            required: RequiredCapabilities::default(),
            metadata: HashMap::new(),
        }
    }

    /// Set the request id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the capabilities the serving provider must offer
    #[must_use]
    pub fn with_required(mut self, required: RequiredCapabilities) -> Self {
        self.required = required;
        self
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Declared requirements, plus streaming when `stream` is set
    #[must_use]
    pub fn required_capabilities(&self) -> RequiredCapabilities {
        RequiredCapabilities {
            streaming: self.required.streaming || self.stream,
            ..self.required
        }
    }
}

/// A response (or a chunk of one) produced by an AI provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    /// Id of the request this response answers
    pub request_id: String,
    /// Response text (a delta when `is_partial` is set)
    pub content: String,
    /// Model that generated the response, if reported
    pub model: Option<String>,
    /// True for a streaming chunk, false for the final complete result
    pub is_partial: bool,
    /// Free-form metadata attached by the backend or by processors
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AiResponse {
    /// Create a complete (final) response
    pub fn complete(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            content: content.into(),
            model: None,
            is_partial: false,
            metadata: HashMap::new(),
        }
    }

    /// Create a streaming chunk
    pub fn chunk(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_partial: true,
            ..Self::complete(request_id, content)
        }
    }

    /// Set the reporting model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this is a streaming chunk rather than the complete result
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.is_partial
    }
}
