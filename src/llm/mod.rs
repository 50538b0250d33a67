//! LLM provider contract
//!
//! The sorting pipeline and the chat session only see [`LlmProvider`]: a prompt (plus
//! optional system instruction and history) goes in, text comes out, either whole or as
//! a stream of chunks. Errors carry enough of the provider's status to decide whether a
//! failure is worth retrying.

pub mod gemini;

use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;

/// Sampling options understood by the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl GenerationConfig {
    /// Settings used for category inference
    pub fn classification() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 65_536,
            response_mime_type: "text/plain".to_string(),
        }
    }

    /// Settings used for the literature-search chat
    pub fn chat() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 8192,
            response_mime_type: "text/plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

/// One generation call: system instruction, conversation so far, sampling config
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub config: GenerationConfig,
}

impl LlmRequest {
    /// Single-turn request with no system instruction
    pub fn prompt(text: impl Into<String>, config: GenerationConfig) -> Self {
        Self {
            system: None,
            messages: vec![ChatMessage::user(text)],
            config,
        }
    }
}

/// Failure reported by an LLM provider
#[derive(Debug, Clone, PartialEq)]
pub struct LlmError {
    /// HTTP status when the provider answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl LlmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    /// Throttling failure (HTTP 429 / quota exhausted), worth retrying after a pause
    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(429)
            || self.message.contains("RESOURCE_EXHAUSTED")
            || self.message.contains("429")
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "API error {}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Stream of text chunks produced by a streaming generation call
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// Text generation backend
#[allow(async_fn_in_trait)]
pub trait LlmProvider {
    /// Generate the full response text
    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// Generate the response as a sequence of text chunks
    async fn generate_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError>;
}

impl<P: LlmProvider> LlmProvider for &P {
    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        (**self).generate(request).await
    }

    async fn generate_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        (**self).generate_stream(request).await
    }
}
