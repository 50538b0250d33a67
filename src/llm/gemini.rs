//! Google Gemini API client
//!
//! Plain and streamed (`alt=sse`) text generation for the sorter and the chat.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use super::{ChatMessage, GenerationConfig, LlmError, LlmProvider, LlmRequest, TextStream};
use crate::settings;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini API request format
#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: WireConfig<'a>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireConfig<'a> {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: &'a str,
}

/// Gemini API response format (also the payload of every SSE event)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        Some(content.parts.iter().map(|p| p.text.as_str()).collect())
    }
}

/// Gemini client bound to one model
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("papere/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client, api_key, model: model.into() })
    }

    /// Client using the API key from settings / `GEMINI_API_KEY`
    pub fn from_settings(model: impl Into<String>) -> Result<Self, String> {
        let api_key = settings::get_api_key().ok_or("GEMINI_API_KEY not set")?;
        Self::new(api_key, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}:{}", API_BASE, self.model, method)
    }

    async fn post(&self, url: &str, request: &LlmRequest) -> Result<reqwest::Response, LlmError> {
        let body = build_request(request);
        tracing::debug!(model = %self.model, url, "Gemini request");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::new(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::with_status(status, body));
        }

        Ok(response)
    }
}

impl LlmProvider for GeminiClient {
    async fn generate(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let response = self.post(&self.endpoint("generateContent"), request).await?;

        let api_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::new(format!("Failed to parse response: {}", e)))?;

        if let Some(usage) = &api_response.usage_metadata {
            record_usage(usage);
        }

        api_response
            .text()
            .ok_or_else(|| LlmError::new("Gemini returned no candidates"))
    }

    async fn generate_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, request).await?;

        let state = SseState {
            bytes: response.bytes_stream().map(|read| read.map(|b| b.to_vec())).boxed(),
            pending: Vec::new(),
            ready: VecDeque::new(),
            usage: None,
            done: false,
        };

        let chunks = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.ready.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(bytes)) => {
                        state.pending.extend_from_slice(&bytes);
                        state.drain_lines(false);
                    }
                    Some(Err(e)) => {
                        state.finish();
                        state.ready.push_back(Err(LlmError::new(format!("Stream interrupted: {}", e))));
                    }
                    None => {
                        state.drain_lines(true);
                        state.finish();
                    }
                }
            }
        });

        Ok(chunks.boxed())
    }
}

/// Incremental server-sent-events decoder
struct SseState {
    bytes: futures::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>,
    /// Raw bytes of the current, not yet terminated line
    pending: Vec<u8>,
    ready: VecDeque<Result<String, LlmError>>,
    /// Latest usage report; Gemini repeats cumulative counts on every event
    usage: Option<UsageMetadata>,
    done: bool,
}

impl SseState {
    /// Turn every complete line into a ready chunk; `eof` also flushes the tail
    fn drain_lines(&mut self, eof: bool) {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_line(&line);
        }
        if eof && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        match parse_sse_line(&line) {
            Some(Ok(event)) => {
                if event.usage_metadata.is_some() {
                    self.usage = event.usage_metadata;
                }
                if let Some(text) = event.text().filter(|t| !t.is_empty()) {
                    self.ready.push_back(Ok(text));
                }
            }
            Some(Err(e)) => self.ready.push_back(Err(e)),
            None => {}
        }
    }

    /// End of stream: record the final usage once
    fn finish(&mut self) {
        self.done = true;
        if let Some(usage) = self.usage.take() {
            record_usage(&usage);
        }
    }
}

/// Decode one SSE line; non-data lines and empty payloads yield `None`
fn parse_sse_line(line: &str) -> Option<Result<GeminiResponse, LlmError>> {
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<GeminiResponse>(data)
            .map_err(|e| LlmError::new(format!("Failed to parse stream event: {}", e))),
    )
}

fn build_request(request: &LlmRequest) -> GeminiRequest<'_> {
    GeminiRequest {
        system_instruction: request.system.as_ref().map(|text| Content {
            role: None,
            parts: vec![Part { text: text.clone() }],
        }),
        contents: request.messages.iter().map(to_content).collect(),
        generation_config: wire_config(&request.config),
    }
}

fn to_content(message: &ChatMessage) -> Content {
    Content {
        role: Some(message.role.as_str().to_string()),
        parts: vec![Part { text: message.text.clone() }],
    }
}

fn wire_config(config: &GenerationConfig) -> WireConfig<'_> {
    WireConfig {
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: config.top_k,
        max_output_tokens: config.max_output_tokens,
        response_mime_type: &config.response_mime_type,
    }
}

fn record_usage(usage: &UsageMetadata) {
    if let Err(e) = settings::add_gemini_tokens(usage.prompt_token_count, usage.candidates_token_count) {
        tracing::warn!("Failed to save Gemini token usage: {}", e);
    }
}
