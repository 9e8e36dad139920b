//! HTTP adapter for the OpenAI-compatible sidecar endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::ClientError;
use super::types::{ChatRequest, ChatResponse, Message};
use super::LocalModelClient;

/// Default sidecar address when no environment overrides are set.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 10000;

/// Per-call timeout; local models can take a while on long completions.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for a locally-running OpenAI-compatible model server.
#[derive(Debug, Clone)]
pub struct HttpSidecarClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSidecarClient {
    /// Create against an explicit base URL, e.g. `http://127.0.0.1:10000/v1`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Create from `SIDECAR_HOST`, `SIDECAR_PORT`, and
    /// `SIDECAR_TIMEOUT_SECONDS`, with local defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        let host = std::env::var("SIDECAR_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = match std::env::var("SIDECAR_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ClientError::config(format!("invalid SIDECAR_PORT: {raw}")))?,
            Err(_) => DEFAULT_PORT,
        };
        let timeout = std::env::var("SIDECAR_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Self::new(format!("http://{host}:{port}/v1"), timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    /// Some local backends put chain-of-thought style output here and leave
    /// `content` empty.
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ModelsApiResponse {
    data: Option<Vec<ModelEntry>>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

// =============================================================================
// CLIENT IMPL
// =============================================================================

#[async_trait]
impl LocalModelClient for HttpSidecarClient {
    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let response = self.client.get(self.models_url()).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::remote(status.as_u16(), truncate(&body, 500)));
        }

        let parsed: ModelsApiResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::invalid(format!("bad models payload: {e}")))?;

        Ok(parsed
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ClientError> {
        let api_req = ChatApiRequest {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: false,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let latency = start.elapsed();

        if !status.is_success() {
            return Err(ClientError::remote(status.as_u16(), truncate(&body, 500)));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::invalid(format!("bad completion payload: {e}")))?;

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ClientError::invalid("no choices in response"))?;

        let content = choice
            .message
            .map(|m| {
                let content = m.content.unwrap_or_default();
                if !content.trim().is_empty() {
                    return content;
                }
                // Reasoning-tuned models may emit everything in `reasoning`
                // and leave `content` blank.
                m.reasoning.unwrap_or_default()
            })
            .unwrap_or_default();

        let usage = parsed.usage;
        let prompt_tokens = usage.as_ref().and_then(|u| u.prompt_tokens).unwrap_or(0);
        let completion_tokens = usage
            .as_ref()
            .and_then(|u| u.completion_tokens)
            .unwrap_or(0);

        Ok(ChatResponse {
            content,
            prompt_tokens,
            completion_tokens,
            latency,
            finish_reason: choice.finish_reason,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
