//! LLM interaction: one chat-completion call per refinement unit.
//!
//! [`MarkdownRefiner`] is the seam between the refinement engine and the
//! model. [`ChatCompletionsClient`] speaks the OpenAI-compatible
//! `chat/completions` protocol; tests and embedders can install any other
//! implementation through [`crate::ConversionConfigBuilder::refiner`].
//!
//! All prompt wording lives in [`crate::prompts`].
//!
//! ## Error mapping
//!
//! | Situation | Error |
//! |-----------|-------|
//! | transport failure or timeout | [`Arxiv2MdError::LlmRequest`] |
//! | non-2xx | `LlmRequest(error.message)` or `"LLM request failed (HTTP n)"` |
//! | 2xx without usable `choices[0].message.content` | [`Arxiv2MdError::LlmInvalidResponse`] |
//!
//! A timeout is only distinguished in the logs; callers see `LlmRequest`.

use crate::config::{resolve_endpoint, LlmConfig, DEFAULT_LLM_PATH};
use crate::error::Arxiv2MdError;
use crate::pipeline::postprocess::strip_markdown_fences;
use crate::prompts::{refine_user_message, REFINE_SYSTEM_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One refinement call: Markdown in, Markdown out.
#[async_trait]
pub trait MarkdownRefiner: Send + Sync {
    async fn refine(&self, markdown: &str, timeout: Duration) -> Result<String, Arxiv2MdError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ChatError>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    #[serde(default)]
    message: Option<String>,
}

/// OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            endpoint: chat_endpoint(&config.base_url, &config.api_path),
            api_key: config.api_key.trim().to_string(),
            model: config.model.trim().to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MarkdownRefiner for ChatCompletionsClient {
    async fn refine(&self, markdown: &str, timeout: Duration) -> Result<String, Arxiv2MdError> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: REFINE_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: refine_user_message(markdown),
                },
            ],
            stream: false,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("LLM request timed out after {}s", timeout.as_secs());
                } else {
                    warn!("LLM request failed: {}", e);
                }
                Arxiv2MdError::LlmRequest(e.to_string())
            })?;

        let status = response.status();
        // A body that is not JSON is treated as empty; the status decides.
        let body: ChatResponse = response.json().await.unwrap_or_default();

        if !status.is_success() {
            let message = body
                .error
                .and_then(|e| e.message)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("LLM request failed (HTTP {})", status.as_u16()));
            return Err(Arxiv2MdError::LlmRequest(message));
        }

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(Arxiv2MdError::LlmInvalidResponse)?;

        debug!(
            "LLM refined {} chars → {} chars in {:?}",
            markdown.len(),
            content.len(),
            start.elapsed()
        );
        Ok(strip_markdown_fences(&content))
    }
}

/// Absolute `api_path` wins; otherwise `base_url` + `/path`.
pub fn chat_endpoint(base_url: &str, api_path: &str) -> String {
    resolve_endpoint(base_url, api_path, DEFAULT_LLM_PATH)
}
