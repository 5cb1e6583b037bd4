//! LLM Client — the single point of entry for all model calls in the pipeline.
//!
//! ARCHITECTURAL RULE: no other module may talk to the completion API
//! directly. All LLM interactions go through [`CompletionClient`].
//!
//! The pipeline never depends on token-level response structure beyond
//! "best-effort first non-empty text block". Transport-level retry lives
//! here and is independent of the scorer's one-retry-on-schema-violation
//! policy; those are two distinct retry layers.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// The completion seam consumed by the structurer and the scorer engines.
/// Implemented by [`LlmClient`] in production and by stubs in tests.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// The single LLM client used by the pipeline. Wraps an OpenAI-compatible
/// chat completions API with bounded retry.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String, api_url: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key,
        }
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    /// Makes a completion call, returning the first non-empty text block.
    /// Retries on 429 and 5xx with exponential backoff.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, LlmError> {
        let request_body = ChatRequest {
            model,
            max_tokens,
            temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let chat: ChatResponse = response.json().await?;

            let text = chat
                .choices
                .iter()
                .find_map(|c| {
                    c.message
                        .content
                        .as_deref()
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                })
                .ok_or(LlmError::EmptyContent)?;

            debug!("LLM call succeeded: model={model} chars={}", text.len());

            return Ok(text.to_string());
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

static RE_JSON_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(\{.*\}|\[.*\])").expect("constant regex pattern is valid")
});

/// Best-effort JSON extraction from model output. Strips code fences, then
/// falls back to the first object/array found if the whole text is not JSON.
/// Arrays are wrapped as `{"_list": [...]}` to keep the return type stable.
pub fn parse_loose_json(text: &str) -> Option<Value> {
    let text = strip_json_fences(text);

    let candidate = match serde_json::from_str::<Value>(text) {
        Ok(v) => Some(v),
        Err(_) => RE_JSON_BODY
            .captures(text)
            .and_then(|caps| serde_json::from_str::<Value>(&caps[1]).ok()),
    };

    match candidate {
        Some(Value::Object(obj)) => Some(Value::Object(obj)),
        Some(Value::Array(items)) => Some(serde_json::json!({ "_list": items })),
        _ => None,
    }
}
