//! The model client seam and the OpenRouter HTTP implementation.
//!
//! The loop talks to "a reasoning capability" through [`ModelClient`] — one
//! async method taking a [`ChatRequest`] and returning a [`ChatCompletion`]
//! or a typed [`LlmError`]. Tests substitute scripted stubs; production uses
//! [`OpenRouterClient`].
//!
//! Error classification matters more than transport detail here: the loop
//! treats [`LlmError::ContextLengthExceeded`] as terminal-but-successful
//! (the conversation outgrew the window, finish with what we have),
//! [`LlmError::Timeout`] as retryable without consuming a step, and
//! [`LlmError::Api`] as a step-level failure.

use crate::{ChatCompletion, ChatRequest, OPENROUTER_URL, ToolCall, UsageInfo};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Network timeout for a single model call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Boxed future returned by [`ModelClient::invoke`].
pub type ClientFuture<'a> = Pin<Box<dyn Future<Output = Result<ChatCompletion, LlmError>> + Send + 'a>>;

/// Errors from a model invocation, classified by how the loop must react.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The assembled prompt no longer fits the model's context window.
    /// Terminal for the invocation; never retried.
    #[error("model context window exceeded: {0}")]
    ContextLengthExceeded(String),
    /// The call did not complete within the network timeout.
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    /// Any other provider or transport failure.
    #[error("model API error: {0}")]
    Api(String),
}

/// Abstract reasoning capability invoked once per step.
///
/// Uses a boxed future so that the trait is dyn-compatible (object-safe).
pub trait ModelClient: Send + Sync {
    fn invoke<'a>(&'a self, request: &'a ChatRequest) -> ClientFuture<'a>;
}

// ── Raw response shapes ────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

// ── OpenRouter client ──────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/flowsleuth", "flowsleuth")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("flowsleuth/0.2")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let msg_count = body.messages.len();
        let tool_count = body.tools.as_ref().map_or(0, |t| t.len());
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
            body.model.as_deref().unwrap_or("(none)"),
            msg_count,
            tool_count,
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Api(format!("failed to read response: {e}")))?;

        let elapsed = start.elapsed();
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            elapsed.as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &text));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::Api(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(classify_api_message(&err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        match choice {
            Some(c) => {
                debug!(
                    "LLM output: {} chars text, {} tool call(s)",
                    c.message.content.as_ref().map_or(0, |s| s.len()),
                    c.message.tool_calls.as_ref().map_or(0, |t| t.len())
                );
                Ok(ChatCompletion {
                    content: c.message.content,
                    tool_calls: c.message.tool_calls.unwrap_or_default(),
                    usage: parsed.usage,
                    finish_reason: c.finish_reason,
                })
            }
            None => {
                debug!("LLM output: empty (no choices)");
                Ok(ChatCompletion {
                    usage: parsed.usage,
                    ..Default::default()
                })
            }
        }
    }
}

impl ModelClient for OpenRouterClient {
    fn invoke<'a>(&'a self, request: &'a ChatRequest) -> ClientFuture<'a> {
        Box::pin(self.chat(request))
    }
}

fn classify_transport_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout(REQUEST_TIMEOUT)
    } else {
        LlmError::Api(format!("request failed: {error}"))
    }
}

/// Providers signal window overflow as HTTP 400 with a message naming the
/// context length; everything else keeps its status for retry triage.
fn classify_http_error(status: u16, body: &str) -> LlmError {
    if status == 400 && mentions_context_length(body) {
        LlmError::ContextLengthExceeded(body.to_string())
    } else {
        LlmError::Api(format!("OpenRouter API HTTP {status}: {body}"))
    }
}

fn classify_api_message(message: &str) -> LlmError {
    if mentions_context_length(message) {
        LlmError::ContextLengthExceeded(message.to_string())
    } else {
        LlmError::Api(format!("OpenRouter API error: {message}"))
    }
}

fn mentions_context_length(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["context length", "context_length", "maximum context", "context window"]
        .iter()
        .any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_400_with_context_message_is_window_overflow() {
        let err = classify_http_error(
            400,
            r#"{"error":{"message":"This model's maximum context length is 128000 tokens"}}"#,
        );
        assert!(matches!(err, LlmError::ContextLengthExceeded(_)));
    }

    #[test]
    fn plain_http_400_is_api_error() {
        let err = classify_http_error(400, "bad request: unknown field");
        match err {
            LlmError::Api(msg) => assert!(msg.contains("HTTP 400")),
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn embedded_error_message_classification() {
        assert!(matches!(
            classify_api_message("prompt exceeds the context window of the model"),
            LlmError::ContextLengthExceeded(_)
        ));
        assert!(matches!(
            classify_api_message("provider unavailable"),
            LlmError::Api(_)
        ));
    }
}
