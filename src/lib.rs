//! Step- and token-budgeted agent runtime for network capture investigation.
//!
//! `flowsleuth` coordinates a sequence of LLM calls and tool invocations under
//! two hard constraints at once: a **step budget** (how many reason/act cycles
//! the investigation may take) and a **token budget** (how much context each
//! model call may consume). The core abstraction is the
//! [`StepLoop`](agent::harness::StepLoop) — a bounded reason/act state machine
//! that sends the assembled context to an LLM, executes the tool calls it
//! requests, appends the results, and repeats until the model files its final
//! report or a budget runs out.
//!
//! # Getting started
//!
//! ```ignore
//! use flowsleuth::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     let client = OpenRouterClient::new(api_key)?;
//!     let store = InMemoryRecallStore::new();
//!
//!     let tools = ToolSet::new()
//!         .with(UpsertMemoryTool::new(store.clone(), "capture-notes"))
//!         .with(FileReportTool::new());
//!
//!     let config = LoopConfig::new("z-ai/glm-5")
//!         .with_max_steps(12)
//!         .with_memory_collection("capture-notes");
//!
//!     let result = StepLoop::new(&client, &tools, &store, config)
//!         .with_event_handler(&LoggingHandler)
//!         .run("Investigate the capture for exfiltration.", None)
//!         .await;
//!
//!     println!("{}", result.answer.unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! If you're looking for how to...
//!
//! - **Count and budget tokens:** see [`context::tokens`] for the
//!   deterministic counter, [`context::budget`] for sqrt-weighted allocation
//!   across flow units, and [`context::chunk`] for overlapping chunking and
//!   head/tail truncation.
//!
//! - **Assemble a prompt under ceilings:** see
//!   [`ContextAssembler`](context::assembler::ContextAssembler) and
//!   [`ContextCeilings`](context::assembler::ContextCeilings). History and
//!   recalled memories are selected newest-first, each strictly under its own
//!   ceiling.
//!
//! - **Run the bounded loop:** see [`StepLoop`](agent::harness::StepLoop) and
//!   [`LoopConfig`](agent::config::LoopConfig). The loop terminates `Done`,
//!   `Exhausted`, or `Failed` — never by interrupt.
//!
//! - **Define tools:** implement the [`Tool`](tools::core::Tool) trait and
//!   register into a [`ToolSet`](tools::core::ToolSet). A tool's
//!   [`ToolKind`](tools::core::ToolKind) controls per-step rate limiting and
//!   final-answer short-circuiting.
//!
//! - **Delegate to a specialist:** see
//!   [`SubInvocationTool`](agent::sub_agent::SubInvocationTool), which runs a
//!   fresh child loop with its own budgets and rolls token usage up to the
//!   parent.
//!
//! - **Observe the loop:** implement
//!   [`EventHandler`](agent::events::EventHandler), or use
//!   [`LoggingHandler`](agent::events::LoggingHandler) for tracing-based logs.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | [`StepLoop`](agent::harness::StepLoop), config, events, dispatch, sub-invocation |
//! | [`context`] | Token counting, budget allocation, chunking, context assembly |
//! | [`memory`] | [`RecallStore`](memory::store::RecallStore) trait and in-memory implementation |
//! | [`tools`] | [`Tool`](tools::core::Tool) trait, [`ToolSet`](tools::core::ToolSet), built-in tools |
//! | [`api`] | OpenRouter client, typed errors, retry with backoff |
//! | [`survey`] | Per-flow budgeted survey of a whole capture |
//! | [`audit`] | Append-only JSONL transcripts of sub-invocations |
//!
//! # Design principles
//!
//! 1. **Budgets are the contract.** Every model call happens inside explicit
//!    step and token budgets. Exhaustion is a normal outcome with a usable
//!    partial result, not an error.
//!
//! 2. **Tools are the unit of capability.** Every agent capability is a
//!    [`Tool`](tools::core::Tool) implementor with a JSON Schema definition
//!    and an async `execute` method.
//!
//! 3. **Context is the scarcest resource.** History is trimmed at assembly
//!    time, never in the transcript; flow text competes for a global budget
//!    through the allocator; oversized inputs are truncated head+tail with an
//!    explicit marker.
//!
//! 4. **Observability over magic.** The
//!    [`EventHandler`](agent::events::EventHandler) trait gives full
//!    visibility into every step, and sub-invocation transcripts are audited
//!    to disk regardless of outcome.

pub mod agent;
pub mod api;
pub mod artifact;
pub mod audit;
pub mod context;
pub mod memory;
pub mod prelude;
pub mod survey;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that the OpenAI function-calling API expects.
///
/// # Example
///
/// ```
/// use flowsleuth::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct RecallArgs {
///     query: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<RecallArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body in the OpenRouter wire format.
/// Unused optional fields are omitted from serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// The textual content of the message, or `""` when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    ///
    /// This is the standard constructor — `ToolType` is always `Function` in
    /// the current API, so there's no reason to specify it manually.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Build a tool call by hand. Mostly useful in tests and stub clients.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

// ── Response types ─────────────────────────────────────────────────

/// Clean return type from a model invocation.
#[derive(Debug, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let assist = Message::assistant_text("report");
        assert_eq!(assist.role, MessageRole::Assistant);
        assert_eq!(assist.content.as_deref(), Some("report"));

        let tool = Message::tool_result("call-1", "result");
        assert_eq!(tool.role, MessageRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn chat_request_default_skips_none_fields() {
        let req = ChatRequest {
            model: Some("test-model".into()),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            temperature: 0.5,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("stop").is_none());
        assert!(json.get("seed").is_none());
    }

    #[test]
    fn message_text_defaults_to_empty() {
        let msg = Message::assistant_tool_calls(vec![ToolCall::new("c1", "recall", "{}")]);
        assert_eq!(msg.text(), "");
    }
}
