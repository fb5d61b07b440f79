//! Tool abstraction for the function-calling loop.
//!
//! The [`Tool`] trait defines the interface that every tool must implement:
//! a static API definition (name, description, JSON schema) and an async
//! `execute` method. Tools are collected into a [`ToolSet`] which handles
//! dispatch, definition export, argument validation, timeouts, and result
//! truncation.
//!
//! A tool's [`ToolKind`] tells the dispatcher how it behaves inside a step:
//! most tools are [`ToolKind::Unlimited`], expensive delegation tools are
//! [`ToolKind::RateLimited`] (one call per step, extras skipped), and exactly
//! one tool per loop should be [`ToolKind::FinalAnswer`] (calling it ends the
//! investigation).

use crate::ToolDef;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Default timeout for tool execution (60 seconds).
pub const DEFAULT_TOOL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Boxed future returned by [`Tool::execute`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

/// Errors a tool may return. The loop never aborts on these — they are
/// rendered into the tool-result message so the model can self-correct.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
}

/// How the dispatcher treats a tool's calls within a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// No per-step limit; calls in the same step run concurrently.
    Unlimited,
    /// At most one call per step; additional calls are skipped with an
    /// explanatory result.
    RateLimited,
    /// Calling this tool produces the final answer and ends the loop.
    FinalAnswer,
}

/// A tool the model can invoke via function-calling.
///
/// Implementors provide:
/// - A static definition ([`Tool::definition`]) describing the tool's name,
///   description, and JSON Schema parameters for the model.
/// - An async [`Tool::execute`] method that receives the raw JSON arguments
///   string and returns a result string or a [`ToolError`].
///
/// Uses a boxed future so that the trait is dyn-compatible (object-safe).
pub trait Tool: Send + Sync {
    /// The tool definition sent to the LLM API.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with the given raw JSON arguments string.
    fn execute(&self, arguments: &str) -> ToolFuture<'_>;

    /// Per-step dispatch behavior. Defaults to [`ToolKind::Unlimited`].
    fn kind(&self) -> ToolKind {
        ToolKind::Unlimited
    }

    /// The tool's name (convenience — delegates to definition).
    fn name(&self) -> String {
        self.definition().function.name.clone()
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// Manages registration, definition export for the LLM API, and execution
/// with validation, timing, timeout, and truncation. This is the tool-side
/// counterpart to the [`StepLoop`](crate::agent::harness::StepLoop).
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    /// Whether to validate tool arguments against JSON Schema before execution.
    validate_args: bool,
    /// Default timeout for tool execution. `None` disables timeouts.
    default_timeout: Option<std::time::Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSet {
    /// Create an empty tool set with validation and the default timeout on.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: true,
            default_timeout: Some(DEFAULT_TOOL_TIMEOUT),
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Enable or disable JSON Schema argument validation before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Set a default timeout for tool execution. Pass `None` to disable.
    pub fn with_default_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Return all tool definitions for the LLM API.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// The dispatch kind of a registered tool, if present.
    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.tools.get(name).map(|t| t.kind())
    }

    /// The name of the registered [`ToolKind::FinalAnswer`] tool, if any.
    pub fn final_tool_name(&self) -> Option<String> {
        self.tools
            .values()
            .find(|t| t.kind() == ToolKind::FinalAnswer)
            .map(|t| t.name())
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call by name, with validation, timing, timeout, and
    /// truncation.
    ///
    /// Always returns a result string: tool failures, validation failures,
    /// unknown names, and timeouts all become `"Error: ..."` text that goes
    /// back to the model as an ordinary tool result. A failing tool is the
    /// model's problem to react to, not the loop's.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => return format!("Error: unknown tool '{name}'"),
        };

        if self.validate_args {
            if let Some(error) = validate_tool_arguments(tool.as_ref(), arguments) {
                return error;
            }
        }

        log_tool_call(name, arguments);
        let start = std::time::Instant::now();

        let outcome = if let Some(timeout_duration) = self.default_timeout {
            match tokio::time::timeout(timeout_duration, tool.execute(arguments)).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                        start.elapsed().as_secs_f64(),
                        timeout_duration.as_secs_f64()
                    );
                    return format!(
                        "Error: tool '{name}' timed out after {:.0}s",
                        timeout_duration.as_secs_f64()
                    );
                }
            }
        } else {
            tool.execute(arguments).await
        };

        let result = match outcome {
            Ok(result) => result,
            Err(error) => format!("Error: {error}"),
        };

        debug!(
            "Tool {name} finished in {:.2}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            result.len()
        );
        truncate_result(result, self.max_result_bytes)
    }
}

/// Validate raw JSON arguments against a tool's declared schema.
///
/// Returns `Some(error_message)` on failure, `None` when the arguments are
/// acceptable. An invalid schema skips validation rather than blocking the
/// tool.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Option<String> {
    let args: serde_json::Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            return Some(format!(
                "Error: invalid JSON arguments for '{}': {e}",
                tool.name()
            ));
        }
    };

    let schema = tool.definition().function.parameters;
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(_) => return None,
    };

    let errors: Vec<String> = validator
        .iter_errors(&args)
        .map(|e| format!("{e} (at '{}')", e.instance_path()))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: arguments for '{}' failed validation: {}",
            tool.name(),
            errors.join("; ")
        ))
    }
}

fn log_tool_call(name: &str, arguments: &str) {
    debug!("Executing tool {name}");
    trace!("Tool {name} arguments: {arguments}");
}

fn truncate_result(mut result: String, max_bytes: usize) -> String {
    if result.len() <= max_bytes {
        return result;
    }
    let mut cut = max_bytes;
    while !result.is_char_boundary(cut) {
        cut -= 1;
    }
    result.truncate(cut);
    result.push_str("\n[... result truncated ...]");
    result
}
