//! Events and handlers for observing a [`StepLoop`](super::harness::StepLoop)
//! run.
//!
//! The loop announces each phase of each step through [`LoopEvent`] variants.
//! Callers implement [`EventHandler`] to observe them — logging, TUI
//! rendering, metrics. Handlers are observers only; nothing they do changes
//! the loop's decisions.

use super::state::Outcome;
use tracing::{debug, info, warn};

/// Events emitted by the loop during a run.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// A reason/act cycle is starting.
    StepStart { step: u32, max_steps: u32 },
    /// The model produced text (possibly alongside tool calls).
    Text(&'a str),
    /// The model requested tool calls this step.
    ToolCallsReceived { step: u32, count: usize },
    /// A single tool is about to execute.
    ToolExecuting { name: &'a str, arguments: &'a str },
    /// A single tool finished.
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a str,
    },
    /// A call was skipped by rate limiting, an exclusion rule, or a filed
    /// report; `reason` is the text sent back to the model.
    ToolSkipped { name: &'a str, reason: &'a str },
    /// Token usage reported by the API for this step.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The wrap-up warning was injected into the preamble.
    SoftDeadline { steps_remaining: u32 },
    /// The run ended.
    Finished { outcome: Outcome },
}

/// Handler for loop events. The default implementation ignores everything.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &LoopEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler that logs through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        match event {
            LoopEvent::StepStart { step, max_steps } => {
                info!("Step {step}/{max_steps}");
            }
            LoopEvent::Text(text) => {
                debug!("Model text ({} chars)", text.len());
            }
            LoopEvent::ToolCallsReceived { step, count } => {
                info!("Step {step}: {count} tool call(s)");
            }
            LoopEvent::ToolExecuting { name, .. } => {
                info!("Executing {name}");
            }
            LoopEvent::ToolResult { name, result, .. } => {
                debug!("{name} returned {} bytes", result.len());
            }
            LoopEvent::ToolSkipped { name, reason } => {
                warn!("Skipped {name}: {reason}");
            }
            LoopEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Usage: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            LoopEvent::SoftDeadline { steps_remaining } => {
                warn!("Soft deadline: {steps_remaining} step(s) remaining");
            }
            LoopEvent::Finished { outcome } => {
                info!("Run finished: {outcome}");
            }
        }
    }
}
