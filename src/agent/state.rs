//! Conversation state, outcomes, and usage accounting.

use crate::Message;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only conversation log, owned by exactly one loop instance.
///
/// Nothing is ever removed or rewritten; trimming to fit the context window
/// happens in the assembler, on the view, not here.
#[derive(Debug, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// How an invocation ended. There is no interrupt path: one of these three
/// is always reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The model finished — by filing its report or by declining to act.
    Done,
    /// The step budget ran out first.
    Exhausted,
    /// A non-recoverable model failure or a protocol violation.
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Done => write!(f, "done"),
            Outcome::Exhausted => write!(f, "exhausted"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// The complete result of one loop invocation. Counters and transcript are
/// populated on every path, including failures.
#[derive(Debug)]
pub struct InvocationResult {
    pub outcome: Outcome,
    /// The final report, when the model filed one.
    pub answer: Option<String>,
    /// Error payload for `Failed` and for window-overflow `Done`.
    pub error: Option<String>,
    /// Prompt tokens consumed by this invocation (children included).
    pub input_tokens: u64,
    /// Completion tokens produced by this invocation (children included).
    pub output_tokens: u64,
    /// Reason/act cycles actually consumed.
    pub steps_used: u32,
    /// The full, untrimmed conversation.
    pub transcript: Vec<Message>,
}

/// Thread-safe token counters, shareable between a parent loop and its
/// sub-invocations so child usage rolls up without double counting.
#[derive(Debug, Default)]
pub struct UsageMeter {
    input: AtomicU64,
    output: AtomicU64,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, input_tokens: u64, output_tokens: u64) {
        self.input.fetch_add(input_tokens, Ordering::Relaxed);
        self.output.fetch_add(output_tokens, Ordering::Relaxed);
    }

    /// `(input, output)` totals so far.
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.input.load(Ordering::Relaxed),
            self.output.load(Ordering::Relaxed),
        )
    }
}
