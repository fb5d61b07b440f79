//! Convenience re-exports for typical use.
//!
//! ```ignore
//! use flowsleuth::prelude::*;
//! ```

pub use crate::agent::config::{ExclusionRule, LoopConfig, NoActionPolicy};
pub use crate::agent::events::{EventHandler, LoggingHandler, LoopEvent, NoopHandler};
pub use crate::agent::harness::StepLoop;
pub use crate::agent::state::{InvocationResult, Outcome, UsageMeter};
pub use crate::agent::sub_agent::SubInvocationTool;
pub use crate::api::client::{LlmError, ModelClient, OpenRouterClient};
pub use crate::api::retry::RetryConfig;
pub use crate::artifact::{ArtifactHandle, ArtifactReader, TextFileReader, Unit};
pub use crate::audit::AuditLog;
pub use crate::context::assembler::{ContextAssembler, ContextCeilings};
pub use crate::memory::{InMemoryRecallStore, MemoryRecord, RecallStore, ScoredMemory};
pub use crate::survey::{FlowSurveyor, SurveyConfig};
pub use crate::tools::core::{Tool, ToolError, ToolFuture, ToolKind, ToolSet};
pub use crate::tools::memory::UpsertMemoryTool;
pub use crate::tools::report::FileReportTool;
pub use crate::{ChatCompletion, ChatRequest, Message, MessageRole, ToolCall, ToolDef};
