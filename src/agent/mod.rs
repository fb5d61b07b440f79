//! The bounded agent loop: state machine, configuration, events, tool
//! dispatch, and sub-invocation.

pub mod config;
pub mod dispatch;
pub mod events;
pub mod harness;
pub mod state;
pub mod sub_agent;

pub use config::{ExclusionRule, LoopConfig, NoActionPolicy};
pub use events::{EventHandler, LoggingHandler, LoopEvent, NoopHandler};
pub use harness::StepLoop;
pub use state::{ConversationState, InvocationResult, Outcome, UsageMeter};
pub use sub_agent::SubInvocationTool;
