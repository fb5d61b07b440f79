//! Tools the model can call during an investigation.
//!
//! [`core`] holds the [`Tool`](core::Tool) trait and [`ToolSet`](core::ToolSet)
//! dispatch machinery. [`memory`] and [`report`] are the built-in tools every
//! investigation loop carries; the delegation tool lives in
//! [`agent::sub_agent`](crate::agent::sub_agent) because it wraps a whole
//! child loop.

pub mod core;
pub mod memory;
pub mod report;

pub use core::{Tool, ToolError, ToolFuture, ToolKind, ToolSet};
pub use memory::UpsertMemoryTool;
pub use report::FileReportTool;
