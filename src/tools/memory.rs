//! The memory upsert tool: lets the model save findings for later recall.

use crate::json_schema_for;
use crate::memory::{MemoryRecord, RecallStore};
use crate::tools::core::{Tool, ToolError, ToolFuture};
use crate::ToolDef;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Deserialize, JsonSchema)]
struct UpsertMemoryArgs {
    /// The finding to remember.
    content: String,
    /// The situation the finding applies to (protocol, host, flow pattern).
    context: String,
    /// Key of an existing memory to overwrite. Omit to create a new one.
    #[serde(default)]
    memory_id: Option<String>,
}

/// Generate a unique memory key from a nanosecond timestamp and a process-wide
/// counter, so keys stay unique even within the same nanosecond.
fn generate_memory_key() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mem-{ts:x}-{count:04x}")
}

/// Tool that inserts or overwrites a note in the recall store.
///
/// The one deliberately impure tool in the set: everything else observes the
/// capture, this one writes shared state that later invocations (and
/// concurrent loops) can recall.
pub struct UpsertMemoryTool {
    store: Arc<dyn RecallStore>,
    collection: String,
}

impl UpsertMemoryTool {
    pub fn new(store: Arc<dyn RecallStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }
}

impl Tool for UpsertMemoryTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "upsert_memory",
            "Save a finding for recall in later analysis. Pass memory_id to update an \
             existing note instead of creating a new one.",
            json_schema_for::<UpsertMemoryArgs>(),
        )
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: UpsertMemoryArgs = serde_json::from_str(&arguments)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

            let key = args.memory_id.unwrap_or_else(generate_memory_key);
            let record = MemoryRecord {
                key: key.clone(),
                content: args.content,
                context: args.context,
            };
            self.store
                .upsert(&self.collection, record)
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;

            info!("Stored memory {key} in collection {}", self.collection);
            Ok(format!("Stored memory {key}"))
        })
    }
}
