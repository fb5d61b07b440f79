//! Cross-invocation recall of investigation notes.

pub mod store;

pub use store::{InMemoryRecallStore, MemoryRecord, RecallStore, ScoredMemory, StoreError};
