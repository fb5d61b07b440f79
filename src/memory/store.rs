//! The recall store: keyed investigation notes shared across loop instances.
//!
//! A [`RecallStore`] holds [`MemoryRecord`]s in named collections and answers
//! similarity queries with scored results. The store is the only resource
//! shared between concurrently running loops, so implementations must be
//! `Send + Sync` and safe under concurrent search/upsert. Upserting an
//! existing key overwrites the record in place; there is no delete.
//!
//! [`InMemoryRecallStore`] is the default backend: a `tokio::sync::RwLock`
//! over nested maps with lexical-overlap scoring. Writes are visible to every
//! subsequent search — stronger than the eventual visibility the trait
//! requires, which keeps tests deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Boxed future returned by [`RecallStore`] methods.
///
/// Type alias to keep trait signatures readable and the trait dyn-compatible.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors surfaced by a recall store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("recall store backend error: {0}")]
    Backend(String),
}

/// A single stored note: what was learned and in what situation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRecord {
    /// Unique key within a collection. Upserts with the same key overwrite.
    pub key: String,
    /// The content of the note.
    pub content: String,
    /// Free-form description of the situation the note applies to.
    pub context: String,
}

/// A record paired with its relevance score for a particular query.
#[derive(Clone, Debug)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    /// Relevance in `[0, 1]`, higher is more relevant.
    pub score: f64,
}

/// Storage backend for recalled memories.
///
/// Injected into the assembler and the memory tools as `&dyn RecallStore` /
/// `Arc<dyn RecallStore>` so tests can substitute deterministic stubs and
/// deployments can swap in a vector database without touching the loop.
pub trait RecallStore: Send + Sync {
    /// Search a collection for records relevant to `query`, best first,
    /// at most `limit` results.
    fn search<'a>(
        &'a self,
        collection: &'a str,
        query: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, Vec<ScoredMemory>>;

    /// Insert or overwrite a record in a collection.
    fn upsert<'a>(&'a self, collection: &'a str, record: MemoryRecord) -> StoreFuture<'a, ()>;
}

// ── In-memory implementation ───────────────────────────────────────

/// In-memory recall store with lexical-overlap relevance scoring.
///
/// Cheap to clone — clones share the same underlying map.
#[derive(Clone, Default)]
pub struct InMemoryRecallStore {
    collections: Arc<RwLock<HashMap<String, HashMap<String, MemoryRecord>>>>,
}

impl InMemoryRecallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Fraction of query words present in the record's content or context.
fn overlap_score(query_words: &HashSet<String>, record: &MemoryRecord) -> f64 {
    if query_words.is_empty() {
        return 0.0;
    }
    let mut record_words = word_set(&record.content);
    record_words.extend(word_set(&record.context));
    let hits = query_words.iter().filter(|w| record_words.contains(*w)).count();
    hits as f64 / query_words.len() as f64
}

impl RecallStore for InMemoryRecallStore {
    fn search<'a>(
        &'a self,
        collection: &'a str,
        query: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, Vec<ScoredMemory>> {
        Box::pin(async move {
            let query_words = word_set(query);
            let collections = self.collections.read().await;
            let mut scored: Vec<ScoredMemory> = collections
                .get(collection)
                .map(|records| {
                    records
                        .values()
                        .map(|r| ScoredMemory {
                            score: overlap_score(&query_words, r),
                            record: r.clone(),
                        })
                        .filter(|s| s.score > 0.0)
                        .collect()
                })
                .unwrap_or_default();

            // Key as tiebreak so equal scores order deterministically.
            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.record.key.cmp(&b.record.key))
            });
            scored.truncate(limit);
            debug!(
                "Recall search: collection={collection}, {} hit(s) for {} query word(s)",
                scored.len(),
                query_words.len()
            );
            Ok(scored)
        })
    }

    fn upsert<'a>(&'a self, collection: &'a str, record: MemoryRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut collections = self.collections.write().await;
            let replaced = collections
                .entry(collection.to_string())
                .or_default()
                .insert(record.key.clone(), record)
                .is_some();
            debug!("Recall upsert: collection={collection}, replaced={replaced}");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, content: &str, context: &str) -> MemoryRecord {
        MemoryRecord {
            key: key.into(),
            content: content.into(),
            context: context.into(),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_in_place() {
        let store = InMemoryRecallStore::new();
        store
            .upsert("notes", record("beacon", "periodic 60s callbacks", "http flows"))
            .await
            .unwrap();
        store
            .upsert("notes", record("beacon", "periodic 30s callbacks", "http flows"))
            .await
            .unwrap();

        assert_eq!(store.len("notes").await, 1);
        let hits = store.search("notes", "periodic callbacks", 10).await.unwrap();
        assert_eq!(hits[0].record.content, "periodic 30s callbacks");
    }

    #[tokio::test]
    async fn search_ranks_by_overlap_and_limits() {
        let store = InMemoryRecallStore::new();
        store
            .upsert("notes", record("dns", "dns tunneling via txt records", "dns flows"))
            .await
            .unwrap();
        store
            .upsert("notes", record("tls", "self-signed tls certificate", "tls flows"))
            .await
            .unwrap();
        store
            .upsert("notes", record("scan", "port scan from internal host", "tcp flows"))
            .await
            .unwrap();

        let hits = store.search("notes", "dns txt tunneling", 10).await.unwrap();
        assert_eq!(hits[0].record.key, "dns");
        assert!(hits[0].score > hits.get(1).map_or(0.0, |h| h.score));

        let limited = store.search("notes", "flows", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn unmatched_query_returns_nothing() {
        let store = InMemoryRecallStore::new();
        store
            .upsert("notes", record("k", "content", "context"))
            .await
            .unwrap();
        assert!(store.search("notes", "zzz", 10).await.unwrap().is_empty());
        assert!(store.search("other", "content", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_upserts_all_land() {
        let store = InMemoryRecallStore::new();
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .upsert("notes", record(&format!("k{i}"), "finding", "flow"))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.len("notes").await, 16);
    }
}
