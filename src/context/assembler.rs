//! Token-ceilinged prompt assembly.
//!
//! Each model call is assembled fresh from three parts: the instruction
//! preamble (plus an optional pinned artifact summary), a block of recalled
//! memories, and a suffix of the most recent conversation. History and
//! memories each live under their own token ceiling, and selection is always
//! **strictly below** the ceiling — a selection that exactly hits it already
//! risks the overflow the ceiling exists to prevent.
//!
//! The transcript itself is never trimmed; only the view sent to the model
//! is.

use crate::Message;
use crate::context::tokens::{count_message, count_text, token_len};
use crate::memory::{RecallStore, ScoredMemory};
use tracing::{debug, warn};

/// How many trailing messages contribute to the recall query.
pub const MEMORY_QUERY_MESSAGES: usize = 3;

/// Maximum candidates requested from the store per recall.
pub const MEMORY_RECALL_LIMIT: usize = 10;

/// Token ceilings for the assembled prompt.
#[derive(Debug, Clone, Copy)]
pub struct ContextCeilings {
    /// Ceiling for the recent-history suffix, shared with pinned overhead.
    pub recent_history: usize,
    /// Ceiling for the recalled-memory block.
    pub recalled_memory: usize,
}

impl Default for ContextCeilings {
    fn default() -> Self {
        Self {
            recent_history: 24_000,
            recalled_memory: 4_000,
        }
    }
}

/// Assembles the per-call prompt from preamble, recalled memories, and
/// recent history. Read-only over the store; the store query is its only
/// side effect.
pub struct ContextAssembler<'a> {
    store: &'a dyn RecallStore,
    collection: &'a str,
    ceilings: ContextCeilings,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(store: &'a dyn RecallStore, collection: &'a str, ceilings: ContextCeilings) -> Self {
        Self {
            store,
            collection,
            ceilings,
        }
    }

    /// Assemble the message list for one model call.
    ///
    /// `pinned_summary` is charged against the recent-history ceiling as
    /// fixed overhead before any history is selected, so a large summary
    /// shrinks the history window rather than blowing the ceiling.
    pub async fn assemble(
        &self,
        preamble: &str,
        pinned_summary: Option<&str>,
        history: &[Message],
    ) -> Vec<Message> {
        let pinned_overhead = pinned_summary.map_or(0, count_text);
        let history_ceiling = self.ceilings.recent_history.saturating_sub(pinned_overhead);
        if pinned_overhead > 0 && history_ceiling == 0 {
            warn!("Pinned summary consumes the entire history ceiling");
        }

        let suffix = self.select_recent(history, history_ceiling);
        let memory_block = self.recall_block(history).await;

        let mut system = preamble.to_string();
        if let Some(pinned) = pinned_summary {
            system.push_str("\n\nArtifact summary:\n");
            system.push_str(pinned);
        }
        if let Some(block) = memory_block {
            system.push_str("\n\n");
            system.push_str(&block);
        }

        debug!(
            "Assembled context: {} of {} history message(s), ceiling {}",
            suffix.len(),
            history.len(),
            history_ceiling
        );

        let mut out = Vec::with_capacity(suffix.len() + 1);
        out.push(Message::system(system));
        out.extend(suffix.iter().cloned());
        out
    }

    /// The longest contiguous suffix of `history` whose token cost stays
    /// strictly below `ceiling`. Scans newest-first and emits in
    /// chronological order.
    pub fn select_recent<'h>(&self, history: &'h [Message], ceiling: usize) -> &'h [Message] {
        let mut used = 0;
        let mut start = history.len();
        for (idx, message) in history.iter().enumerate().rev() {
            let cost = count_message(message);
            if used + cost < ceiling {
                used += cost;
                start = idx;
            } else {
                break;
            }
        }
        &history[start..]
    }

    /// Query the store with the last few messages and render the accepted
    /// results into a memory block. `None` when nothing relevant surfaces.
    pub async fn recall_block(&self, history: &[Message]) -> Option<String> {
        let query: String = history
            .iter()
            .rev()
            .take(MEMORY_QUERY_MESSAGES)
            .map(Message::text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if query.is_empty() {
            return None;
        }

        let candidates = match self
            .store
            .search(self.collection, &query, MEMORY_RECALL_LIMIT)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                // Recall is advisory; a failing store must not fail the call.
                warn!("Recall search failed: {e}");
                return None;
            }
        };
        if candidates.is_empty() {
            return None;
        }

        let mut lines = Vec::new();
        let mut used = token_len(MEMORY_BLOCK_HEADER) + token_len(MEMORY_BLOCK_FOOTER);
        for candidate in &candidates {
            let line = render_memory(candidate);
            let cost = token_len(&line);
            if used + cost < self.ceilings.recalled_memory {
                used += cost;
                lines.push(line);
            } else {
                break;
            }
        }
        if lines.is_empty() {
            return None;
        }

        Some(format!(
            "{MEMORY_BLOCK_HEADER}\n{}\n{MEMORY_BLOCK_FOOTER}",
            lines.join("\n")
        ))
    }
}

const MEMORY_BLOCK_HEADER: &str = "<memories>\nNotes recalled from earlier analysis of related traffic. Treat them as hints to verify, not as ground truth.";
const MEMORY_BLOCK_FOOTER: &str = "</memories>";

fn render_memory(memory: &ScoredMemory) -> String {
    format!(
        "{}: {} ({}), score={:.2}",
        memory.record.key.to_uppercase(),
        memory.record.content,
        memory.record.context,
        memory.score
    )
}
