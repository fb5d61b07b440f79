//! Overlapping chunking and head/tail truncation of flow text.
//!
//! Two ways to fit oversized flow text into a token allowance:
//!
//! - [`chunk_with_overlap`] splits text into windows that each fit a model
//!   call, overlapping by a fixed number of tokens so that a pattern
//!   straddling a boundary is visible in at least one chunk whole.
//! - [`truncate_middle`] keeps the head and tail of a flow and drops the
//!   middle behind an explicit marker. Session setup and teardown carry most
//!   of the signal in capture data; the bulk payload in between rarely does.

use super::tokens::{token_len, tokenize};

/// Marker inserted where the middle of a flow was dropped.
pub const TRUNCATION_MARKER: &str = "\n--- final part of the flow ---\n";

/// Fraction of the model context window a single flow may occupy.
const CONTEXT_WINDOW_CAP: f64 = 0.9;

/// Split text into chunks of at most `max_tokens` tokens, each overlapping
/// the previous one by `overlap` tokens.
///
/// Windows advance by `max_tokens - overlap`, so concatenating the first
/// chunk with every later chunk minus its first `overlap` tokens
/// reconstructs the input exactly. `overlap` is clamped below `max_tokens`
/// so the window always advances.
pub fn chunk_with_overlap(text: &str, max_tokens: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || max_tokens == 0 {
        return Vec::new();
    }
    let tokens = tokenize(text);
    if tokens.len() <= max_tokens {
        return vec![text.to_string()];
    }

    let overlap = overlap.min(max_tokens - 1);
    let step = max_tokens - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + max_tokens).min(tokens.len());
        chunks.push(tokens[start..end].concat());
        if end == tokens.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Truncate flow text to roughly `allocation` tokens, keeping the first and
/// last `allocation / 2` tokens and dropping the middle behind
/// [`TRUNCATION_MARKER`].
///
/// An allocation above 90% of `context_window` is clamped down to it — a
/// single flow must never crowd out the instructions and history sharing the
/// call. Text already within the allowance is returned unchanged.
pub fn truncate_middle(text: &str, allocation: usize, context_window: usize) -> String {
    let mut allowance = allocation;
    if context_window > 0 {
        let cap = (context_window as f64 * CONTEXT_WINDOW_CAP) as usize;
        if allowance > cap {
            allowance = cap;
        }
    }

    let tokens = tokenize(text);
    if tokens.len() <= allowance {
        return text.to_string();
    }

    let half = allowance / 2;
    let head = tokens[..half].concat();
    let tail = tokens[tokens.len() - half..].concat();
    format!("{head}{TRUNCATION_MARKER}{tail}")
}

/// Token length of text after truncation to `allocation`, marker included.
/// Used by the survey pipeline when accounting per-flow prompt cost.
pub fn truncated_len(text: &str, allocation: usize, context_window: usize) -> usize {
    token_len(&truncate_middle(text, allocation, context_window))
}
