//! Deterministic token counting.
//!
//! Every budget decision in the runtime — history ceilings, per-flow
//! allocations, truncation — goes through the same counter, so the numbers
//! are comparable everywhere. The tokenizer splits text into maximal runs of
//! whitespace and non-whitespace; concatenating the runs reproduces the input
//! byte-for-byte, which is what lets the chunker guarantee exact
//! reconstruction.
//!
//! Counts are an accounting approximation of the provider's real tokenizer,
//! not a prediction of billing. What matters is that they are deterministic
//! and monotonic: longer text never counts fewer tokens.

/// Fixed per-message framing overhead (role and separators on the wire).
pub const MESSAGE_FRAMING_TOKENS: usize = 4;

/// Fixed reply-priming overhead charged once per message.
pub const PRIMING_TOKENS: usize = 2;

/// Split text into maximal runs of whitespace / non-whitespace characters.
///
/// Lossless: `tokens.concat() == text` for every input.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut run_is_ws: Option<bool> = None;

    for (idx, ch) in text.char_indices() {
        let is_ws = ch.is_whitespace();
        match run_is_ws {
            Some(current) if current == is_ws => {}
            Some(_) => {
                tokens.push(&text[start..idx]);
                start = idx;
                run_is_ws = Some(is_ws);
            }
            None => run_is_ws = Some(is_ws),
        }
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Number of tokens in a piece of text, without message overhead.
pub fn token_len(text: &str) -> usize {
    tokenize(text).len()
}

/// Token cost of a message body: framing + content tokens + priming.
///
/// An empty body still costs the fixed overhead, so the count is monotonic
/// in content length and never zero.
pub fn count_text(text: &str) -> usize {
    MESSAGE_FRAMING_TOKENS + token_len(text) + PRIMING_TOKENS
}

/// Token cost of a conversation message. Tool-call metadata is charged via
/// its serialized arguments so assistant tool-call messages are not free.
pub fn count_message(message: &crate::Message) -> usize {
    let mut count = count_text(message.text());
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            count += token_len(&call.function.name) + token_len(&call.function.arguments);
        }
    }
    count
}
