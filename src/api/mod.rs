//! Model API access: typed errors, the [`ModelClient`](client::ModelClient)
//! seam, the OpenRouter HTTP client, and retry with backoff.

pub mod client;
pub mod retry;

pub use client::{ClientFuture, LlmError, ModelClient, OpenRouterClient};
pub use retry::{RetryConfig, invoke_with_retry};
