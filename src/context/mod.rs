//! Context management: token counting, budget allocation, chunking, and
//! prompt assembly.
//!
//! The context window is the scarcest resource in the runtime. Everything in
//! this module exists to spend it deliberately: [`tokens`] makes costs
//! measurable, [`budget`] divides a shared allowance across flow units,
//! [`chunk`] fits oversized flow text into an allowance, and [`assembler`]
//! builds each model call's prompt under explicit ceilings.

pub mod assembler;
pub mod budget;
pub mod chunk;
pub mod tokens;

pub use assembler::{ContextAssembler, ContextCeilings};
pub use budget::allocate;
pub use chunk::{TRUNCATION_MARKER, chunk_with_overlap, truncate_middle};
pub use tokens::{count_message, count_text, token_len};
