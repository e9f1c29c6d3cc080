//! Per-item processing pipeline.
//!
//! A claimed queue item flows through:
//! 1. `extract`: tolerant decoding of the webhook payload
//! 2. `rules`: lead quota and account gates (pure)
//! 3. `context`: trailing-window chat history for the prompt
//! 4. `processor`: the state machine tying the above to the store,
//!    the AI workflow, and the messaging transport

pub mod context;
pub mod extract;
pub mod locks;
pub mod processor;
pub mod rules;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use locks::UserLocks;
pub use processor::ItemProcessor;
pub use types::{ExtractedMessage, ItemOutcome, MessageKind};
