//! These models represent the objects passed between the HTTP surfaces, the prompt formatter
//! and the conversation store.
//!
//! Incoming chat requests carry content parts in the shape the frontend produces
//! (`{"type": "text", "text": ...}` or `{"type": "file", "content": ...}`). Stored history
//! uses the same shape, so a conversation read back from the store can be fed straight into
//! the formatter after normalization.
pub mod content;
pub mod message;
pub mod role;
pub mod usage;
