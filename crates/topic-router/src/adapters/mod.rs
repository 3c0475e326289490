//! Adapters: concrete physical queue implementations.

pub mod memory;

pub use memory::{InMemoryQueue, InMemoryTransaction, Submission};
