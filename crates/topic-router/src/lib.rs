//! # Topic Router - Logical Topics over One Physical Queue
//!
//! Lets independent producers and consumers share a single durable queue by
//! tagging each message with a topic key and dispatching deliveries back to
//! the handler registered for that key.
//!
//! ## Rules
//!
//! - **Register before use:** `enqueue` fails with `NoListener` unless a
//!   handler for the topic is registered on this router.
//! - **One subscription:** the router subscribes to the physical queue once,
//!   on the first `listen_queue`, no matter how many topics follow.
//! - **Fail loud:** foreign records, orphaned topics and handler failures are
//!   reported to the queue's failure path, never dropped.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────┐ enqueue  ┌─────────────┐ submit  ┌───────────────┐
//! │ Producer │ ───────► │             │ ──────► │               │
//! └──────────┘          │ TopicRouter │         │ PhysicalQueue │
//! ┌──────────┐ handler  │             │ deliver │               │
//! │ Consumer │ ◄─────── │  (dispatch) │ ◄────── │               │
//! └──────────┘          └─────────────┘         └───────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - `domain/`   - topic keys, envelope codec, options, errors
//! - `ports/`    - `PhysicalQueue` contract
//! - `router`    - `TopicRouter`
//! - `adapters/` - `InMemoryQueue`
//! - `config`    - environment-driven settings

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod router;

// Re-export main types
pub use adapters::{InMemoryQueue, InMemoryTransaction, Submission};
pub use config::{MemoryQueueConfig, RouterConfig};
pub use domain::{
    decode, encode, EnqueueOptions, Envelope, HandlerError, KeyPart, QueueError, RouterError,
    StorageKey, TopicId, TopicKey, ENVELOPE_FORMAT,
};
pub use ports::{DeliveryCallback, PhysicalQueue};
pub use router::{Handler, TopicRouter};
