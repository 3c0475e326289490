//! Router error types.
//!
//! Every failure is surfaced to the caller or to the physical queue's
//! delivery machinery. Nothing is swallowed.

use super::key::TopicId;
use thiserror::Error;

/// Error type returned by topic handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported by a physical queue implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue refused the message.
    #[error("queue rejected message: {0}")]
    Rejected(String),

    /// A delivery callback is already registered on this connection.
    #[error("queue already has a delivery subscription")]
    AlreadySubscribed,

    /// The queue connection has been released.
    #[error("queue connection closed")]
    Closed,
}

/// Errors from router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No handler is registered locally for the topic.
    #[error("no listener registered for topic {topic}")]
    NoListener { topic: TopicId },

    /// A delivered message was not written by this protocol.
    #[error("unrecognized message format: {found}")]
    UnrecognizedFormat { found: String },

    /// The physical queue rejected a direct submit.
    #[error("failed to enqueue message for topic {topic}: {source}")]
    EnqueueFailed {
        topic: TopicId,
        #[source]
        source: QueueError,
    },

    /// The router has been closed.
    #[error("router connection closed")]
    ConnectionClosed,

    /// A key or payload could not be encoded.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// A delivered payload did not match the handler's expected type.
    #[error("payload for topic {topic} could not be decoded: {reason}")]
    Payload { topic: TopicId, reason: String },

    /// The physical queue refused the delivery subscription.
    #[error("failed to subscribe to queue: {0}")]
    Subscribe(#[source] QueueError),

    /// A topic handler failed while processing a message.
    #[error("handler for topic {topic} failed: {reason}")]
    Handler { topic: TopicId, reason: String },
}

impl RouterError {
    /// Topic the error refers to, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&TopicId> {
        match self {
            Self::NoListener { topic }
            | Self::EnqueueFailed { topic, .. }
            | Self::Payload { topic, .. }
            | Self::Handler { topic, .. } => Some(topic),
            _ => None,
        }
    }
}
