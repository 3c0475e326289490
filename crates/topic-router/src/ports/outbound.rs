//! Outbound (driven) port for the physical queue.
//!
//! The router treats the durable queue as a black box: persistence, retry
//! scheduling and transactions all live behind this trait.

use crate::domain::{EnqueueOptions, QueueError, RouterError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// The single delivery callback registered with a physical queue.
///
/// The queue must await the returned future before treating the message as
/// processed. An `Err` hands the message to the queue's own failure policy.
pub type DeliveryCallback =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), RouterError>> + Send + Sync>;

/// A durable queue with one top-level delivery subscription.
#[async_trait]
pub trait PhysicalQueue: Send + Sync + 'static {
    /// Caller-owned atomic transaction that messages can be staged into.
    type Transaction: Send;

    /// Submit a record directly.
    ///
    /// # Errors
    ///
    /// Returns the queue's own error if the record was not accepted.
    async fn submit(&self, record: Value, options: &EnqueueOptions) -> Result<(), QueueError>;

    /// Stage a record into a transaction. Delivery is decided when the caller
    /// commits the transaction.
    fn stage(&self, tx: &mut Self::Transaction, record: Value, options: &EnqueueOptions);

    /// Register the delivery callback for the lifetime of the connection.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::AlreadySubscribed` if a callback is already
    /// registered, or `QueueError::Closed` after release.
    async fn subscribe(&self, callback: DeliveryCallback) -> Result<(), QueueError>;

    /// Release the connection. Must not wait for in-flight deliveries.
    async fn release(&self);
}
