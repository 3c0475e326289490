//! # In-Memory Physical Queue
//!
//! Single-process implementation of [`PhysicalQueue`].
//!
//! Uses a `tokio::sync::mpsc` channel drained by one worker task, so the
//! delivery callback is never invoked concurrently. Sends never wait: a
//! handler may enqueue follow-up work from inside its own delivery. The
//! number of records waiting for the worker is capped by
//! [`MemoryQueueConfig::capacity`]; past it `submit` is rejected.
//!
//! Suitable for tests and single-node operation; durable deployments plug a
//! real queue in behind the same port.

use crate::config::MemoryQueueConfig;
use crate::domain::{EnqueueOptions, QueueError, StorageKey};
use crate::ports::{DeliveryCallback, PhysicalQueue};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A record accepted by [`InMemoryQueue::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// The record as handed to the queue.
    pub record: Value,
    /// The options it was submitted with.
    pub options: EnqueueOptions,
}

/// Records staged for atomic submission.
///
/// Dropping the transaction without committing discards everything staged.
#[derive(Debug, Default)]
pub struct InMemoryTransaction {
    staged: Vec<Submission>,
}

impl InMemoryTransaction {
    /// Create an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Staged records, in staging order.
    #[must_use]
    pub fn staged(&self) -> &[Submission] {
        &self.staged
    }
}

struct Delivery {
    id: Uuid,
    record: Value,
    options: EnqueueOptions,
    attempt: usize,
}

struct QueueState {
    closed: AtomicBool,
    reject_submits: AtomicBool,
    subscribe_calls: AtomicUsize,
    pending: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
    submissions: Mutex<Vec<Submission>>,
    undelivered: Mutex<HashMap<StorageKey, Vec<Value>>>,
    shutdown: watch::Sender<bool>,
}

/// In-memory queue with one delivery subscription.
pub struct InMemoryQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    state: Arc<QueueState>,
    config: MemoryQueueConfig,
}

impl InMemoryQueue {
    /// Create a queue with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryQueueConfig::default())
    }

    /// Create a queue that keeps every submitted record, for tests.
    #[must_use]
    pub fn recording() -> Self {
        Self::with_config(MemoryQueueConfig {
            record_submissions: true,
            ..MemoryQueueConfig::default()
        })
    }

    /// Create a queue with explicit configuration.
    #[must_use]
    pub fn with_config(config: MemoryQueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            state: Arc::new(QueueState {
                closed: AtomicBool::new(false),
                reject_submits: AtomicBool::new(false),
                subscribe_calls: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                submissions: Mutex::new(Vec::new()),
                undelivered: Mutex::new(HashMap::new()),
                shutdown,
            }),
            config,
        }
    }

    /// Submit every record staged in `tx`, in staging order.
    ///
    /// # Errors
    ///
    /// `QueueError::Closed` if the queue has been released, `Rejected` if it
    /// is full. Records staged after the failing one are not sent.
    pub async fn commit(&self, tx: InMemoryTransaction) -> Result<usize, QueueError> {
        let count = tx.staged.len();
        for Submission { record, options } in tx.staged {
            self.push(record, options)?;
        }
        debug!(records = count, "Transaction committed");
        Ok(count)
    }

    /// Write a raw record straight into the queue, bypassing `submit`.
    ///
    /// Models a producer that does not speak the envelope protocol.
    ///
    /// # Errors
    ///
    /// `QueueError::Closed` if the queue has been released.
    pub async fn inject_raw(&self, record: Value) -> Result<(), QueueError> {
        self.push(record, EnqueueOptions::default())
    }

    /// Make every subsequent `submit` fail (or succeed again).
    pub fn set_reject_submits(&self, reject: bool) {
        self.state.reject_submits.store(reject, Ordering::SeqCst);
    }

    /// Records accepted by `submit`, in order.
    ///
    /// Always empty unless `record_submissions` is configured.
    #[must_use]
    pub fn submissions(&self) -> Vec<Submission> {
        self.state.submissions.lock().clone()
    }

    /// Records accepted but not yet taken by the delivery worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Number of `subscribe` calls received, successful or not.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.state.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Deliveries the callback accepted.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.state.delivered.load(Ordering::SeqCst)
    }

    /// Delivery attempts the callback failed.
    #[must_use]
    pub fn failed_count(&self) -> u64 {
        self.state.failed.load(Ordering::SeqCst)
    }

    /// Records parked at `key` after exhausting their delivery attempts.
    #[must_use]
    pub fn undelivered(&self, key: &StorageKey) -> Vec<Value> {
        self.state
            .undelivered
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the queue has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    fn push(&self, record: Value, options: EnqueueOptions) -> Result<(), QueueError> {
        let sender = self.live_sender()?;
        self.reserve_slot()?;

        let delivery = Delivery {
            id: Uuid::new_v4(),
            record,
            options,
            attempt: 0,
        };

        if let Some(delay) = delivery.options.delay.filter(|d| !d.is_zero()) {
            debug!(id = %delivery.id, ?delay, "Delivery delayed");
            schedule(sender, delivery, delay);
            return Ok(());
        }
        sender.send(delivery).map_err(|_| {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            QueueError::Closed
        })
    }

    /// Count one more waiting record, or refuse if the queue is full.
    fn reserve_slot(&self) -> Result<(), QueueError> {
        let capacity = self.config.capacity.max(1);
        self.state
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                (pending < capacity).then_some(pending + 1)
            })
            .map(|_| ())
            .map_err(|pending| {
                warn!(pending, capacity, "In-memory queue full, rejecting record");
                QueueError::Rejected(format!("queue is full ({pending} records waiting)"))
            })
    }

    fn live_sender(&self) -> Result<mpsc::UnboundedSender<Delivery>, QueueError> {
        if self.is_released() {
            return Err(QueueError::Closed);
        }
        self.sender.lock().clone().ok_or(QueueError::Closed)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryQueue {
    fn drop(&mut self) {
        // Stops the worker even if the queue was never released.
        self.state.shutdown.send_replace(true);
    }
}

#[async_trait]
impl PhysicalQueue for InMemoryQueue {
    type Transaction = InMemoryTransaction;

    async fn submit(&self, record: Value, options: &EnqueueOptions) -> Result<(), QueueError> {
        if self.state.reject_submits.load(Ordering::SeqCst) {
            return Err(QueueError::Rejected("queue is rejecting submits".to_string()));
        }
        if self.is_released() {
            return Err(QueueError::Closed);
        }

        let recorded = self.config.record_submissions.then(|| record.clone());
        self.push(record, options.clone())?;

        if let Some(record) = recorded {
            self.state.submissions.lock().push(Submission {
                record,
                options: options.clone(),
            });
        }
        Ok(())
    }

    fn stage(&self, tx: &mut Self::Transaction, record: Value, options: &EnqueueOptions) {
        tx.staged.push(Submission {
            record,
            options: options.clone(),
        });
    }

    async fn subscribe(&self, callback: DeliveryCallback) -> Result<(), QueueError> {
        self.state.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_released() {
            return Err(QueueError::Closed);
        }

        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(QueueError::AlreadySubscribed)?;
        let sender = self.live_sender()?;

        tokio::spawn(run_worker(
            receiver,
            sender,
            callback,
            Arc::clone(&self.state),
            self.config.default_backoff.clone(),
        ));
        debug!("Delivery worker started");
        Ok(())
    }

    async fn release(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sender.lock().take();
        self.state.shutdown.send_replace(true);
        debug!("In-memory queue released");
    }
}

/// Re-send `delivery` after `delay` unless the queue shuts down first.
fn schedule(sender: mpsc::UnboundedSender<Delivery>, delivery: Delivery, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if sender.send(delivery).is_err() {
            debug!("Queue closed before scheduled delivery");
        }
    });
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Delivery>,
    sender: mpsc::UnboundedSender<Delivery>,
    callback: DeliveryCallback,
    state: Arc<QueueState>,
    default_backoff: Vec<Duration>,
) {
    let mut shutdown = state.shutdown.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut delivery = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = receiver.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        state.pending.fetch_sub(1, Ordering::SeqCst);

        match callback(delivery.record.clone()).await {
            Ok(()) => {
                state.delivered.fetch_add(1, Ordering::SeqCst);
                debug!(id = %delivery.id, attempt = delivery.attempt, "Delivery acknowledged");
            }
            Err(e) => {
                state.failed.fetch_add(1, Ordering::SeqCst);
                let backoff = delivery
                    .options
                    .backoff_schedule
                    .as_ref()
                    .unwrap_or(&default_backoff);

                if let Some(delay) = backoff.get(delivery.attempt).copied() {
                    warn!(
                        id = %delivery.id,
                        attempt = delivery.attempt,
                        retry_in = ?delay,
                        error = %e,
                        "Delivery failed, scheduling redelivery"
                    );
                    delivery.attempt += 1;
                    state.pending.fetch_add(1, Ordering::SeqCst);
                    schedule(sender.clone(), delivery, delay);
                } else {
                    park_undelivered(&state, delivery, &e.to_string());
                }
            }
        }
    }

    debug!("Delivery worker stopped");
}

fn park_undelivered(state: &QueueState, delivery: Delivery, reason: &str) {
    if delivery.options.keys_if_undelivered.is_empty() {
        error!(
            id = %delivery.id,
            attempts = delivery.attempt + 1,
            error = reason,
            "Delivery attempts exhausted, message dropped"
        );
        return;
    }

    let mut undelivered = state.undelivered.lock();
    for key in &delivery.options.keys_if_undelivered {
        undelivered
            .entry(key.clone())
            .or_default()
            .push(delivery.record.clone());
    }
    error!(
        id = %delivery.id,
        attempts = delivery.attempt + 1,
        keys = delivery.options.keys_if_undelivered.len(),
        error = reason,
        "Delivery attempts exhausted, message parked"
    );
}
