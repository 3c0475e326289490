//! Enqueue options forwarded to the physical queue.

use super::key::StorageKey;
use std::time::Duration;

/// Per-message delivery options.
///
/// The router only reads `keys_if_undelivered` (it is copied into the
/// envelope). Everything else is interpreted by the physical queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Delays between redelivery attempts after a failed delivery.
    pub backoff_schedule: Option<Vec<Duration>>,

    /// Where to park the message once every delivery attempt has failed.
    pub keys_if_undelivered: Vec<StorageKey>,

    /// Delay before the first delivery attempt.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Options with nothing set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry backoff schedule.
    #[must_use]
    pub fn with_backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.backoff_schedule = Some(schedule);
        self
    }

    /// Set the fallback storage keys for undelivered messages.
    #[must_use]
    pub fn with_keys_if_undelivered(mut self, keys: Vec<StorageKey>) -> Self {
        self.keys_if_undelivered = keys;
        self
    }

    /// Set the initial delivery delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}
