//! Router and in-memory queue configuration from environment variables.

use std::env;
use std::time::Duration;

/// Default capacity of the in-memory queue channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default redelivery schedule in milliseconds.
pub const DEFAULT_BACKOFF_MS: [u64; 5] = [1000, 2000, 4000, 8000, 16000];

/// Router behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Whether this instance subscribes to the physical queue at all.
    ///
    /// Producer-only processes set this to `false`: handlers are recorded so
    /// `enqueue` accepts their topics, but nothing is consumed here.
    pub listen: bool,

    /// Log a warning when a registration replaces an existing handler.
    pub warn_on_replace: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen: true,
            warn_on_replace: true,
        }
    }
}

impl RouterConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TR_LISTEN`: Subscribe to the physical queue (default: true)
    /// - `TR_WARN_ON_REPLACE`: Warn when a handler is replaced (default: true)
    pub fn from_env() -> Self {
        Self {
            listen: env_flag("TR_LISTEN", true),
            warn_on_replace: env_flag("TR_WARN_ON_REPLACE", true),
        }
    }

    /// Configuration for a process that only produces messages.
    #[must_use]
    pub fn producer_only() -> Self {
        Self {
            listen: false,
            ..Self::default()
        }
    }
}

/// Settings for [`InMemoryQueue`](crate::adapters::InMemoryQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryQueueConfig {
    /// Maximum records waiting for delivery. Past it `submit` fails with
    /// `QueueError::Rejected` instead of waiting.
    pub capacity: usize,

    /// Redelivery schedule used when a message carries none.
    pub default_backoff: Vec<Duration>,

    /// Keep a copy of every submitted record for inspection.
    ///
    /// Off by default: the log is never trimmed.
    pub record_submissions: bool,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            default_backoff: DEFAULT_BACKOFF_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            record_submissions: false,
        }
    }
}

impl MemoryQueueConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TR_QUEUE_CAPACITY`: Channel capacity (default: 1000)
    /// - `TR_DEFAULT_BACKOFF_MS`: Comma-separated delays in milliseconds
    ///   (default: 1000,2000,4000,8000,16000)
    /// - `TR_RECORD_SUBMISSIONS`: Keep submitted records (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            capacity: env::var("TR_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|c| *c > 0)
                .unwrap_or(defaults.capacity),

            default_backoff: env::var("TR_DEFAULT_BACKOFF_MS")
                .ok()
                .and_then(|v| parse_backoff(&v))
                .unwrap_or(defaults.default_backoff),

            record_submissions: env_flag("TR_RECORD_SUBMISSIONS", defaults.record_submissions),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
        .unwrap_or(default)
}

/// Parse a comma-separated list of millisecond delays. An empty string is a
/// valid "no retries" schedule.
fn parse_backoff(raw: &str) -> Option<Vec<Duration>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }

    trimmed
        .split(',')
        .map(|part| part.trim().parse::<u64>().ok().map(Duration::from_millis))
        .collect()
}
