//! # Router Telemetry
//!
//! Structured logging for processes embedding the topic router.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use router_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TR_SERVICE_NAME` | `topic-router` | Service name attached to logs |
//! | `TR_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `TR_JSON_LOGS` | `false` | Emit JSON lines instead of pretty output |
//! | `TR_CONSOLE_OUTPUT` | `true` | Write logs to stdout at all |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
