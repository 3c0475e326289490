//! Telemetry configuration from environment variables.

use std::env;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name recorded on startup
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error, or a directive list)
    pub log_level: String,

    /// Whether to write logs to stdout
    pub console_output: bool,

    /// Whether to format logs as JSON lines
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "topic-router".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TR_SERVICE_NAME`: Service name (default: topic-router)
    /// - `TR_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `TR_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `TR_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("TR_SERVICE_NAME")
                .unwrap_or_else(|_| "topic-router".to_string()),

            log_level: env::var("TR_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("TR_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("TR_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Create configuration for a named service.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = service_name.to_string();
        config
    }
}
