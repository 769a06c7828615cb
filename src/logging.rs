//! Structured Logging for the Bitcoin Bridge
//!
//! Provides structured logging with:
//! - JSON output for log aggregation
//! - Pretty output for development
//! - Structured events for difficulty retargets and SPV proof submissions
//!
//! # Usage
//!
//! ```rust,no_run
//! use btc_bridge::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true).unwrap();
//! tracing::info!(target: "btc_bridge::maintainer", epoch = 392, "epoch proven");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Event categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Difficulty relay retargets
    Difficulty,
    /// SPV proof submissions
    Spv,
    /// Startup and shutdown
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (RFC 3339)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Additional structured data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for failed events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.as_filter().to_uppercase(),
            category,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    /// Add structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add error details
    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }
}

/// Log a retarget submitted to the difficulty relay
pub fn log_retarget_event(
    epoch: u64,
    first_header_height: u64,
    last_header_height: u64,
    with_refund: bool,
    error: Option<&str>,
) {
    let success = error.is_none();
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Difficulty, "retarget")
        .with_data(serde_json::json!({
            "epoch": epoch,
            "first_header_height": first_header_height,
            "last_header_height": last_header_height,
            "with_refund": with_refund,
            "success": success
        }));

    if let Some(err) = error {
        event = event.with_error("RETARGET_ERROR", err);
    }

    if success {
        tracing::info!(target: "btc_bridge::maintainer", "{}", event.to_json());
    } else {
        tracing::error!(target: "btc_bridge::maintainer", "{}", event.to_json());
    }
}

/// Log an SPV proof submitted to the bridge
pub fn log_proof_submission_event(
    proof_type: &str,
    transaction_hash: &str,
    confirmations: u64,
    error: Option<&str>,
) {
    let success = error.is_none();
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, EventCategory::Spv, proof_type)
        .with_data(serde_json::json!({
            "transaction_hash": transaction_hash,
            "confirmations": confirmations,
            "success": success
        }));

    if let Some(err) = error {
        event = event.with_error("PROOF_SUBMISSION_ERROR", err);
    }

    if success {
        tracing::info!(target: "btc_bridge::spv", "{}", event.to_json());
    } else {
        tracing::error!(target: "btc_bridge::spv", "{}", event.to_json());
    }
}

/// Build the event of a maintainer starting or stopping
pub fn maintainer_lifecycle_event(maintainer: &str, running: bool) -> LogEvent {
    let message = if running { "maintainer_started" } else { "maintainer_stopped" };
    LogEvent::new(LogLevel::Info, EventCategory::System, message)
        .with_data(serde_json::json!({ "maintainer": maintainer }))
}

/// Log a maintainer starting or stopping
pub fn log_maintainer_lifecycle_event(maintainer: &str, running: bool) {
    let event = maintainer_lifecycle_event(maintainer, running);
    tracing::info!(target: "btc_bridge::maintainer", "{}", event.to_json());
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("btc_bridge={}", level.as_filter())));

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from `BridgeConfig`
pub fn init_from_config(config: &crate::config::BridgeConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.log_json)
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Difficulty, "retarget")
            .with_data(serde_json::json!({"epoch": 392}));

        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["level"], "INFO");
        assert_eq!(json["category"], "difficulty");
        assert_eq!(json["message"], "retarget");
        assert_eq!(json["data"]["epoch"], 392);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_log_event_with_error() {
        let event = LogEvent::new(LogLevel::Error, EventCategory::Spv, "deposit_sweep")
            .with_error("PROOF_SUBMISSION_ERROR", "reverted");

        let json = event.to_json();
        assert!(json.contains("PROOF_SUBMISSION_ERROR"));
        assert!(json.contains("reverted"));
        assert!(json.contains("\"category\":\"spv\""));
    }

    #[test]
    fn test_maintainer_lifecycle_event() {
        let started: serde_json::Value =
            serde_json::from_str(&maintainer_lifecycle_event("spv", true).to_json()).unwrap();
        assert_eq!(started["category"], "system");
        assert_eq!(started["message"], "maintainer_started");
        assert_eq!(started["data"]["maintainer"], "spv");

        let stopped = maintainer_lifecycle_event("difficulty", false);
        assert_eq!(stopped.category, EventCategory::System);
        assert_eq!(stopped.message, "maintainer_stopped");
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
        assert_eq!(Level::from(LogLevel::Trace), Level::TRACE);
    }
}
