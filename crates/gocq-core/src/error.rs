//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why a live-log subscriber could not take an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("subscriber channel is closed")]
    Closed,

    #[error("subscriber channel is full")]
    Full,
}

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Registry Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No process registered for account {uin}")]
    NotFound { uin: u64 },

    #[error("Account {uin} is already registered")]
    DuplicateAccount { uin: u64 },

    // ─────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Process for account {uin} is already running")]
    AlreadyRunning { uin: u64 },

    #[error("Process for account {uin} is not running")]
    NotRunning { uin: u64 },

    #[error("Failed to launch gateway for account {uin}: {reason}")]
    LaunchFailure { uin: u64, reason: String },

    #[error("Gateway for account {uin} is not reading its input")]
    InputBacklog { uin: u64 },

    #[error("Gateway binary not found: {binary}")]
    BinaryNotFound { binary: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Log Fan-out Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Log subscriber delivery failed: {0}")]
    SubscriberDelivery(#[from] DeliveryError),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn launch_failure(uin: u64, reason: impl Into<String>) -> Self {
        Self::LaunchFailure {
            uin,
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this error is a controlled condition the caller can act on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::DuplicateAccount { .. }
                | Error::AlreadyRunning { .. }
                | Error::NotRunning { .. }
                | Error::InputBacklog { .. }
                | Error::LaunchFailure { .. }
                | Error::BinaryNotFound { .. }
                | Error::SubscriberDelivery(_)
        )
    }

    /// Check if this error should abort the supervisor at startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::ConfigNotFound { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions (for use with color-eyre)
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
