//! Domain types shared by the daemon and app layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ansi::{detect_log_level, strip_ansi_codes};

// ─────────────────────────────────────────────────────────
// Log lines
// ─────────────────────────────────────────────────────────

/// Which stream a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Lifecycle messages emitted by the supervisor itself
    Internal,
}

/// Log severity, as detected from the gateway's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// A single captured line of process output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLog {
    pub time: DateTime<Utc>,
    pub stream: LogStream,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    pub message: String,
}

impl ProcessLog {
    /// Wrap a raw output line, stripping color codes and detecting its level.
    pub fn from_output(stream: LogStream, raw: &str) -> Self {
        let message = strip_ansi_codes(raw);
        let level = detect_log_level(&message).or(match stream {
            LogStream::Stderr => Some(LogLevel::Error),
            _ => None,
        });
        Self {
            time: Utc::now(),
            stream,
            level,
            message,
        }
    }

    /// A supervisor-originated lifecycle message
    pub fn internal(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            stream: LogStream::Internal,
            level: Some(level),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────

/// Lifecycle state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ProcessState {
    /// Whether a start request must be rejected in this state
    pub fn is_active(&self) -> bool {
        !matches!(self, ProcessState::Stopped)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// How the last run of a process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal on unix, when the process did not exit on its own
    pub signal: Option<i32>,
    pub time: DateTime<Utc>,
    /// `false` when the process died without a preceding stop request
    pub expected: bool,
}

impl ExitInfo {
    pub fn is_crash(&self) -> bool {
        !self.expected
    }
}

/// Status snapshot returned by the status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub uin: u64,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
    /// Number of successful starts after the first one
    pub restarts: u32,
    pub last_exit: Option<ExitInfo>,
    pub last_error: Option<String>,
    pub total_logs: u64,
}
