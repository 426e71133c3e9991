//! Headless mode - NDJSON event stream on stdout
//!
//! Every registered account's log lines and lifecycle transitions are written
//! to stdout as NDJSON (newline-delimited JSON), one event per line. Each
//! event has an "event" field naming its type.
//!
//! # Example Output
//!
//! ```json
//! {"event":"account_registered","uin":10001,"has_password":true,"timestamp":1704700001000}
//! {"event":"process_started","uin":10001,"pid":4242,"timestamp":1704700002000}
//! {"event":"log","uin":10001,"stream":"stdout","level":"info","message":"login ok","timestamp":1704700003000}
//! {"event":"process_stopped","uin":10001,"code":0,"signal":null,"expected":true,"timestamp":1704700004000}
//! ```

pub mod commands;
pub mod runner;
pub mod signals;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;

use gocq_core::{
    ExitInfo, LogLevel, LogStream, ProcessAccount, ProcessInfo, ProcessLog, ProcessState,
};

/// Events emitted in headless mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Account added to the registry
    AccountRegistered {
        uin: u64,
        has_password: bool,
        timestamp: i64,
    },

    /// Lifecycle state changed
    StateChanged {
        uin: u64,
        state: ProcessState,
        timestamp: i64,
    },

    /// Gateway passed its startup probe
    ProcessStarted {
        uin: u64,
        pid: Option<u32>,
        timestamp: i64,
    },

    /// Gateway exited, requested or not
    ProcessStopped {
        uin: u64,
        code: Option<i32>,
        signal: Option<i32>,
        expected: bool,
        timestamp: i64,
    },

    /// One line of gateway output or supervisor lifecycle message
    Log {
        uin: u64,
        stream: LogStream,
        #[serde(skip_serializing_if = "Option::is_none")]
        level: Option<LogLevel>,
        message: String,
        timestamp: i64,
    },

    /// Reply to a `status` command
    Status {
        #[serde(flatten)]
        info: ProcessInfo,
        timestamp: i64,
    },

    /// Error occurred
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        uin: Option<u64>,
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Write this event as one NDJSON line and flush
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        writeln!(out, "{}", json)?;
        out.flush()
    }

    /// Get current timestamp in milliseconds
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn account_registered(account: &ProcessAccount) -> Self {
        Self::AccountRegistered {
            uin: account.uin,
            has_password: account.has_password,
            timestamp: Self::now(),
        }
    }

    pub fn state_changed(uin: u64, state: ProcessState) -> Self {
        Self::StateChanged {
            uin,
            state,
            timestamp: Self::now(),
        }
    }

    pub fn process_started(uin: u64, pid: Option<u32>) -> Self {
        Self::ProcessStarted {
            uin,
            pid,
            timestamp: Self::now(),
        }
    }

    pub fn process_stopped(uin: u64, exit: &ExitInfo) -> Self {
        Self::ProcessStopped {
            uin,
            code: exit.code,
            signal: exit.signal,
            expected: exit.expected,
            timestamp: exit.time.timestamp_millis(),
        }
    }

    /// Log events carry the line's capture time, not the emit time
    pub fn log(uin: u64, line: &ProcessLog) -> Self {
        Self::Log {
            uin,
            stream: line.stream,
            level: line.level,
            message: line.message.clone(),
            timestamp: line.time.timestamp_millis(),
        }
    }

    pub fn status(info: ProcessInfo) -> Self {
        Self::Status {
            info,
            timestamp: Self::now(),
        }
    }

    pub fn error(uin: Option<u64>, message: String, fatal: bool) -> Self {
        Self::Error {
            uin,
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}
