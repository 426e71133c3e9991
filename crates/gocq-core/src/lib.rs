//! # gocq-core - Core Domain Types
//!
//! Foundation crate for the go-cqhttp supervisor. Provides account settings,
//! log line and lifecycle types, error handling, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Accounts (`account`)
//! - [`AccountConfig`] - Immutable per-account settings (uin, credentials, extras)
//! - [`ProcessAccount`] - Account metadata without sensitive configuration
//!
//! ### Domain Types (`types`)
//! - [`ProcessLog`] - A captured output line with stream tag and timestamp
//! - [`LogStream`], [`LogLevel`] - Origin and severity of a log line
//! - [`ProcessState`] - Lifecycle state (Stopped, Starting, Running, Stopping)
//! - [`ProcessInfo`], [`ExitInfo`] - Status snapshot and exit record
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use gocq_core::prelude::*;
//! ```

pub mod account;
pub mod ansi;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

pub use account::{AccountConfig, ProcessAccount};
pub use ansi::{contains_ansi_codes, detect_log_level, strip_ansi_codes};
pub use error::{DeliveryError, Error, Result, ResultExt};
pub use types::{ExitInfo, LogLevel, LogStream, ProcessInfo, ProcessLog, ProcessState};
