//! # gocq-daemon - Gateway Process Management
//!
//! Owns the OS side of supervision: spawning go-cqhttp per account, capturing
//! its output, buffering recent history and fanning new lines out to live
//! subscribers.
//!
//! Depends on [`gocq_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Lifecycle
//! - [`GoCQProcess`] - Start/stop/status state machine for one account
//! - [`ProcessHandle`] - Shared `Arc<GoCQProcess>`
//! - [`LifecycleSnapshot`] - Watchable lifecycle state
//!
//! ### OS Process
//! - [`ChildProcess`] - One spawned process with reader, writer and wait tasks
//! - [`ExitWatcher`], [`ChildExit`] - Observe and describe a child's exit
//! - [`LaunchSpec`] - Binary, arguments and per-account working directory
//!
//! ### Log Fan-out
//! - [`LogBuffer`] - Bounded history plus subscriber registry
//! - [`LogSink`], [`FnSink`] - Non-blocking delivery targets
//! - [`LogSubscription`] - Channel-backed live stream that unsubscribes on drop

pub mod child;
pub mod launch;
pub mod log_buffer;
pub mod process;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use child::{ChildExit, ChildProcess, ExitWatcher};
pub use launch::{
    LaunchSpec, DEFAULT_BINARY, DEFAULT_STARTUP_PROBE, DEFAULT_STOP_TIMEOUT, DEVICE_FILENAME,
};
pub use log_buffer::{
    FnSink, LogBuffer, LogSink, LogSubscription, SubscriptionId, DEFAULT_LOG_CAPACITY,
    DEFAULT_SUBSCRIBER_CAPACITY,
};
pub use process::{GoCQProcess, LifecycleSnapshot, ProcessHandle};
