//! gocq-app - Account registry and supervision policy for the go-cqhttp supervisor
//!
//! This crate holds the account registry, the boundary operations every front
//! end goes through, configuration loading, and the crash restart watchdog.

pub mod config;
pub mod service;
pub mod supervisor;
pub mod watchdog;

// Re-export primary types
pub use config::Settings;
pub use service::{AccountCreation, ProcessService};
pub use supervisor::ProcessSupervisor;
pub use watchdog::{RestartPolicy, Watchdog};

// Re-export daemon types for front ends
pub use gocq_daemon::{LogSubscription, ProcessHandle};
