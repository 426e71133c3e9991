//! Configuration types for the go-cqhttp supervisor
//!
//! Defines:
//! - `Settings` - Root of `gocqd.toml`
//! - `GatewaySettings`, `LogSettings`, `RestartSettings` - Its sections
//! - `AccountEntry` - One `[[accounts]]` table

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gocq_core::AccountConfig;

use crate::watchdog::RestartPolicy;
use gocq_daemon::{LaunchSpec, DEFAULT_BINARY, DEFAULT_LOG_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY};

/// Application settings (`gocqd.toml`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub logs: LogSettings,

    #[serde(default)]
    pub restart: RestartSettings,

    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

/// How the gateway binary is launched
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaySettings {
    /// Executable name (looked up in PATH) or path
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Parent of the per-account working directories; relative paths are
    /// resolved against the config file's directory
    #[serde(default = "default_accounts_dir")]
    pub accounts_dir: PathBuf,

    /// A process must survive this long after spawn to count as started
    #[serde(default = "default_startup_probe_ms")]
    pub startup_probe_ms: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: default_args(),
            accounts_dir: default_accounts_dir(),
            startup_probe_ms: default_startup_probe_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl GatewaySettings {
    /// Build the launch spec, anchoring a relative `accounts_dir` at `base_dir`.
    pub fn launch_spec(&self, base_dir: &Path) -> LaunchSpec {
        let accounts_dir = if self.accounts_dir.is_absolute() {
            self.accounts_dir.clone()
        } else {
            base_dir.join(&self.accounts_dir)
        };
        LaunchSpec::new(self.binary.clone(), accounts_dir)
            .with_args(self.args.iter().cloned())
            .with_startup_probe(Duration::from_millis(self.startup_probe_ms))
            .with_stop_timeout(Duration::from_millis(self.stop_timeout_ms))
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from(DEFAULT_BINARY)
}

fn default_args() -> Vec<String> {
    vec!["-faststart".to_string()]
}

fn default_accounts_dir() -> PathBuf {
    PathBuf::from("accounts")
}

fn default_startup_probe_ms() -> u64 {
    500
}

fn default_stop_timeout_ms() -> u64 {
    5000
}

/// Log history and live-stream limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogSettings {
    /// Lines of history kept per process
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,

    /// Lines a live subscriber may fall behind before it is dropped
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
        }
    }
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

fn default_subscriber_capacity() -> usize {
    DEFAULT_SUBSCRIBER_CAPACITY
}

/// What to do when a gateway crashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    #[default]
    Never,
    OnCrash,
}

/// Restart policy settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestartSettings {
    #[serde(default, rename = "policy")]
    pub mode: RestartMode,

    /// Consecutive restart attempts before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            mode: RestartMode::default(),
            max_restarts: default_max_restarts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RestartSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Policy handed to the watchdog
    pub fn policy(&self) -> RestartPolicy {
        match self.mode {
            RestartMode::Never => RestartPolicy::Never,
            RestartMode::OnCrash => RestartPolicy::OnCrash {
                max_restarts: self.max_restarts,
                backoff: self.backoff(),
            },
        }
    }
}

fn default_max_restarts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    2000
}

/// One `[[accounts]]` entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountEntry {
    #[serde(flatten)]
    pub account: AccountConfig,

    /// Start this account when the supervisor boots
    #[serde(default)]
    pub auto_start: bool,
}
