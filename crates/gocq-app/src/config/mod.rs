//! Configuration file parsing for the go-cqhttp supervisor
//!
//! Supports:
//! - `gocqd.toml` - Gateway launch options, log limits, restart policy, accounts

pub mod settings;
pub mod types;

pub use settings::{init_config_file, load_settings, load_settings_strict, CONFIG_FILENAME};
pub use types::*;
