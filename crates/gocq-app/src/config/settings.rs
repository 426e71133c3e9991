//! Settings parser for gocqd.toml

use std::path::Path;

use super::types::Settings;
use gocq_core::prelude::*;

/// Default config file name, looked up in the working directory
pub const CONFIG_FILENAME: &str = "gocqd.toml";

/// Load settings, falling back to defaults when the file is missing or invalid.
pub fn load_settings(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match read_settings(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("{}; using defaults", e);
            Settings::default()
        }
    }
}

/// Load settings from a file the user explicitly asked for.
///
/// Unlike [`load_settings`], a missing or malformed file is an error.
pub fn load_settings_strict(config_path: &Path) -> Result<Settings> {
    if !config_path.exists() {
        return Err(Error::ConfigNotFound {
            path: config_path.to_path_buf(),
        });
    }
    read_settings(config_path)
}

fn read_settings(config_path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(config_path)
        .map_err(|e| Error::config(format!("Failed to read {:?}: {}", config_path, e)))?;
    let settings: Settings = toml::from_str(&content)
        .map_err(|e| Error::config(format!("Failed to parse {:?}: {}", config_path, e)))?;
    validate(&settings)?;
    debug!(
        "Loaded settings from {:?} ({} accounts)",
        config_path,
        settings.accounts.len()
    );
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for entry in &settings.accounts {
        if !seen.insert(entry.account.uin) {
            return Err(Error::config(format!(
                "Account {} is listed more than once",
                entry.account.uin
            )));
        }
    }
    Ok(())
}

/// Write a commented default config file unless one already exists
pub fn init_config_file(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::config(format!("Failed to create {:?}: {}", parent, e)))?;
        }
    }

    let default_content = r#"# go-cqhttp supervisor configuration

[gateway]
# Executable name (looked up in PATH) or path
binary = "go-cqhttp"
args = ["-faststart"]
# One working directory per account: <accounts_dir>/<uin>/
accounts_dir = "accounts"
startup_probe_ms = 500
stop_timeout_ms = 5000

[logs]
# Lines of history kept per account
capacity = 1000
# Lines a live subscriber may fall behind before it is dropped
subscriber_capacity = 256

[restart]
# "never" or "on_crash"
policy = "never"
max_restarts = 3
backoff_ms = 2000

# [[accounts]]
# uin = 10001
# password = ""
# auto_start = true
# [accounts.device_extra]
# protocol = 5
"#;

    std::fs::write(config_path, default_content)
        .map_err(|e| Error::config(format!("Failed to write {:?}: {}", config_path, e)))?;
    info!("Created default config at {:?}", config_path);
    Ok(())
}
