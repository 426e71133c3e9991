//! gocq-supervisor library
//!
//! Front end for the `gocqd` binary: loads settings, builds the
//! [`ProcessService`](gocq_app::ProcessService) and runs the headless
//! NDJSON event stream.

pub mod headless;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gocq_app::config::{self, Settings};
use gocq_app::ProcessService;
use gocq_core::prelude::*;

pub use headless::runner::run_headless;

/// Resolve the settings file and the directory relative paths hang off.
///
/// An explicit `config_path` must exist and parse. Without one,
/// `gocqd.toml` in `cwd` is used when present, otherwise defaults.
pub fn load_config(config_path: Option<&Path>, cwd: &Path) -> Result<(Settings, PathBuf)> {
    match config_path {
        Some(path) => {
            let settings = config::load_settings_strict(path)?;
            let base_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.to_path_buf());
            Ok((settings, base_dir))
        }
        None => {
            let settings = config::load_settings(&cwd.join(config::CONFIG_FILENAME));
            Ok((settings, cwd.to_path_buf()))
        }
    }
}

/// Load settings, register configured accounts and run until shutdown.
pub async fn run(config_path: Option<&Path>, auto_start: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let (settings, base_dir) = load_config(config_path, &cwd)?;

    let service = Arc::new(ProcessService::from_settings(&settings, &base_dir)?);
    info!(
        "Registered {} account(s); gateways live under {}",
        service.list_accounts().len(),
        service.supervisor().launch_spec().accounts_dir.display()
    );

    let auto: &[config::AccountEntry] = if auto_start {
        &settings.accounts
    } else {
        &[]
    };
    run_headless(service, auto).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_defaults_without_file() {
        let temp = tempdir().unwrap();
        let (settings, base) = load_config(None, temp.path()).unwrap();
        assert!(settings.accounts.is_empty());
        assert_eq!(base, temp.path());
    }

    #[test]
    fn test_load_config_explicit_path_anchors_base_dir() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("bots");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("custom.toml");
        std::fs::write(&path, "[[accounts]]\nuin = 10001\n").unwrap();

        let (settings, base) = load_config(Some(&path), temp.path()).unwrap();

        assert_eq!(settings.accounts.len(), 1);
        assert_eq!(base, dir);
    }

    #[test]
    fn test_load_config_explicit_missing_is_error() {
        let temp = tempdir().unwrap();
        let err = load_config(Some(&temp.path().join("missing.toml")), temp.path()).unwrap_err();
        assert!(err.is_fatal());
    }
}
