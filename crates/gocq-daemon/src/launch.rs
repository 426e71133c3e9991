//! Launch parameters for the gateway binary

use std::path::{Path, PathBuf};
use std::time::Duration;

use gocq_core::prelude::*;
use gocq_core::AccountConfig;

/// Default gateway executable name, resolved through `PATH`
pub const DEFAULT_BINARY: &str = "go-cqhttp";

/// How long a freshly spawned process must stay alive to count as started
pub const DEFAULT_STARTUP_PROBE: Duration = Duration::from_millis(500);

/// Grace period between the termination signal and a forced kill
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// File the account's device description is written to before each start
pub const DEVICE_FILENAME: &str = "device.json";

/// Environment variables exported to the gateway so its config template can
/// reference the account's credentials (`${GOCQ_UIN}`, `${GOCQ_PASSWORD}`).
pub const ENV_UIN: &str = "GOCQ_UIN";
pub const ENV_PASSWORD: &str = "GOCQ_PASSWORD";
pub const ENV_CONFIG_EXTRA: &str = "GOCQ_CONFIG_EXTRA";

/// Where and how to run the gateway for every account
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Executable name or path
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Each account runs in `<accounts_dir>/<uin>/`
    pub accounts_dir: PathBuf,
    pub startup_probe: Duration,
    pub stop_timeout: Duration,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            args: vec!["-faststart".to_string()],
            accounts_dir: PathBuf::from("accounts"),
            startup_probe: DEFAULT_STARTUP_PROBE,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl LaunchSpec {
    pub fn new(binary: impl Into<PathBuf>, accounts_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            accounts_dir: accounts_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_startup_probe(mut self, probe: Duration) -> Self {
        self.startup_probe = probe;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Working directory of one account
    pub fn account_dir(&self, uin: u64) -> PathBuf {
        self.accounts_dir.join(uin.to_string())
    }

    /// Locate the executable.
    ///
    /// Bare names go through `PATH`; anything with a directory component must exist as given.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        resolve_binary(&self.binary)
    }

    /// Environment exported to the gateway for one account
    pub fn env_for(&self, account: &AccountConfig) -> Result<Vec<(String, String)>> {
        let mut env = vec![(ENV_UIN.to_string(), account.uin.to_string())];
        if let Some(password) = &account.password {
            env.push((ENV_PASSWORD.to_string(), password.clone()));
        }
        if let Some(extra) = &account.config_extra {
            env.push((ENV_CONFIG_EXTRA.to_string(), serde_json::to_string(extra)?));
        }
        Ok(env)
    }

    /// Create the account directory and write its `device.json`.
    pub fn prepare_account_dir(&self, account: &AccountConfig) -> Result<PathBuf> {
        let dir = self.account_dir(account.uin);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        // Keep a device file the gateway generated itself unless we have overrides
        let device_path = dir.join(DEVICE_FILENAME);
        if account.device_extra.is_some() || !device_path.exists() {
            let device = serde_json::to_vec_pretty(&account.device())?;
            std::fs::write(&device_path, device)
                .with_context(|| format!("Failed to write {}", device_path.display()))?;
            debug!("Wrote {}", device_path.display());
        }

        Ok(dir)
    }
}

fn resolve_binary(binary: &Path) -> Result<PathBuf> {
    if binary.components().count() > 1 || binary.is_absolute() {
        return if binary.is_file() {
            Ok(binary.to_path_buf())
        } else {
            Err(Error::BinaryNotFound {
                binary: binary.to_path_buf(),
            })
        };
    }

    which::which(binary).map_err(|e| {
        debug!("which({}) failed: {}", binary.display(), e);
        Error::BinaryNotFound {
            binary: binary.to_path_buf(),
        }
    })
}
