//! Test utilities for process supervision
//!
//! Real `sh -c` children stand in for the gateway binary.

use std::path::Path;
use std::time::Duration;

use gocq_core::{AccountConfig, ProcessState};

use super::launch::LaunchSpec;
use super::process::GoCQProcess;

/// Startup probe used by test launches; long enough to catch immediate exits.
pub const TEST_STARTUP_PROBE: Duration = Duration::from_millis(100);

/// Creates a launch spec running `sh -c <script>` for every account.
///
/// # Arguments
/// * `accounts_dir` - Directory holding per-account working directories
/// * `script` - Shell script; `$GOCQ_UIN` is available to it
pub fn sh_launch(accounts_dir: &Path, script: &str) -> LaunchSpec {
    LaunchSpec::new("sh", accounts_dir)
        .with_args(["-c", script])
        .with_startup_probe(TEST_STARTUP_PROBE)
        .with_stop_timeout(Duration::from_secs(2))
}

/// Creates an account with no credentials or extras.
pub fn test_account(uin: u64) -> AccountConfig {
    AccountConfig::new(uin)
}

/// Waits (up to 5s) until `process` reports `state`.
///
/// # Panics
/// If the state is not reached in time.
pub async fn wait_for_state(process: &GoCQProcess, state: ProcessState) {
    let mut rx = process.watch_state();
    let reached = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(reached, "process never reached {:?}", state);
}
