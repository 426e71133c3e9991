//! Lifecycle of one account's gateway process
//!
//! ```text
//! Stopped ──start──▶ Starting ──probe ok──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                       │                      │
//!                       └──spawn/probe fails──▶ Stopped ◀──crash──┘
//! ```
//!
//! `start`/`stop` are serialized by the lifecycle lock, which also owns the
//! [`ChildProcess`]. The crash path never takes that lock: a monitor task per
//! run flips the status snapshot to `Stopped` when the process dies while
//! `Running`, guarded by a generation number so a late exit of an old run
//! can't touch a newer one. A handle left behind by a crash is reaped by the
//! next `start`/`stop`, which also stops its output readers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

use gocq_core::prelude::*;
use gocq_core::{
    AccountConfig, DeliveryError, ExitInfo, LogLevel, ProcessInfo, ProcessLog, ProcessState,
};

use crate::child::{ChildExit, ChildProcess, ExitWatcher};
use crate::launch::LaunchSpec;
use crate::log_buffer::{LogBuffer, LogSubscription};

/// Shared handle to a supervised process
pub type ProcessHandle = Arc<GoCQProcess>;

/// Point-in-time lifecycle state, published through a watch channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    pub state: ProcessState,
    /// Incremented on every start attempt
    pub generation: u64,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Successful starts so far
    pub starts: u32,
    pub last_exit: Option<ExitInfo>,
    pub last_error: Option<String>,
}

/// Supervises the gateway process of one account
pub struct GoCQProcess {
    account: AccountConfig,
    launch: LaunchSpec,
    logs: Arc<LogBuffer>,
    /// Lifecycle lock; holds the OS process while one exists
    lifecycle: Mutex<Option<ChildProcess>>,
    /// Set once the account is unregistered; refuses further starts
    retired: AtomicBool,
    snapshot: watch::Sender<LifecycleSnapshot>,
}

impl std::fmt::Debug for GoCQProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoCQProcess")
            .field("uin", &self.account.uin)
            .field("snapshot", &*self.snapshot.borrow())
            .field("logs", &self.logs)
            .finish()
    }
}

impl GoCQProcess {
    /// Create a stopped process for `account` with a history of `log_capacity` lines.
    pub fn new(account: AccountConfig, launch: LaunchSpec, log_capacity: usize) -> Self {
        let (snapshot, _) = watch::channel(LifecycleSnapshot::default());
        Self {
            account,
            launch,
            logs: Arc::new(LogBuffer::new(log_capacity)),
            lifecycle: Mutex::new(None),
            retired: AtomicBool::new(false),
            snapshot,
        }
    }

    pub fn uin(&self) -> u64 {
        self.account.uin
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    /// Device metadata of this account
    pub fn device(&self) -> serde_json::Value {
        self.account.device()
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Open a live log stream. History is not replayed; use `logs().list()`.
    pub fn subscribe_logs(&self, capacity: usize) -> LogSubscription {
        self.logs.subscribe_channel(capacity)
    }

    pub fn state(&self) -> ProcessState {
        self.snapshot.borrow().state
    }

    /// Observe lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current status. Reads already-known state only.
    pub fn status(&self) -> ProcessInfo {
        let snap = self.snapshot.borrow();
        ProcessInfo {
            uin: self.account.uin,
            state: snap.state,
            pid: snap.pid,
            started_at: snap.started_at,
            uptime_secs: snap
                .started_at
                .map(|t| (Utc::now() - t).num_seconds().max(0) as u64),
            restarts: snap.starts.saturating_sub(1),
            last_exit: snap.last_exit.clone(),
            last_error: snap.last_error.clone(),
            total_logs: self.logs.total_appended(),
        }
    }

    /// Launch the gateway.
    ///
    /// Fails with [`Error::AlreadyRunning`] unless stopped, and with
    /// [`Error::LaunchFailure`] if the process can't be spawned or dies within
    /// the startup probe window.
    #[instrument(skip(self), fields(uin = self.account.uin))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.lifecycle.lock().await;

        if self.retired.load(Ordering::Acquire) {
            return Err(Error::NotFound {
                uin: self.account.uin,
            });
        }
        if self.state().is_active() {
            return Err(Error::AlreadyRunning {
                uin: self.account.uin,
            });
        }
        if let Some(mut previous) = slot.take() {
            debug!("Reaping handle of a previous run");
            // Output readers of a crashed run must not leak into this one
            previous.shutdown(Duration::ZERO).await;
        }

        let mut generation = 0;
        self.snapshot.send_modify(|s| {
            s.state = ProcessState::Starting;
            s.generation += 1;
            s.last_error = None;
            generation = s.generation;
        });
        self.logs.append(ProcessLog::internal(
            LogLevel::Info,
            format!("Starting gateway for account {}", self.account.uin),
        ));

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => return Err(self.fail_start(e.to_string(), None)),
        };

        let watcher = child.exit_watcher();
        if let Ok(exit) = timeout(self.launch.startup_probe, watcher.wait()).await {
            child.shutdown(Duration::ZERO).await;
            let reason = format!("exited during startup ({})", describe_exit(&exit));
            return Err(self.fail_start(reason, Some(exit)));
        }

        let pid = child.id();
        self.snapshot.send_modify(|s| {
            s.state = ProcessState::Running;
            s.pid = pid;
            s.started_at = Some(Utc::now());
            s.starts += 1;
        });
        info!("Gateway running with PID {:?}", pid);
        self.logs.append(ProcessLog::internal(
            LogLevel::Info,
            format!("Gateway running (pid {})", display_pid(pid)),
        ));

        tokio::spawn(Self::monitor_exit(Arc::downgrade(self), generation, watcher));
        *slot = Some(child);
        Ok(())
    }

    fn spawn_child(&self) -> Result<ChildProcess> {
        let binary = self.launch.resolve_binary()?;
        let dir = self.launch.prepare_account_dir(&self.account)?;
        let env = self.launch.env_for(&self.account)?;
        let child = ChildProcess::spawn(
            &binary,
            &self.launch.args,
            &dir,
            &env,
            Arc::clone(&self.logs),
        )?;
        Ok(child)
    }

    /// Record a failed start and build the error returned to the caller.
    fn fail_start(&self, reason: String, exit: Option<ChildExit>) -> Error {
        error!("Failed to start gateway: {}", reason);
        self.snapshot.send_modify(|s| {
            s.state = ProcessState::Stopped;
            s.pid = None;
            s.started_at = None;
            s.last_error = Some(reason.clone());
            if let Some(exit) = exit {
                s.last_exit = Some(exit_info(exit, false));
            }
        });
        self.logs.append(ProcessLog::internal(
            LogLevel::Error,
            format!("Failed to start gateway: {}", reason),
        ));
        Error::launch_failure(self.account.uin, reason)
    }

    /// Per-run task turning an unrequested exit into `Running -> Stopped`.
    async fn monitor_exit(process: Weak<Self>, generation: u64, watcher: ExitWatcher) {
        let exit = watcher.wait().await;
        let Some(process) = process.upgrade() else {
            return;
        };

        let crashed = process.snapshot.send_if_modified(|s| {
            if s.generation != generation || s.state != ProcessState::Running {
                return false;
            }
            s.state = ProcessState::Stopped;
            s.pid = None;
            s.started_at = None;
            s.last_exit = Some(exit_info(exit, false));
            true
        });

        if crashed {
            warn!(
                "Gateway for account {} exited unexpectedly ({})",
                process.account.uin,
                describe_exit(&exit)
            );
            process.logs.append(ProcessLog::internal(
                LogLevel::Error,
                format!("Gateway exited unexpectedly ({})", describe_exit(&exit)),
            ));
        }
    }

    /// Stop the gateway: termination signal, bounded wait, then kill.
    ///
    /// No-op when already stopped.
    #[instrument(skip(self), fields(uin = self.account.uin))]
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.lifecycle.lock().await;
        self.stop_locked(&mut slot).await
    }

    /// Stop for good. Any `start` still queued on the lifecycle lock, or
    /// issued later, fails with [`Error::NotFound`].
    #[instrument(skip(self), fields(uin = self.account.uin))]
    pub async fn retire(&self) -> Result<()> {
        let mut slot = self.lifecycle.lock().await;
        self.retired.store(true, Ordering::Release);
        self.stop_locked(&mut slot).await
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    async fn stop_locked(&self, slot: &mut Option<ChildProcess>) -> Result<()> {
        let Some(mut child) = slot.take() else {
            debug!("Stop requested but no process exists");
            return Ok(());
        };

        let stopping = self.snapshot.send_if_modified(|s| {
            if s.state == ProcessState::Running {
                s.state = ProcessState::Stopping;
                true
            } else {
                false
            }
        });
        if !stopping {
            // Crashed earlier; the monitor already recorded the exit
            child.shutdown(Duration::ZERO).await;
            debug!("Reaped handle of an exited gateway");
            return Ok(());
        }

        info!("Stopping gateway");
        self.logs.append(ProcessLog::internal(
            LogLevel::Info,
            "Stopping gateway".to_string(),
        ));

        let exit = child.shutdown(self.launch.stop_timeout).await;
        drop(child);

        self.snapshot.send_modify(|s| {
            s.state = ProcessState::Stopped;
            s.pid = None;
            s.started_at = None;
            s.last_exit = Some(exit_info(exit, true));
        });
        self.logs.append(ProcessLog::internal(
            LogLevel::Info,
            format!("Gateway stopped ({})", describe_exit(&exit)),
        ));
        Ok(())
    }

    /// Stop (if running) and start again
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Write a line to the gateway's stdin, e.g. a captcha ticket during login.
    ///
    /// Never waits on the pipe: a gateway that stopped reading yields
    /// [`Error::InputBacklog`] instead of holding up `stop`.
    pub async fn send_input(&self, line: &str) -> Result<()> {
        let uin = self.account.uin;
        let slot = self.lifecycle.lock().await;
        let child = match slot.as_ref() {
            Some(child) if child.is_running() && self.state() == ProcessState::Running => child,
            _ => return Err(Error::NotRunning { uin }),
        };
        child.try_send(line).map_err(|e| match e {
            DeliveryError::Full => {
                warn!("Stdin of account {} is backed up, dropping input", uin);
                Error::InputBacklog { uin }
            }
            DeliveryError::Closed => Error::NotRunning { uin },
        })
    }
}

fn exit_info(exit: ChildExit, expected: bool) -> ExitInfo {
    ExitInfo {
        code: exit.code,
        signal: exit.signal,
        time: Utc::now(),
        expected,
    }
}

fn describe_exit(exit: &ChildExit) -> String {
    match (exit.code, exit.signal) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("signal {}", signal),
        (None, None) => "unknown status".to_string(),
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
