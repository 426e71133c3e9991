//! Crash restart policy
//!
//! A watchdog task follows one process's lifecycle snapshots. When a run
//! ends with an unexpected exit it waits `backoff` and starts the process
//! again, giving up after `max_restarts` consecutive attempts. Exits caused by
//! `stop()` and failed starts issued by other callers are ignored.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use gocq_core::prelude::*;
use gocq_core::{LogLevel, ProcessLog, ProcessState};
use gocq_daemon::{GoCQProcess, LifecycleSnapshot, ProcessHandle};

/// A run that stayed up this long resets the consecutive-restart count
pub const STABLE_RUN: Duration = Duration::from_secs(60);

/// What the watchdog does after a crash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    Never,
    OnCrash { max_restarts: u32, backoff: Duration },
}

/// Handle to a running watchdog task; aborts the task on drop.
#[derive(Debug)]
pub struct Watchdog {
    uin: u64,
    task: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn a watchdog for `process`. Returns `None` for [`RestartPolicy::Never`].
    pub fn spawn(process: &ProcessHandle, policy: RestartPolicy) -> Option<Self> {
        let RestartPolicy::OnCrash {
            max_restarts,
            backoff,
        } = policy
        else {
            return None;
        };

        let uin = process.uin();
        debug!(
            "Watching account {} (max_restarts={}, backoff={:?})",
            uin, max_restarts, backoff
        );
        let task = tokio::spawn(watch_process(
            Arc::downgrade(process),
            max_restarts,
            backoff,
        ));
        Some(Self { uin, task })
    }

    pub fn uin(&self) -> u64 {
        self.uin
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A crash is a stop with an unexpected exit and no start error attached.
fn is_crash(snapshot: &LifecycleSnapshot) -> bool {
    snapshot.state == ProcessState::Stopped
        && snapshot.last_error.is_none()
        && snapshot.last_exit.as_ref().is_some_and(|e| e.is_crash())
}

async fn watch_process(process: Weak<GoCQProcess>, max_restarts: u32, backoff: Duration) {
    let Some(mut rx) = process.upgrade().map(|p| p.watch_state()) else {
        return;
    };

    // Crashes that happened before the watchdog existed are not ours to handle
    let mut handled_generation = rx.borrow_and_update().generation;
    let mut running_since: Option<Instant> = None;
    let mut attempts = 0u32;

    // Errors once the process (and its snapshot sender) is dropped
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();

        match snapshot.state {
            ProcessState::Running => {
                running_since = Some(Instant::now());
            }
            ProcessState::Stopped => {
                if snapshot
                    .last_exit
                    .as_ref()
                    .is_some_and(|e| e.expected)
                {
                    attempts = 0;
                }
            }
            _ => {}
        }

        if !is_crash(&snapshot) || snapshot.generation == handled_generation {
            continue;
        }
        handled_generation = snapshot.generation;

        if running_since
            .take()
            .is_some_and(|since| since.elapsed() >= STABLE_RUN)
        {
            attempts = 0;
        }

        loop {
            if attempts >= max_restarts {
                warn!(
                    "Giving up on restarting after {} consecutive attempts",
                    attempts
                );
                if let Some(p) = process.upgrade() {
                    p.logs().append(ProcessLog::internal(
                        LogLevel::Error,
                        format!("Giving up after {} restart attempts", attempts),
                    ));
                }
                // A later manual start gets a fresh budget
                attempts = 0;
                break;
            }
            attempts += 1;

            tokio::time::sleep(backoff).await;
            let Some(p) = process.upgrade() else {
                return;
            };
            if p.state() != ProcessState::Stopped {
                debug!("Process was started by someone else; skipping restart");
                break;
            }

            info!(
                "Restarting account {} (attempt {}/{})",
                p.uin(),
                attempts,
                max_restarts
            );
            p.logs().append(ProcessLog::internal(
                LogLevel::Warning,
                format!("Restarting gateway (attempt {}/{})", attempts, max_restarts),
            ));

            match p.start().await {
                Ok(()) => break,
                Err(Error::AlreadyRunning { .. }) => break,
                Err(e) => warn!("Restart attempt {} failed: {}", attempts, e),
            }
        }

        if rx.borrow().state == ProcessState::Running {
            running_since = Some(Instant::now());
        }
    }
}
