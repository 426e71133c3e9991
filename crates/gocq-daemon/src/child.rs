//! A single spawned gateway OS process

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use gocq_core::prelude::*;
use gocq_core::{DeliveryError, LogStream, ProcessLog};

use crate::log_buffer::LogBuffer;

/// Upper bound on waiting for the OS to reap a force-killed process
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Upper bound on draining the output pipes after exit
const READER_DRAIN: Duration = Duration::from_secs(1);

/// Lines queued for stdin before `try_send` reports the gateway as backed up
const STDIN_QUEUE: usize = 32;

/// Raw exit status of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChildExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Shared view of a child's exit, cheap to clone into monitoring tasks.
///
/// Set exactly once by the wait task. `wait()` creates its `notified()` future
/// before checking the slot so a notification can never be missed.
#[derive(Debug, Clone, Default)]
pub struct ExitWatcher {
    exited: Arc<AtomicBool>,
    status: Arc<Mutex<Option<ChildExit>>>,
    notify: Arc<Notify>,
}

impl ExitWatcher {
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn status(&self) -> Option<ChildExit> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the child has exited and been reaped
    pub async fn wait(&self) -> ChildExit {
        loop {
            let notified = self.notify.notified();
            if let Some(exit) = self.status() {
                return exit;
            }
            notified.await;
        }
    }

    fn record(&self, exit: ChildExit) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit);
        self.exited.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Owns one running gateway process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` task so the real
/// exit status is captured no matter who ends the process. `ChildProcess`
/// keeps a kill channel to request a force-kill, the [`ExitWatcher`] for
/// exit checks, and the reader task handles so shutdown can drain the pipes.
pub struct ChildProcess {
    /// Sender for stdin lines
    stdin_tx: mpsc::Sender<String>,
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: ExitWatcher,
    readers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ChildProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildProcess")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl ChildProcess {
    /// Spawn `binary args...` in `working_dir`, piping its output into `logs`.
    pub fn spawn(
        binary: &Path,
        args: &[String],
        working_dir: &Path,
        env: &[(String, String)],
        logs: Arc<LogBuffer>,
    ) -> std::io::Result<Self> {
        info!("Spawning gateway: {} {}", binary.display(), args.join(" "));

        let mut child = Command::new(binary)
            .args(args)
            .current_dir(working_dir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // Critical: cleanup on drop
            .spawn()?;

        let pid = child.id();
        info!("Gateway process started with PID: {:?}", pid);

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(STDIN_QUEUE);
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(Self::stdin_writer(stdin, stdin_rx));
        }

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(Self::output_reader(
                stdout,
                LogStream::Stdout,
                Arc::clone(&logs),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(Self::output_reader(
                stderr,
                LogStream::Stderr,
                logs,
            )));
        }

        let watcher = ExitWatcher::default();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(Self::wait_for_exit(child, kill_rx, watcher.clone()));

        Ok(Self {
            stdin_tx,
            pid,
            kill_tx: Some(kill_tx),
            watcher,
            readers,
        })
    }

    /// Background task: owns `child`, waits for it to exit, records the status.
    ///
    /// Two ways the task can end:
    /// 1. The process exits on its own (or after a termination signal).
    /// 2. `kill_rx` fires: kill the child first, then reap it.
    async fn wait_for_exit(mut child: Child, kill_rx: oneshot::Receiver<()>, watcher: ExitWatcher) {
        let exit = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Gateway process exited with status: {:?}", status);
                        ChildExit::from(status)
                    }
                    Err(e) => {
                        error!("Error waiting for gateway process: {}", e);
                        ChildExit::default()
                    }
                }
            }
            _ = kill_rx => {
                info!("Kill signal received, force-killing gateway process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill gateway process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => {
                        info!("Gateway process killed, exit status: {:?}", status);
                        ChildExit::from(status)
                    }
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        ChildExit::default()
                    }
                }
            }
        };

        watcher.record(exit);
    }

    /// Read lines from one output pipe into the log buffer.
    ///
    /// Lines are split on `\n` and decoded lossily; the gateway occasionally
    /// prints non-UTF-8 bytes (QR codes on some terminals).
    async fn output_reader<R>(pipe: R, stream: LogStream, logs: Arc<LogBuffer>)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(pipe).split(b'\n');

        loop {
            match reader.next_segment().await {
                Ok(Some(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let text = text.trim_end_matches('\r');
                    trace!("{:?}: {}", stream, text);
                    logs.append(ProcessLog::from_output(stream, text));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{:?} reader failed: {}", stream, e);
                    break;
                }
            }
        }

        debug!("{:?} reader finished", stream);
    }

    /// Write lines to stdin
    async fn stdin_writer(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<String>) {
        while let Some(line) = rx.recv().await {
            debug!("Sending to gateway stdin: {}", line);

            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!("Failed to write newline: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }

        debug!("stdin writer finished");
    }

    /// Queue one line for the process's stdin without waiting.
    ///
    /// Fails with [`DeliveryError::Full`] once the gateway stops reading and
    /// the pipe plus the queue are full.
    pub fn try_send(&self, line: &str) -> std::result::Result<(), DeliveryError> {
        self.stdin_tx.try_send(line.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Terminate the process: termination signal, then force-kill after `grace`.
    ///
    /// Returns once the process has been reaped and its output drained.
    pub async fn shutdown(&mut self, grace: Duration) -> ChildExit {
        if let Some(exit) = self.watcher.status() {
            info!("Gateway process already exited, nothing to stop");
            self.drain_readers().await;
            return exit;
        }

        // Register interest before signalling so the exit can't slip past us
        let waiter = self.watcher.clone();
        let exited = waiter.wait();
        tokio::pin!(exited);

        if self.terminate() {
            match timeout(grace, &mut exited).await {
                Ok(exit) => {
                    info!("Gateway process exited gracefully");
                    self.drain_readers().await;
                    return exit;
                }
                Err(_) => warn!("Timeout waiting for graceful exit, force killing"),
            }
        }

        self.force_kill();
        let exit = match timeout(KILL_WAIT, &mut exited).await {
            Ok(exit) => exit,
            Err(_) => {
                error!("Gateway process {:?} did not exit after kill", self.pid);
                ChildExit::default()
            }
        };
        self.drain_readers().await;
        exit
    }

    /// Send the graceful termination signal. Returns `false` when the platform has none.
    #[cfg(unix)]
    fn terminate(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                debug!("Sent SIGTERM to {}", pid);
                true
            }
            Err(e) => {
                warn!("Failed to send SIGTERM to {}: {}", pid, e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> bool {
        false
    }

    /// Force kill the process by signalling the wait task.
    fn force_kill(&mut self) {
        warn!("Force killing gateway process via kill channel");
        if let Some(tx) = self.kill_tx.take() {
            // Ignore send error: the wait task may have already exited naturally.
            let _ = tx.send(());
        }
    }

    async fn drain_readers(&mut self) {
        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            if timeout(READER_DRAIN, reader).await.is_err() {
                // A grandchild may still hold the pipe open
                debug!("Output reader still busy after exit, aborting");
                abort.abort();
            }
        }
    }

    /// Non-blocking check backed by the wait task's flag
    pub fn has_exited(&self) -> bool {
        self.watcher.has_exited()
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Handle for observing this process's exit from another task
    pub fn exit_watcher(&self) -> ExitWatcher {
        self.watcher.clone()
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("ChildProcess dropped while process may still be running");
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        // kill_on_drop(true) on the Child is the final safety net if the
        // wait task hasn't had a chance to handle the kill yet.
        debug!("ChildProcess dropped");
    }
}
