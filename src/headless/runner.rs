//! Headless mode runner - supervises accounts and streams events to stdout
//!
//! One forwarder task per account turns its live log subscription into `log`
//! events, another turns its lifecycle snapshots into `state_changed`,
//! `process_started` and `process_stopped` events. A single writer task owns
//! stdout so events never interleave. Commands arrive on stdin.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use gocq_app::config::AccountEntry;
use gocq_app::{ProcessHandle, ProcessService};
use gocq_core::prelude::*;
use gocq_core::ProcessState;

use super::commands::Command;
use super::signals::spawn_signal_handler;
use super::HeadlessEvent;

/// Run in headless mode until SIGINT/SIGTERM or a `quit` command
pub async fn run_headless(service: Arc<ProcessService>, auto_start: &[AccountEntry]) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("gocqd starting in HEADLESS mode");
    info!("Accounts: {:?}", service.list_accounts());
    info!("═══════════════════════════════════════════════════════");

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = tokio::spawn(write_events(event_rx, std::io::stdout()));
    let forwarders = spawn_forwarders(&service, &event_tx, &shutdown_rx);

    spawn_signal_handler(shutdown_tx.clone());

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(16);
    std::thread::spawn(move || {
        spawn_stdin_reader_blocking(cmd_tx);
    });

    for (uin, result) in service.auto_start(auto_start).await {
        if let Err(e) = result {
            let _ = event_tx.send(HeadlessEvent::error(Some(uin), e.to_string(), false));
        }
    }

    let mut shutdown = shutdown_rx.clone();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Quit requested by signal");
                break;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Quit) => {
                    info!("Quit requested on stdin");
                    break;
                }
                Some(cmd) => handle_command(&service, cmd, &event_tx).await,
                // Stdin closed; keep supervising until a signal arrives
                None => {
                    let _ = shutdown.changed().await;
                    break;
                }
            },
        }
    }

    service.shutdown().await;

    // Let forwarders drain what was logged during shutdown
    let _ = shutdown_tx.send(true);
    for forwarder in forwarders {
        let _ = forwarder.await;
    }
    drop(event_tx);
    let _ = writer.await;

    info!("gocqd headless mode exiting");
    Ok(())
}

/// Spawn log and lifecycle forwarders for every registered account.
///
/// Forwarders stop once `shutdown` flips to `true`, after draining lines
/// already delivered to their subscription.
pub fn spawn_forwarders(
    service: &ProcessService,
    event_tx: &mpsc::UnboundedSender<HeadlessEvent>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();
    let capacity = service.subscriber_capacity();
    for process in service.supervisor().handles() {
        let uin = process.uin();
        let _ = event_tx.send(HeadlessEvent::account_registered(
            &process.account().metadata(),
        ));

        // Subscribe before spawning so nothing logged in between is missed
        let subscription = process.subscribe_logs(capacity);
        tasks.push(tokio::spawn(forward_lifecycle(
            uin,
            process.watch_state(),
            event_tx.clone(),
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(forward_logs(
            process,
            subscription,
            capacity,
            event_tx.clone(),
            shutdown.clone(),
        )));
    }
    tasks
}

/// Stream one account's log lines. When the buffer drops the subscription
/// for falling `capacity` lines behind, report the gap and subscribe again.
async fn forward_logs(
    process: ProcessHandle,
    mut subscription: gocq_app::LogSubscription,
    capacity: usize,
    tx: mpsc::UnboundedSender<HeadlessEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let uin = process.uin();
    loop {
        tokio::select! {
            biased;
            line = subscription.recv() => match line {
                Some(line) => {
                    if tx.send(HeadlessEvent::log(uin, &line)).is_err() {
                        return;
                    }
                }
                None => {
                    if *shutdown.borrow() {
                        return;
                    }
                    warn!("Log stream of account {} fell behind, resubscribing", uin);
                    let gap = HeadlessEvent::error(
                        Some(uin),
                        format!(
                            "Log stream fell more than {} lines behind; some lines were not forwarded",
                            capacity
                        ),
                        false,
                    );
                    if tx.send(gap).is_err() {
                        return;
                    }
                    subscription = process.subscribe_logs(capacity);
                }
            },
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                while let Ok(line) = subscription.try_recv() {
                    let _ = tx.send(HeadlessEvent::log(uin, &line));
                }
                return;
            }
        }
    }
}

async fn forward_lifecycle(
    uin: u64,
    mut state_rx: watch::Receiver<gocq_daemon::LifecycleSnapshot>,
    tx: mpsc::UnboundedSender<HeadlessEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last = state_rx.borrow_and_update().clone();
    loop {
        tokio::select! {
            biased;
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let snapshot = state_rx.borrow_and_update().clone();
                for event in lifecycle_events(uin, &last, &snapshot) {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                last = snapshot;
            }
            _ = shutdown.wait_for(|stop| *stop) => return,
        }
    }
}

/// Events describing the move from `before` to `after`
fn lifecycle_events(
    uin: u64,
    before: &gocq_daemon::LifecycleSnapshot,
    after: &gocq_daemon::LifecycleSnapshot,
) -> Vec<HeadlessEvent> {
    let mut events = Vec::new();
    if before.state != after.state {
        events.push(HeadlessEvent::state_changed(uin, after.state));
    }
    if after.state == ProcessState::Running
        && (before.state != ProcessState::Running || before.generation != after.generation)
    {
        events.push(HeadlessEvent::process_started(uin, after.pid));
    }
    if after.last_exit != before.last_exit {
        if let Some(exit) = &after.last_exit {
            events.push(HeadlessEvent::process_stopped(uin, exit));
        }
    }
    if after.last_error != before.last_error {
        if let Some(message) = &after.last_error {
            events.push(HeadlessEvent::error(Some(uin), message.clone(), false));
        }
    }
    events
}

/// Single owner of the output stream
async fn write_events<W: Write>(mut rx: mpsc::UnboundedReceiver<HeadlessEvent>, mut out: W) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = event.write_to(&mut out) {
            error!("Failed to write headless event: {}", e);
            return;
        }
    }
}

/// Execute one stdin command, reporting failures as `error` events
pub async fn handle_command(
    service: &ProcessService,
    cmd: Command,
    event_tx: &mpsc::UnboundedSender<HeadlessEvent>,
) {
    let (uin, result) = match cmd {
        Command::Start(uin) => (uin, service.start(uin).await),
        Command::Stop(uin) => (uin, service.stop(uin).await),
        Command::Restart(uin) => (uin, service.restart(uin).await),
        Command::Input(uin, text) => (uin, service.send_input(uin, &text).await),
        Command::Status(Some(uin)) => (
            uin,
            service
                .status(uin)
                .map(|info| {
                    let _ = event_tx.send(HeadlessEvent::status(info));
                }),
        ),
        Command::Status(None) => {
            for uin in service.list_accounts() {
                if let Ok(info) = service.status(uin) {
                    let _ = event_tx.send(HeadlessEvent::status(info));
                }
            }
            return;
        }
        Command::Quit => return,
    };

    if let Err(e) = result {
        warn!("Command for account {} failed: {}", uin, e);
        let _ = event_tx.send(HeadlessEvent::error(Some(uin), e.to_string(), false));
    }
}

/// Read commands from stdin and forward them (blocking; run on its own thread)
fn spawn_stdin_reader_blocking(cmd_tx: mpsc::Sender<Command>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        match Command::parse(&line) {
            Ok(cmd) => {
                let quit = cmd == Command::Quit;
                if cmd_tx.blocking_send(cmd).is_err() || quit {
                    break;
                }
            }
            Err(super::commands::ParseError::Empty) => {}
            Err(e) => warn!("Ignoring stdin line: {}", e),
        }
    }

    info!("Stdin reader exiting");
}
