//! Headless event forwarding

use std::time::Duration;

use gocq_supervisor::headless::commands::Command;
use gocq_supervisor::headless::runner::{handle_command, spawn_forwarders};
use gocq_supervisor::headless::HeadlessEvent;
use tokio::sync::{mpsc, watch};
use tempfile::tempdir;

use crate::sh_service;

/// Collect events until `done` matches one (5s timeout)
async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<HeadlessEvent>,
    done: impl Fn(&HeadlessEvent) -> bool,
) -> Vec<HeadlessEvent> {
    let mut events = Vec::new();
    let collect = async {
        while let Some(event) = rx.recv().await {
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), collect).await;
    events
}

#[tokio::test]
async fn test_forwarders_stream_lifecycle_and_logs() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "echo hello; sleep 30");
    service.create_account(10001, None).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let forwarders = spawn_forwarders(&service, &tx, &shutdown_rx);

    service.start(10001).await.unwrap();
    let events = collect_until(&mut rx, |e| {
        matches!(e, HeadlessEvent::Log { message, .. } if message == "hello")
    })
    .await;

    assert!(matches!(
        events[0],
        HeadlessEvent::AccountRegistered { uin: 10001, .. }
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, HeadlessEvent::ProcessStarted { uin: 10001, .. })));
    assert!(matches!(events.last(), Some(HeadlessEvent::Log { .. })));

    service.stop(10001).await.unwrap();
    let events = collect_until(&mut rx, |e| {
        matches!(e, HeadlessEvent::ProcessStopped { .. })
    })
    .await;
    assert!(events.iter().any(|e| matches!(
        e,
        HeadlessEvent::ProcessStopped {
            expected: true,
            ..
        }
    )));

    shutdown_tx.send(true).unwrap();
    for forwarder in forwarders {
        tokio::time::timeout(Duration::from_secs(5), forwarder)
            .await
            .expect("forwarder did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_failed_command_emits_error_event() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 30");
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_command(&service, Command::Stop(5), &tx).await;

    match rx.try_recv().unwrap() {
        HeadlessEvent::Error { uin, fatal, .. } => {
            assert_eq!(uin, Some(5));
            assert!(!fatal);
        }
        other => panic!("Expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_command_reports_every_account() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 30");
    service.create_account(2, None).unwrap();
    service.create_account(1, None).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_command(&service, Command::Status(None), &tx).await;

    let mut uins = Vec::new();
    while let Ok(HeadlessEvent::Status { info, .. }) = rx.try_recv() {
        uins.push(info.uin);
    }
    assert_eq!(uins, vec![1, 2]);
}

#[tokio::test]
async fn test_log_stream_recovers_after_falling_behind() {
    let temp = tempdir().unwrap();
    let service = sh_service(
        temp.path(),
        "seq 1 20000; sleep 1; echo AFTER_BURST; sleep 30",
    )
    .with_subscriber_capacity(4);
    service.create_account(10001, None).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let forwarders = spawn_forwarders(&service, &tx, &shutdown_rx);

    service.start(10001).await.unwrap();
    let events = collect_until(&mut rx, |e| {
        matches!(e, HeadlessEvent::Log { message, .. } if message == "AFTER_BURST")
    })
    .await;

    assert!(events
        .iter()
        .any(|e| matches!(e, HeadlessEvent::Log { message, .. } if message == "AFTER_BURST")));
    assert!(events.iter().any(|e| matches!(
        e,
        HeadlessEvent::Error {
            uin: Some(10001),
            fatal: false,
            ..
        }
    )));

    service.stop(10001).await.unwrap();
    shutdown_tx.send(true).unwrap();
    for forwarder in forwarders {
        tokio::time::timeout(Duration::from_secs(5), forwarder)
            .await
            .expect("forwarder did not stop")
            .unwrap();
    }
}
