//! Live log fan-out through the service boundary

use std::time::Duration;

use gocq_core::{LogStream, ProcessState};
use tempfile::tempdir;

use crate::{drain, recv_stdout, sh_service};

// ─────────────────────────────────────────────────────────
// Fan-out Scenario
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_three_subscribers_receive_five_lines_then_nothing_after_stop() {
    let temp = tempdir().unwrap();
    // Lines are only printed once the test says "go", after subscribers attach
    let service = sh_service(
        temp.path(),
        "read go; for i in 1 2 3 4 5; do echo \"line $i\"; done; sleep 30",
    );

    service.create_account(10001, None).unwrap();
    assert_eq!(service.status(10001).unwrap().state, ProcessState::Stopped);

    service.start(10001).await.unwrap();
    assert_eq!(service.status(10001).unwrap().state, ProcessState::Running);

    let mut subscribers: Vec<_> = (0..3)
        .map(|_| service.subscribe_logs(10001).unwrap())
        .collect();
    service.send_input(10001, "go").await.unwrap();

    let expected: Vec<String> = (1..=5).map(|i| format!("line {}", i)).collect();
    for subscriber in &mut subscribers {
        let lines = recv_stdout(subscriber, 5).await;
        let messages: Vec<String> = lines.into_iter().map(|l| l.message).collect();
        assert_eq!(messages, expected);
    }

    service.stop(10001).await.unwrap();
    assert_eq!(service.status(10001).unwrap().state, ProcessState::Stopped);

    // Only the supervisor's own stop messages may still be queued
    for subscriber in &mut subscribers {
        let queued = drain(subscriber);
        assert!(queued.iter().all(|l| l.stream == LogStream::Internal));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    for subscriber in &mut subscribers {
        assert!(drain(subscriber).is_empty());
    }
}

#[tokio::test]
async fn test_late_subscriber_gets_no_history() {
    let temp = tempdir().unwrap();
    let service = sh_service(
        temp.path(),
        "echo early; read go; echo late; sleep 30",
    );
    service.create_account(1, None).unwrap();
    service.start(1).await.unwrap();

    assert!(
        crate::eventually(|| service
            .logs(1, false)
            .unwrap()
            .iter()
            .any(|l| l.message == "early"))
        .await
    );

    let mut late = service.subscribe_logs(1).unwrap();
    service.send_input(1, "go").await.unwrap();
    let lines = recv_stdout(&mut late, 1).await;
    service.stop(1).await.unwrap();

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].message, "late");

    // History still has both, newest first when reversed
    let history: Vec<String> = service
        .logs(1, true)
        .unwrap()
        .into_iter()
        .filter(|l| l.stream == LogStream::Stdout)
        .map(|l| l.message)
        .collect();
    assert_eq!(history, vec!["late".to_string(), "early".to_string()]);
}

#[tokio::test]
async fn test_dropped_subscription_is_unregistered() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 30");
    service.create_account(1, None).unwrap();
    let process = service.supervisor().resolve(1).unwrap();

    let keep = service.subscribe_logs(1).unwrap();
    let gone = service.subscribe_logs(1).unwrap();
    assert_eq!(process.logs().subscriber_count(), 2);

    drop(gone);
    assert_eq!(process.logs().subscriber_count(), 1);
    drop(keep);
    assert_eq!(process.logs().subscriber_count(), 0);
}

#[tokio::test]
async fn test_stderr_lines_are_tagged() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "echo oops 1>&2; sleep 30");
    service.create_account(1, None).unwrap();
    service.start(1).await.unwrap();

    let found = crate::eventually(|| {
        service
            .logs(1, false)
            .unwrap()
            .iter()
            .any(|l| l.stream == LogStream::Stderr && l.message == "oops")
    })
    .await;
    service.stop(1).await.unwrap();
    assert!(found);
}
