//! Account lifecycle through the service boundary

use std::time::Duration;

use gocq_app::RestartPolicy;
use gocq_core::{Error, ProcessState};
use gocq_daemon::DEVICE_FILENAME;
use serde_json::json;
use tempfile::tempdir;

use crate::{eventually, sh_service};

// ─────────────────────────────────────────────────────────
// Registry Tests
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_account_is_not_found_everywhere() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 30");

    assert!(matches!(service.status(404), Err(Error::NotFound { uin: 404 })));
    assert!(matches!(service.start(404).await, Err(Error::NotFound { .. })));
    assert!(matches!(
        service.send_input(404, "x").await,
        Err(Error::NotFound { .. })
    ));
    assert!(service.list_accounts().is_empty());
}

#[tokio::test]
async fn test_device_written_on_start() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 30");
    let creation = serde_json::from_value(json!({
        "password": "pw",
        "device_extra": {"protocol": 5}
    }))
    .unwrap();
    service.create_account(10001, Some(creation)).unwrap();

    service.start(10001).await.unwrap();
    service.stop(10001).await.unwrap();

    let device_path = temp.path().join("10001").join(DEVICE_FILENAME);
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(device_path).unwrap()).unwrap();
    assert_eq!(written["protocol"], 5);
    assert_eq!(service.device(10001).unwrap(), written);
}

#[tokio::test]
async fn test_credentials_reach_gateway_environment() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "echo \"uin=$GOCQ_UIN pw=$GOCQ_PASSWORD\"; sleep 30");
    let creation = serde_json::from_value(json!({"password": "hunter2"})).unwrap();
    service.create_account(10001, Some(creation)).unwrap();

    service.start(10001).await.unwrap();
    let seen = eventually(|| {
        service
            .logs(10001, false)
            .unwrap()
            .iter()
            .any(|l| l.message == "uin=10001 pw=hunter2")
    })
    .await;
    service.stop(10001).await.unwrap();

    assert!(seen);
    // Public metadata never carries the password
    let account = serde_json::to_string(&service.account(10001).unwrap()).unwrap();
    assert!(!account.contains("hunter2"));
}

#[tokio::test]
async fn test_restart_gives_new_pid() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 30");
    service.create_account(1, None).unwrap();

    service.start(1).await.unwrap();
    let first = service.status(1).unwrap().pid;
    service.restart(1).await.unwrap();
    let status = service.status(1).unwrap();
    service.stop(1).await.unwrap();

    assert_eq!(status.state, ProcessState::Running);
    assert_ne!(status.pid, first);
    assert_eq!(status.restarts, 1);
}

// ─────────────────────────────────────────────────────────
// Crash Handling Tests
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_crash_without_policy_stays_stopped() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 0.3; exit 9");
    service.create_account(1, None).unwrap();

    service.start(1).await.unwrap();
    assert!(eventually(|| service.status(1).unwrap().state == ProcessState::Stopped).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = service.status(1).unwrap();
    assert_eq!(status.state, ProcessState::Stopped);
    assert_eq!(status.restarts, 0);
    assert_eq!(status.last_exit.unwrap().code, Some(9));
}

#[tokio::test]
async fn test_crash_with_policy_is_restarted() {
    let temp = tempdir().unwrap();
    let service = sh_service(temp.path(), "sleep 0.3; exit 9").with_restart_policy(
        RestartPolicy::OnCrash {
            max_restarts: 1,
            backoff: Duration::from_millis(20),
        },
    );
    service.create_account(1, None).unwrap();

    service.start(1).await.unwrap();
    assert!(eventually(|| service.status(1).unwrap().restarts == 1).await);

    // One restart allowed; the second crash is final
    assert!(eventually(|| service.status(1).unwrap().state == ProcessState::Stopped).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(service.status(1).unwrap().restarts, 1);
    service.shutdown().await;
}
