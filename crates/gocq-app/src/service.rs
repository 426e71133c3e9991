//! Boundary operations over the supervisor
//!
//! [`ProcessService`] is what a transport (HTTP, CLI, headless stream) talks
//! to. Every per-account call resolves the uin first, so an unknown account
//! is always [`Error::NotFound`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use gocq_core::prelude::*;
use gocq_core::{AccountConfig, ProcessAccount, ProcessInfo, ProcessLog};
use gocq_daemon::{LogSubscription, ProcessHandle, DEFAULT_SUBSCRIBER_CAPACITY};

use crate::config::{AccountEntry, Settings};
use crate::supervisor::ProcessSupervisor;
use crate::watchdog::{RestartPolicy, Watchdog};

/// Optional overrides supplied when creating an account
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AccountCreation {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub config_extra: Option<Map<String, Value>>,
    #[serde(default)]
    pub device_extra: Option<Map<String, Value>>,
}

impl AccountCreation {
    pub fn into_account(self, uin: u64) -> AccountConfig {
        AccountConfig {
            uin,
            password: self.password,
            config_extra: self.config_extra,
            device_extra: self.device_extra,
        }
    }
}

/// Facade used by every front end
#[derive(Debug)]
pub struct ProcessService {
    supervisor: Arc<ProcessSupervisor>,
    restart_policy: RestartPolicy,
    subscriber_capacity: usize,
    watchdogs: Mutex<BTreeMap<u64, Watchdog>>,
}

impl ProcessService {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            restart_policy: RestartPolicy::Never,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            watchdogs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn with_subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity.max(1);
        self
    }

    /// Build a service from loaded settings. Relative paths resolve against
    /// `base_dir`. Configured accounts are registered but not started.
    pub fn from_settings(settings: &Settings, base_dir: &Path) -> Result<Self> {
        let launch = settings.gateway.launch_spec(base_dir);
        let supervisor = ProcessSupervisor::with_log_capacity(launch, settings.logs.capacity);
        let service = Self::new(Arc::new(supervisor))
            .with_restart_policy(settings.restart.policy())
            .with_subscriber_capacity(settings.logs.subscriber_capacity);

        for entry in &settings.accounts {
            service.register(entry.account.clone())?;
        }
        Ok(service)
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart_policy
    }

    /// Queue bound of every live log subscription
    pub fn subscriber_capacity(&self) -> usize {
        self.subscriber_capacity
    }

    fn register(&self, account: AccountConfig) -> Result<ProcessHandle> {
        let process = self.supervisor.create(account)?;
        if let Some(watchdog) = Watchdog::spawn(&process, self.restart_policy) {
            self.watchdogs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(process.uin(), watchdog);
        }
        Ok(process)
    }

    /// All registered uins, ascending
    pub fn list_accounts(&self) -> Vec<u64> {
        self.supervisor.all()
    }

    /// Register a new account; it is not started.
    pub fn create_account(
        &self,
        uin: u64,
        creation: Option<AccountCreation>,
    ) -> Result<ProcessAccount> {
        let account = creation.unwrap_or_default().into_account(uin);
        let process = self.register(account)?;
        Ok(process.account().metadata())
    }

    /// Stop the account's gateway and forget the account.
    pub async fn remove_account(&self, uin: u64) -> Result<()> {
        // Drop the watchdog first so the stop isn't raced by a restart
        self.watchdogs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&uin);
        self.supervisor.remove(uin).await?;
        Ok(())
    }

    pub fn account(&self, uin: u64) -> Result<ProcessAccount> {
        Ok(self.supervisor.resolve(uin)?.account().metadata())
    }

    pub fn status(&self, uin: u64) -> Result<ProcessInfo> {
        Ok(self.supervisor.resolve(uin)?.status())
    }

    pub fn device(&self, uin: u64) -> Result<Value> {
        Ok(self.supervisor.resolve(uin)?.device())
    }

    /// Buffered history, oldest first unless `reverse`
    pub fn logs(&self, uin: u64, reverse: bool) -> Result<Vec<ProcessLog>> {
        Ok(self.supervisor.resolve(uin)?.logs().list(reverse))
    }

    /// Live stream of lines appended from now on
    pub fn subscribe_logs(&self, uin: u64) -> Result<LogSubscription> {
        Ok(self
            .supervisor
            .resolve(uin)?
            .subscribe_logs(self.subscriber_capacity))
    }

    pub async fn start(&self, uin: u64) -> Result<()> {
        self.supervisor.resolve(uin)?.start().await
    }

    pub async fn stop(&self, uin: u64) -> Result<()> {
        self.supervisor.resolve(uin)?.stop().await
    }

    pub async fn restart(&self, uin: u64) -> Result<()> {
        self.supervisor.resolve(uin)?.restart().await
    }

    /// Forward a line to the gateway's stdin
    pub async fn send_input(&self, uin: u64, line: &str) -> Result<()> {
        self.supervisor.resolve(uin)?.send_input(line).await
    }

    /// Start every account flagged `auto_start`. Failures are logged and
    /// returned per uin; they don't stop the remaining starts.
    pub async fn auto_start(&self, entries: &[AccountEntry]) -> Vec<(u64, Result<()>)> {
        let mut results = Vec::new();
        for entry in entries.iter().filter(|e| e.auto_start) {
            let uin = entry.account.uin;
            let result = self.start(uin).await;
            if let Err(e) = &result {
                error!("Auto-start of account {} failed: {}", uin, e);
            }
            results.push((uin, result));
        }
        results
    }

    /// Stop watchdogs, then every gateway.
    pub async fn shutdown(&self) {
        let watchdogs = std::mem::take(
            &mut *self
                .watchdogs
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        drop(watchdogs);
        info!("Stopping {} account(s)", self.supervisor.len());
        self.supervisor.stop_all().await;
    }
}
