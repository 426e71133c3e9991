//! Registry of supervised accounts

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use gocq_core::prelude::*;
use gocq_core::AccountConfig;
use gocq_daemon::{GoCQProcess, LaunchSpec, ProcessHandle, DEFAULT_LOG_CAPACITY};

/// Maps account uin to its process.
///
/// A uin is registered at most once. Registration never starts the process.
#[derive(Debug)]
pub struct ProcessSupervisor {
    processes: RwLock<BTreeMap<u64, ProcessHandle>>,
    launch: LaunchSpec,
    log_capacity: usize,
}

impl ProcessSupervisor {
    pub fn new(launch: LaunchSpec) -> Self {
        Self::with_log_capacity(launch, DEFAULT_LOG_CAPACITY)
    }

    pub fn with_log_capacity(launch: LaunchSpec, log_capacity: usize) -> Self {
        Self {
            processes: RwLock::new(BTreeMap::new()),
            launch,
            log_capacity,
        }
    }

    pub fn launch_spec(&self) -> &LaunchSpec {
        &self.launch
    }

    /// Register a stopped process for `account`.
    pub fn create(&self, account: AccountConfig) -> Result<ProcessHandle> {
        let mut processes = self
            .processes
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let uin = account.uin;
        if processes.contains_key(&uin) {
            return Err(Error::DuplicateAccount { uin });
        }

        let process = Arc::new(GoCQProcess::new(
            account,
            self.launch.clone(),
            self.log_capacity,
        ));
        processes.insert(uin, Arc::clone(&process));
        info!("Registered account {}", uin);
        Ok(process)
    }

    pub fn get(&self, uin: u64) -> Option<ProcessHandle> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uin)
            .cloned()
    }

    /// Like [`get`](Self::get), but a missing account is [`Error::NotFound`].
    pub fn resolve(&self, uin: u64) -> Result<ProcessHandle> {
        self.get(uin).ok_or(Error::NotFound { uin })
    }

    /// Registered uins, ascending
    pub fn all(&self) -> Vec<u64> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Handles of every registered process, ordered by uin
    pub fn handles(&self) -> Vec<ProcessHandle> {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Unregister the account, then stop its process for good.
    ///
    /// Starts racing the removal through an already resolved handle either
    /// finish before the stop or fail with [`Error::NotFound`].
    pub async fn remove(&self, uin: u64) -> Result<ProcessHandle> {
        let process = self
            .processes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&uin)
            .ok_or(Error::NotFound { uin })?;
        info!("Unregistered account {}", uin);

        process.retire().await?;
        Ok(process)
    }

    /// Stop every registered process. Errors are logged, not returned.
    pub async fn stop_all(&self) {
        for process in self.handles() {
            if let Err(e) = process.stop().await {
                warn!("Failed to stop account {}: {}", process.uin(), e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.processes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
