use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use log::trace;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

use crate::cache::CacheKey;

pub const DEFAULT_PARALLEL_FETCH_LIMIT: usize = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Fetch coordinator was closed")]
    Closed,
}

/// Bounds the number of fetches in flight and serializes fetches that share a cache key
/// or a plugin scratch directory.
///
/// Locks are created on first use and live as long as the coordinator.
#[derive(Debug)]
pub struct FetchCoordinator {
    gate: Semaphore,
    parallelism: usize,
    key_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    plugin_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl Default for FetchCoordinator {
    fn default() -> Self {
        FetchCoordinator::new(DEFAULT_PARALLEL_FETCH_LIMIT)
    }
}

impl FetchCoordinator {
    /// `parallelism` is clamped to at least one permit.
    pub fn new(parallelism: usize) -> Self {
        let parallelism = parallelism.max(1);
        FetchCoordinator {
            gate: Semaphore::new(parallelism),
            parallelism,
            key_locks: DashMap::new(),
            plugin_locks: DashMap::new(),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runs `f` holding a gate permit, the lock for `key` and, if given, the lock for
    /// `plugin_root`.
    ///
    /// Everything is released in reverse order once `f` completes, fails or the returned
    /// future is dropped. The output of `f` is passed through untouched.
    pub async fn run<F, Fut, T>(
        &self,
        key: &CacheKey,
        plugin_root: Option<&Path>,
        f: F,
    ) -> Result<T, CoordinatorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| CoordinatorError::Closed)?;
        trace!("Acquired fetch permit for {}", key);

        let key_lock = self.key_locks.entry(key.clone()).or_default().clone();
        let _key_guard = key_lock.lock_owned().await;
        trace!("Acquired key lock for {}", key);

        let _plugin_guard = match plugin_root {
            Some(root) => {
                let plugin_lock = self
                    .plugin_locks
                    .entry(root.to_path_buf())
                    .or_default()
                    .clone();
                let guard = plugin_lock.lock_owned().await;
                trace!("Acquired plugin lock for {}", root.display());
                Some(guard)
            }
            None => None,
        };

        Ok(f().await)
    }

    /// Stops admitting fetches. Callers waiting for a permit get [`CoordinatorError::Closed`];
    /// fetches already running finish normally.
    pub fn close(&self) {
        self.gate.close();
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}
