use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use serde_json::Value;
use thiserror::Error;
use tokio::task::{self, JoinError};

use crate::{
    cache::{CacheError, CacheKey, CacheStore},
    coordinator::{CoordinatorError, FetchCoordinator},
    filter::PathFilter,
};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Error while coordinating fetch: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("Fetch task failed: {0}")]
    Task(#[from] JoinError),
    #[error("Fetcher failed for module {module}: {source}")]
    Fetcher {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Fills a directory with a module's contents from its source of truth.
///
/// Implementations are the fetcher plugins. They are only called on a cache miss, with
/// exclusive access to the job's cache key and scratch root, on tokio's blocking pool.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, job: &FetchJob, dest: &Path) -> anyhow::Result<()>;
}

/// One module to bring into the workspace.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub name: String,
    /// Plugin type and resolved parameters. The cache key is derived from it.
    pub identity: Value,
    /// Private working directory of the plugin, shared by every job using that plugin.
    pub plugin_root: Option<PathBuf>,
    pub filter: PathFilter,
}

impl FetchJob {
    pub fn new(name: impl Into<String>, identity: Value) -> Self {
        FetchJob {
            name: name.into(),
            identity,
            plugin_root: None,
            filter: PathFilter::default(),
        }
    }

    pub fn with_plugin_root(mut self, plugin_root: impl Into<PathBuf>) -> Self {
        self.plugin_root = Some(plugin_root.into());
        self
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_value(&self.identity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub key: CacheKey,
    pub cache_hit: bool,
}

/// Brings `job` into `dest`, fetching it only if the cache has no entry for its key.
///
/// Concurrent calls for the same key perform a single fetch; the others wait and then
/// restore from the cache. A failed fetch stores nothing, so the next caller retries.
///
/// The fetch and the tree copies run on the blocking pool while the coordinator's locks
/// are held. Dropping the returned future releases the locks but does not stop work that
/// has already started there.
pub async fn fetch_module<F: Fetcher + ?Sized + 'static>(
    coordinator: &FetchCoordinator,
    cache: &Arc<CacheStore>,
    fetcher: &Arc<F>,
    job: &FetchJob,
    dest: &Path,
) -> Result<FetchOutcome, FetchError> {
    let key = job.cache_key();
    let cache_hit = coordinator
        .run(&key, job.plugin_root.as_deref(), || {
            let cache = Arc::clone(cache);
            let fetcher = Arc::clone(fetcher);
            let job = job.clone();
            let key = key.clone();
            let dest = dest.to_path_buf();
            task::spawn_blocking(move || {
                fetch_or_restore(&cache, fetcher.as_ref(), &job, &key, &dest)
            })
        })
        .await??;
    Ok(FetchOutcome {
        key,
        cache_hit: cache_hit?,
    })
}

fn fetch_or_restore<F: Fetcher + ?Sized>(
    cache: &CacheStore,
    fetcher: &F,
    job: &FetchJob,
    key: &CacheKey,
    dest: &Path,
) -> Result<bool, FetchError> {
    let cache_hit = cache.has(key);
    if cache_hit {
        debug!("Skipping fetching {}. Already in cache as {}", job.name, key);
    } else {
        info!("Fetching {}", job.name);
        fetch_into_cache(cache, fetcher, job, key)?;
    }
    cache.get_filtered(key, dest, &job.filter)?;
    Ok(cache_hit)
}

fn fetch_into_cache<F: Fetcher + ?Sized>(
    cache: &CacheStore,
    fetcher: &F,
    job: &FetchJob,
    key: &CacheKey,
) -> Result<(), FetchError> {
    let tmp = cache.tmp_dir()?;
    fetcher
        .fetch(job, tmp.path())
        .map_err(|source| FetchError::Fetcher {
            module: job.name.clone(),
            source,
        })?;
    cache.put(key, tmp.path())?;
    Ok(())
}
