use std::{path::Path, sync::Arc};

use crate::{
    cache::{CacheError, CacheStore},
    coordinator::FetchCoordinator,
    fetch::{self, FetchError, FetchJob, FetchOutcome, Fetcher},
};

mod builder;

pub use builder::VendorsyncBuilder;

/// Entry point wiring a cache store and a fetch coordinator together.
///
/// Cloning is cheap; clones share the store and the coordinator, so jobs issued from
/// different tasks are gated and deduplicated together.
#[derive(Clone, Debug)]
pub struct Vendorsync {
    cache: Arc<CacheStore>,
    coordinator: Arc<FetchCoordinator>,
}

impl Vendorsync {
    pub fn builder() -> VendorsyncBuilder {
        VendorsyncBuilder::default()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Fetches `job` into `dest`, reusing the cached tree when one exists
    pub async fn fetch<F: Fetcher + ?Sized + 'static>(
        &self,
        fetcher: &Arc<F>,
        job: &FetchJob,
        dest: &Path,
    ) -> Result<FetchOutcome, FetchError> {
        fetch::fetch_module(&self.coordinator, &self.cache, fetcher, job, dest).await
    }

    /// Records the current contents of `dir` as a tree and returns its hash
    pub fn snapshot(&self, dir: &Path) -> Result<String, CacheError> {
        self.cache.put_tree(dir)
    }

    /// Stops admitting new fetches
    pub fn shutdown(&self) {
        self.coordinator.close();
    }

    pub fn clear_cache(&self) -> Result<(), CacheError> {
        self.cache.clear()
    }
}
