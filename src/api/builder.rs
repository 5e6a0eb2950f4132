use std::{env, path::PathBuf, sync::Arc};

use anyhow::anyhow;
use home::home_dir;

use crate::{
    cache::CacheStore,
    config::{resolve_fetch_jobs, VendorsyncConfig},
    coordinator::FetchCoordinator,
    Vendorsync,
};

#[derive(Default)]
pub struct VendorsyncBuilder {
    // All other paths are relative to `root`
    root: Option<PathBuf>,
    cache_directory_path: Option<PathBuf>,
    fetch_jobs: Option<usize>,
}

impl VendorsyncBuilder {
    /// Project root directory.
    ///
    /// Defaults to the current directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Location of the cache directory.
    ///
    /// Defaults to `cache.dir` from the configuration, then `$HOME/.vendorsync/cache`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory_path = Some(path.into());
        self
    }

    /// Maximum number of fetches running at the same time.
    ///
    /// Defaults to `fetch.jobs` from the configuration, then 10.
    pub fn fetch_jobs(mut self, jobs: usize) -> Self {
        self.fetch_jobs = Some(jobs);
        self
    }

    pub fn try_build(self) -> anyhow::Result<Vendorsync> {
        let Self {
            root,
            cache_directory_path,
            fetch_jobs,
        } = self;
        let root = match root {
            Some(root) => root,
            None => env::current_dir()?,
        };

        let config = VendorsyncConfig::load(&root)?;

        let cache_directory = match cache_directory_path.or(config.cache_dir) {
            Some(path) => root.join(path),
            None => default_cache_directory()?,
        };

        let fetch_jobs = resolve_fetch_jobs(fetch_jobs.or(config.fetch_jobs))?;

        let cache = CacheStore::new(cache_directory)?;

        Ok(Vendorsync {
            cache: Arc::new(cache),
            coordinator: Arc::new(FetchCoordinator::new(fetch_jobs)),
        })
    }
}

fn default_cache_directory() -> anyhow::Result<PathBuf> {
    let mut cache_directory = home_dir()
        .ok_or_else(|| anyhow!("Could not find home dir. Please define $HOME env variable."))?;
    cache_directory.push(".vendorsync/cache");
    Ok(cache_directory)
}
