use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::bail;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::coordinator::DEFAULT_PARALLEL_FETCH_LIMIT;

pub const CONFIG_FILE_NAME: &str = "vendorsync.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorsyncConfig {
    pub cache_dir: Option<PathBuf>,
    pub fetch_jobs: Option<usize>,
}

impl VendorsyncConfig {
    /// Reads `vendorsync.toml` from `root` if present, then `VENDORSYNC_*` variables.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(Some(&root.join(CONFIG_FILE_NAME)), None)?;
        Ok(Self::from_raw(raw_config))
    }

    fn from_raw(raw_config: RawConfig) -> Self {
        Self {
            cache_dir: raw_config.cache.dir,
            fetch_jobs: raw_config.fetch.jobs,
        }
    }
}

/// Applies the default to the number of parallel fetches that won, rejecting zero.
pub fn resolve_fetch_jobs(jobs: Option<usize>) -> anyhow::Result<usize> {
    match jobs {
        None => Ok(DEFAULT_PARALLEL_FETCH_LIMIT),
        Some(0) => bail!("The number of parallel fetch jobs must be 1 or more."),
        Some(jobs) => Ok(jobs),
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    fetch: FetchConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct FetchConfig {
    jobs: Option<usize>,
}

impl RawConfig {
    fn load(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        builder
            .add_source(
                Environment::with_prefix("VENDORSYNC")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
