pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod filter;
pub mod glob;

mod api;
mod flock;

pub use api::{Vendorsync, VendorsyncBuilder};
pub use cache::{compute_key, CacheError, CacheKey, CacheStore};
pub use coordinator::{CoordinatorError, FetchCoordinator};
pub use fetch::{fetch_module, FetchError, FetchJob, FetchOutcome, Fetcher};
pub use filter::PathFilter;
pub use glob::{GlobError, GlobMatcher};
