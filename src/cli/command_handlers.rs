use std::{error::Error, io::Write, path::Path};

use log::info;
use serde_json::Value;

use crate::{
    cache::{CacheKey, CacheStore},
    filter::PathFilter,
    glob::GlobMatcher,
};

/// Handler to key command
pub fn do_key(json: &str, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    let value: Value = serde_json::from_str(json)?;
    writeln!(out, "{}", CacheKey::from_value(&value))?;
    Ok(())
}

/// Handler to has command. Returns whether the entry exists.
pub fn do_has(cache: &CacheStore, key: &str) -> Result<bool, Box<dyn Error>> {
    let key = parse_key(key)?;
    Ok(cache.has(&key))
}

pub fn do_put(cache: &CacheStore, key: &str, directory: &Path) -> Result<(), Box<dyn Error>> {
    let key = parse_key(key)?;
    if !directory.is_dir() {
        return Err(format!("{} is not a directory", directory.display()).into());
    }
    cache.put(&key, directory)?;
    info!("Stored {} as {}", directory.display(), key);
    Ok(())
}

pub fn do_get(
    cache: &CacheStore,
    key: &str,
    directory: &Path,
    picks: &[String],
    excludes: &[String],
) -> Result<(), Box<dyn Error>> {
    let key = parse_key(key)?;
    let filter = PathFilter::new(picks, excludes)?;
    if filter.is_empty() {
        cache.get(&key, directory)?;
    } else {
        cache.get_filtered(&key, directory, &filter)?;
    }
    info!("Restored {} to {}", key, directory.display());
    Ok(())
}

pub fn do_put_tree(
    cache: &CacheStore,
    directory: &Path,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let hash = cache.put_tree(directory)?;
    writeln!(out, "{}", hash)?;
    Ok(())
}

pub fn do_get_tree(cache: &CacheStore, hash: &str, directory: &Path) -> Result<(), Box<dyn Error>> {
    if !is_sha1_hex(hash) {
        return Err(format!("{} is not a tree hash", hash).into());
    }
    cache.get_tree(hash, directory)?;
    Ok(())
}

/// Handler to glob command. Prints every path the pattern matches, one per line.
pub fn do_glob(
    pattern: &str,
    paths: &[String],
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let matcher = GlobMatcher::compile(pattern)?;
    for path in paths.iter().filter(|p| matcher.is_match(p)) {
        writeln!(out, "{}", path)?;
    }
    Ok(())
}

pub fn do_clear_cache(cache: &CacheStore) -> Result<(), Box<dyn Error>> {
    cache.clear()?;
    Ok(())
}

fn parse_key(key: &str) -> Result<CacheKey, Box<dyn Error>> {
    if is_sha1_hex(key) {
        Ok(CacheKey::new(key.to_owned()))
    } else {
        Err(format!("{} is not a cache key", key).into())
    }
}

fn is_sha1_hex(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
