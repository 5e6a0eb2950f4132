mod copy;
mod key;
mod tree;

use std::{
    fs::{self, File},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::{debug, info, trace};
use sha1::{Digest, Sha1};
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;

use crate::{filter::PathFilter, flock::FileLock};

pub use key::{compute_key, CacheKey};

const CACHE_DIR: &str = "cache";
const TREE_DIR: &str = "tree";
const TMP_DIR: &str = "tmp";
const LOCK_FILE: &str = ".lock";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache location {location} is not a directory")]
    BadLocation { location: String },
    #[error("No cache entry for key {key}")]
    NotFound { key: CacheKey },
    #[error("Cannot restore over {path}: a different kind of entry is already there")]
    Conflict { path: String },
    #[error("No tree with hash {hash}")]
    TreeNotFound { hash: String },
    #[error("Cache lock cannot be acquired")]
    Lock(#[from] crate::flock::Error),
    #[error("Error while walking directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// On-disk store with two namespaces: `cache/<key>` holds full copies of fetched trees
/// addressed by their declared identity, `tree/<hash>` holds archives addressed by the
/// SHA-1 of their own bytes.
///
/// The store does no locking between keys. Callers must hold the key's lock from
/// [`FetchCoordinator`](crate::coordinator::FetchCoordinator) while mutating an entry.
#[derive(Debug)]
pub struct CacheStore {
    location: PathBuf,
    _lock: FileLock,
}

impl CacheStore {
    pub fn new(location: PathBuf) -> Result<CacheStore, CacheError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(CacheError::BadLocation {
                    location: location.to_string_lossy().to_string(),
                });
            }
        } else {
            fs::create_dir_all(&location)?;
        }

        let lock = Self::acquire_lock(&location)?;

        Ok(CacheStore {
            location,
            _lock: lock,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_dir()
    }

    /// Replaces the entry for `key` with a copy of `src`.
    ///
    /// The copy is staged under `tmp/` and renamed into place, so an interrupted put
    /// leaves either the previous entry or no entry, never a partial one.
    pub fn put(&self, key: &CacheKey, src: &Path) -> Result<(), CacheError> {
        debug!("Storing {} as {}", src.display(), key);
        let staging = self.tmp_dir()?;
        let staged = staging.path().join(key.as_str());
        copy::copy_tree(src, &staged, None)?;

        let entry = self.entry_path(key);
        if entry.exists() {
            trace!("Removing previous entry {}", entry.display());
            fs::remove_dir_all(&entry)?;
        }
        fs::create_dir_all(self.location.join(CACHE_DIR))?;
        fs::rename(&staged, &entry)?;
        Ok(())
    }

    pub fn get(&self, key: &CacheKey, dest: &Path) -> Result<(), CacheError> {
        self.copy_entry(key, dest, None)
    }

    /// Like [`get`](Self::get), restoring only the paths `filter` allows.
    pub fn get_filtered(
        &self,
        key: &CacheKey,
        dest: &Path,
        filter: &PathFilter,
    ) -> Result<(), CacheError> {
        self.copy_entry(key, dest, Some(filter))
    }

    /// Archives the contents of `src` into `tree/` and returns the archive's hash.
    pub fn put_tree(&self, src: &Path) -> Result<String, CacheError> {
        let blob = tree::archive(src)?;
        let hash = hex::encode(Sha1::digest(&blob));
        let path = self.tree_path(&hash);
        if path.is_file() {
            debug!("Tree {} is already stored", hash);
            return Ok(hash);
        }

        let tmp = self.location.join(TMP_DIR);
        fs::create_dir_all(&tmp)?;
        let mut staged = NamedTempFile::new_in(&tmp)?;
        std::io::Write::write_all(&mut staged, &blob)?;
        fs::create_dir_all(self.location.join(TREE_DIR))?;
        staged.persist(&path).map_err(|e| e.error)?;
        debug!("Stored tree {} from {}", hash, src.display());
        Ok(hash)
    }

    pub fn has_tree(&self, hash: &str) -> bool {
        self.tree_path(hash).is_file()
    }

    /// Unpacks a tree stored by [`put_tree`](Self::put_tree) into `dest`.
    pub fn get_tree(&self, hash: &str, dest: &Path) -> Result<(), CacheError> {
        let file = match File::open(self.tree_path(hash)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::TreeNotFound {
                    hash: hash.to_owned(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Exporting tree {} to {}", hash, dest.display());
        tree::unpack(file, dest)
    }

    /// Deletes every entry and tree. The store stays usable.
    pub fn clear(&self) -> Result<(), CacheError> {
        info!("Clearing cache {}.", self.location.display());
        for namespace in [CACHE_DIR, TREE_DIR, TMP_DIR] {
            match fs::remove_dir_all(self.location.join(namespace)) {
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                otherwise => otherwise?,
            }
        }
        Ok(())
    }

    fn copy_entry(
        &self,
        key: &CacheKey,
        dest: &Path,
        filter: Option<&PathFilter>,
    ) -> Result<(), CacheError> {
        if !self.has(key) {
            return Err(CacheError::NotFound { key: key.clone() });
        }
        debug!("Restoring {} to {}", key, dest.display());
        copy::copy_tree(&self.entry_path(key), dest, filter)
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.location.join(CACHE_DIR).join(key.as_str())
    }

    fn tree_path(&self, hash: &str) -> PathBuf {
        self.location.join(TREE_DIR).join(hash)
    }

    /// A fresh scratch directory under the store's `tmp/`, removed when dropped.
    pub fn tmp_dir(&self) -> Result<TempDir, CacheError> {
        let tmp = self.location.join(TMP_DIR);
        fs::create_dir_all(&tmp)?;
        Ok(TempDir::new_in(tmp)?)
    }

    fn acquire_lock(location: &Path) -> Result<FileLock, CacheError> {
        let location = location.join(LOCK_FILE);
        debug!(
            "Acquiring a lock on the cache location: {}",
            location.display()
        );
        let lock = FileLock::new(&location)?;
        info!("Acquired a lock on the cache location");
        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn create_dir(content: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, text) in content {
            let path = dir.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        dir
    }

    fn read_dir(dir: &Path) -> BTreeMap<String, String> {
        walkdir::WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .map(Result::unwrap)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let relative = e.path().strip_prefix(dir).unwrap();
                (
                    relative.to_string_lossy().replace('\\', "/"),
                    fs::read_to_string(e.path()).unwrap(),
                )
            })
            .collect()
    }

    fn expected(content: &[(&str, &str)]) -> BTreeMap<String, String> {
        content
            .iter()
            .map(|(p, t)| (p.to_string(), t.to_string()))
            .collect()
    }

    const CONTENT: &[(&str, &str)] = &[("a", "foo"), ("b/c", "bar"), ("b/d", "baz")];

    fn store() -> (TempDir, CacheStore) {
        let root = tempfile::tempdir().unwrap();
        let store = CacheStore::new(root.path().join("cache-root")).unwrap();
        (root, store)
    }

    #[test]
    fn has_only_after_put() {
        let (_root, store) = store();
        let key = compute_key(&json!({"type": "curl", "url": "x"})).unwrap();
        assert!(!store.has(&key));
        let src = create_dir(CONTENT);
        store.put(&key, src.path()).unwrap();
        assert!(store.has(&key));
        assert!(store.location().join("cache").join(key.as_str()).is_dir());
    }

    #[test]
    fn put_then_get_reproduces_contents() {
        let (_root, store) = store();
        let key = compute_key(&json!({"rev": 1})).unwrap();
        let src = create_dir(CONTENT);
        store.put(&key, src.path()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        store.get(&key, dest.path()).unwrap();
        assert_eq!(read_dir(dest.path()), expected(CONTENT));
    }

    #[test]
    fn second_put_leaves_no_residue() {
        let (_root, store) = store();
        let key = compute_key(&json!({"rev": 1})).unwrap();
        store.put(&key, create_dir(CONTENT).path()).unwrap();
        let replacement = [("fee/fi", "fo fum")];
        store.put(&key, create_dir(&replacement).path()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        store.get(&key, dest.path()).unwrap();
        assert_eq!(read_dir(dest.path()), expected(&replacement));
        assert!(!dest.path().join("a").exists());
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let (_root, store) = store();
        let key = CacheKey::new("0".repeat(40));
        let dest = tempfile::tempdir().unwrap();
        let error = store.get(&key, dest.path()).unwrap_err();
        assert!(matches!(error, CacheError::NotFound { key: k } if k == key));
    }

    #[test]
    fn get_filtered_applies_picks_and_excludes() {
        let (_root, store) = store();
        let key = compute_key(&json!({"rev": 2})).unwrap();
        store.put(&key, create_dir(CONTENT).path()).unwrap();

        let dest = tempfile::tempdir().unwrap();
        let filter = PathFilter::new(["b"], ["b/c"]).unwrap();
        store.get_filtered(&key, dest.path(), &filter).unwrap();
        assert_eq!(read_dir(dest.path()), expected(&[("b/d", "baz")]));
    }

    #[test]
    fn put_tree_is_content_addressed() {
        let (_root, store) = store();
        let first = store.put_tree(create_dir(CONTENT).path()).unwrap();
        let again = store.put_tree(create_dir(CONTENT).path()).unwrap();
        let other = store.put_tree(create_dir(&[("a", "changed")]).path()).unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert!(store.has_tree(&first));

        let blob = fs::read(store.location().join("tree").join(&first)).unwrap();
        assert_eq!(hex::encode(Sha1::digest(&blob)), first);
    }

    #[test]
    fn get_tree_restores_contents() {
        let (_root, store) = store();
        let hash = store.put_tree(create_dir(CONTENT).path()).unwrap();
        let dest = tempfile::tempdir().unwrap();
        store.get_tree(&hash, dest.path()).unwrap();
        assert_eq!(read_dir(dest.path()), expected(CONTENT));

        let error = store.get_tree("missing", dest.path()).unwrap_err();
        assert!(matches!(error, CacheError::TreeNotFound { .. }));
    }

    #[test]
    fn clear_removes_everything() {
        let (_root, store) = store();
        let key = compute_key(&json!({"rev": 3})).unwrap();
        store.put(&key, create_dir(CONTENT).path()).unwrap();
        let hash = store.put_tree(create_dir(CONTENT).path()).unwrap();

        store.clear().unwrap();

        assert!(!store.has(&key));
        assert!(!store.has_tree(&hash));
        store.put(&key, create_dir(CONTENT).path()).unwrap();
        assert!(store.has(&key));
    }

    #[test]
    fn file_as_location_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("file");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            CacheStore::new(file),
            Err(CacheError::BadLocation { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_survive_put_and_get() {
        use std::os::unix::fs::symlink;

        let (_root, store) = store();
        let src = create_dir(CONTENT);
        symlink("b/c", src.path().join("link")).unwrap();
        symlink("b", src.path().join("dirlink")).unwrap();
        let key = compute_key(&json!({"rev": 4})).unwrap();
        store.put(&key, src.path()).unwrap();

        let stored = store.location().join("cache").join(key.as_str()).join("link");
        assert!(fs::symlink_metadata(&stored).unwrap().file_type().is_symlink());

        let dest = tempfile::tempdir().unwrap();
        store.get(&key, dest.path()).unwrap();
        for (name, target) in [("link", "b/c"), ("dirlink", "b")] {
            let restored = dest.path().join(name);
            assert!(fs::symlink_metadata(&restored)
                .unwrap()
                .file_type()
                .is_symlink());
            assert_eq!(fs::read_link(&restored).unwrap(), PathBuf::from(target));
        }
        assert_eq!(fs::read_to_string(dest.path().join("link")).unwrap(), "bar");
    }

    #[cfg(unix)]
    #[test]
    fn get_keeps_user_directory_shadowed_by_entry_symlink() {
        use std::os::unix::fs::symlink;

        let (_root, store) = store();
        let src = create_dir(&[("real/file", "entry")]);
        symlink("real", src.path().join("b")).unwrap();
        let key = compute_key(&json!({"rev": 5})).unwrap();
        store.put(&key, src.path()).unwrap();

        let dest = create_dir(&[("b/user_work.txt", "mine")]);
        let error = store.get(&key, dest.path()).unwrap_err();

        assert!(matches!(error, CacheError::Conflict { .. }));
        assert_eq!(
            fs::read_to_string(dest.path().join("b/user_work.txt")).unwrap(),
            "mine"
        );
    }
}
