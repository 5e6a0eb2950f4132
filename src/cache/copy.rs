use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::trace;
use walkdir::WalkDir;

use crate::filter::PathFilter;

use super::CacheError;

/// Recursively copies the contents of `src` into `dest`, merging with whatever `dest`
/// already holds. Symlinks are recreated with their original target and never followed,
/// on either side. Entries rejected by `filter` are skipped, as are the directories that
/// only held them.
///
/// A symlink in `dest` standing where `src` has a directory is replaced by a real
/// directory. A real directory in `dest` is never removed: restoring a file or symlink
/// over it fails with [`CacheError::Conflict`].
pub(super) fn copy_tree(
    src: &Path,
    dest: &Path,
    filter: Option<&PathFilter>,
) -> Result<(), CacheError> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let relative = relative_path(entry.path(), src)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if filter.is_none() {
                create_dirs(dest, &relative)?;
            }
            continue;
        }
        if let Some(filter) = filter {
            if !filter.allows(&relative) {
                trace!("Filtered out {}", relative.display());
                continue;
            }
        }
        if let Some(parent) = relative.parent() {
            create_dirs(dest, parent)?;
        }
        let target = dest.join(&relative);
        clear_leaf(&target)?;
        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn relative_path(path: &Path, base: &Path) -> Result<PathBuf, CacheError> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .map_err(|_| CacheError::BadLocation {
            location: path.to_string_lossy().to_string(),
        })
}

/// Creates `dest/relative` one component at a time without following symlinks.
fn create_dirs(dest: &Path, relative: &Path) -> Result<(), CacheError> {
    let mut current = dest.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(metadata) if metadata.file_type().is_symlink() => {
                trace!("Replacing symlink {} with a directory", current.display());
                remove_link(&current)?;
                fs::create_dir(&current)?;
            }
            Ok(_) => return Err(conflict(&current)),
            Err(error) if error.kind() == ErrorKind::NotFound => fs::create_dir(&current)?,
            Err(error) => return Err(error.into()),
        }
    }
    Ok(())
}

/// Makes room for a file or symlink at `target`.
fn clear_leaf(target: &Path) -> Result<(), CacheError> {
    match fs::symlink_metadata(target) {
        Ok(metadata) if metadata.is_dir() => Err(conflict(target)),
        Ok(metadata) if metadata.file_type().is_symlink() => Ok(remove_link(target)?),
        Ok(_) => Ok(fs::remove_file(target)?),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

fn conflict(path: &Path) -> CacheError {
    CacheError::Conflict {
        path: path.to_string_lossy().to_string(),
    }
}

// Directory symlinks on Windows can only be removed with `remove_dir`.
fn remove_link(path: &Path) -> std::io::Result<()> {
    fs::remove_file(path).or_else(|_| fs::remove_dir(path))
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    let resolved = link
        .parent()
        .map(|parent| parent.join(original))
        .unwrap_or_else(|| original.to_path_buf());
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(original, link)
    } else {
        std::os::windows::fs::symlink_file(original, link)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::os::unix::fs::symlink;

    #[test]
    fn symlinks_are_not_followed() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(src.path().join("file"), "content").unwrap();
        symlink("file", src.path().join("link")).unwrap();
        symlink("/does/not/exist", src.path().join("dangling")).unwrap();

        copy_tree(src.path(), dest.path(), None).unwrap();

        let link = dest.path().join("link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("file"));
        assert_eq!(
            fs::read_link(dest.path().join("dangling")).unwrap(),
            PathBuf::from("/does/not/exist")
        );
    }

    #[test]
    fn copy_merges_into_existing_destination() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a"), "new").unwrap();
        fs::write(dest.path().join("a"), "old").unwrap();
        fs::write(dest.path().join("untracked"), "stuff").unwrap();

        copy_tree(src.path(), dest.path(), None).unwrap();

        assert_eq!(fs::read_to_string(dest.path().join("a")).unwrap(), "new");
        assert_eq!(
            fs::read_to_string(dest.path().join("untracked")).unwrap(),
            "stuff"
        );
    }

    #[test]
    fn empty_directories_are_copied_without_filter() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("empty/nested")).unwrap();

        copy_tree(src.path(), dest.path(), None).unwrap();

        assert!(dest.path().join("empty/nested").is_dir());
    }

    #[test]
    fn symlink_over_existing_directory_is_a_conflict() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("real")).unwrap();
        symlink("real", src.path().join("b")).unwrap();
        fs::create_dir(dest.path().join("b")).unwrap();
        fs::write(dest.path().join("b/user_work.txt"), "keep me").unwrap();

        let error = copy_tree(src.path(), dest.path(), None).unwrap_err();

        assert!(matches!(error, CacheError::Conflict { .. }));
        let b = dest.path().join("b");
        assert!(fs::symlink_metadata(&b).unwrap().is_dir());
        assert_eq!(
            fs::read_to_string(b.join("user_work.txt")).unwrap(),
            "keep me"
        );
    }

    #[test]
    fn file_over_existing_directory_is_a_conflict() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a"), "file").unwrap();
        fs::create_dir(dest.path().join("a")).unwrap();
        fs::write(dest.path().join("a/inner"), "keep me").unwrap();

        let error = copy_tree(src.path(), dest.path(), None).unwrap_err();

        assert!(matches!(error, CacheError::Conflict { .. }));
        assert!(dest.path().join("a/inner").is_file());
    }

    #[test]
    fn directory_over_existing_symlink_stays_inside_dest() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("b")).unwrap();
        fs::write(src.path().join("b/c"), "entry").unwrap();
        symlink(outside.path(), dest.path().join("b")).unwrap();

        copy_tree(src.path(), dest.path(), None).unwrap();

        assert!(!outside.path().join("c").exists());
        let b = dest.path().join("b");
        assert!(fs::symlink_metadata(&b).unwrap().is_dir());
        assert_eq!(fs::read_to_string(b.join("c")).unwrap(), "entry");
    }

    #[test]
    fn filtered_restore_does_not_follow_symlinked_parent() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("b/d")).unwrap();
        fs::write(src.path().join("b/d/c"), "entry").unwrap();
        symlink(outside.path(), dest.path().join("b")).unwrap();
        let filter = PathFilter::new(["b/d"], [] as [&str; 0]).unwrap();

        copy_tree(src.path(), dest.path(), Some(&filter)).unwrap();

        assert!(!outside.path().join("d").exists());
        assert!(dest.path().join("b/d/c").is_file());
    }

    #[test]
    fn file_and_symlink_replace_each_other() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("target"), "outside").unwrap();
        fs::write(src.path().join("was_link"), "new").unwrap();
        symlink("was_link", src.path().join("was_file")).unwrap();
        symlink(outside.path().join("target"), dest.path().join("was_link")).unwrap();
        fs::write(dest.path().join("was_file"), "old").unwrap();

        copy_tree(src.path(), dest.path(), None).unwrap();

        assert_eq!(
            fs::read_to_string(outside.path().join("target")).unwrap(),
            "outside"
        );
        let was_link = dest.path().join("was_link");
        assert!(fs::symlink_metadata(&was_link).unwrap().is_file());
        assert_eq!(fs::read_to_string(&was_link).unwrap(), "new");
        assert_eq!(
            fs::read_link(dest.path().join("was_file")).unwrap(),
            PathBuf::from("was_link")
        );
    }
}
