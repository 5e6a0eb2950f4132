use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use log::trace;
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

use super::CacheError;

/// Builds a gzip compressed tar of everything under `src`, named relative to `src`.
///
/// Entries are sorted and carry no timestamps or owners, so the same contents always
/// produce the same bytes.
pub(super) fn archive(src: &Path) -> Result<Vec<u8>, CacheError> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for entry in WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| CacheError::BadLocation {
                location: entry.path().to_string_lossy().to_string(),
            })?;
        let metadata = entry.path().symlink_metadata()?;
        let file_type = metadata.file_type();

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, relative, std::io::empty())?;
        } else if file_type.is_symlink() {
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            let target = fs::read_link(entry.path())?;
            builder.append_link(&mut header, relative, &target)?;
        } else if file_type.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(file_mode(&metadata));
            header.set_size(metadata.len());
            builder.append_data(&mut header, relative, File::open(entry.path())?)?;
        } else {
            trace!("Skipping special file {}", entry.path().display());
        }
    }

    let tar = builder.into_inner()?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar)?;
    Ok(encoder.finish()?)
}

pub(super) fn unpack(blob: impl Read, dest: &Path) -> Result<(), CacheError> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(blob));
    archive.set_preserve_mtime(false);
    archive.unpack(dest)?;
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}
