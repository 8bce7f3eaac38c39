// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The package pool.

Every file referenced by an index lives in the pool exactly once, at a path derived
from the component and source package name. */

use {
    crate::{
        error::{PublisherError, Result},
        model::PoolFile,
    },
    debian_packaging::repository::builder::PoolLayout,
    log::debug,
    sha2::Digest,
    std::{
        io::Read,
        path::{Path, PathBuf},
    },
};

/// Whether [PoolLayout] can derive a name prefix for `source`.
///
/// The prefix is sliced by byte offset: four bytes for `lib*` names, one otherwise.
fn has_pool_prefix(source: &str) -> bool {
    let needed = if source.starts_with("lib") { 4 } else { 1 };
    source.is_ascii() && source.len() >= needed
}

/// Path of a file in the pool, relative to the archive root.
pub fn pool_path(
    layout: PoolLayout,
    component: &str,
    source: &str,
    filename: &str,
) -> Result<String> {
    if !has_pool_prefix(source) {
        return Err(PublisherError::InvalidPackageName(source.to_string()));
    }

    Ok(layout.path(component, source, filename))
}

/// Directory holding the files of a source package, relative to the archive root.
pub fn pool_directory(layout: PoolLayout, component: &str, source: &str) -> Result<String> {
    Ok(pool_path(layout, component, source, "")?
        .trim_end_matches('/')
        .to_string())
}

/// What [copy_to_pool()] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolCopy {
    /// The file was already present with identical content.
    Current,
    Created,
}

/// Compute the hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut fh = std::fs::File::open(path).map_err(|e| PublisherError::io_path(path, e))?;
    let mut hasher = sha2::Sha256::new();
    let mut buffer = [0u8; 32768];

    loop {
        let count = fh
            .read(&mut buffer)
            .map_err(|e| PublisherError::io_path(path, e))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Copy a file into the pool of the archive at `root`.
///
/// The source content must match its recorded digest. An existing pool file with
/// different content is never overwritten.
pub fn copy_to_pool(
    layout: PoolLayout,
    root: &Path,
    component: &str,
    source: &str,
    file: &PoolFile,
) -> Result<(PathBuf, PoolCopy)> {
    let dest = root.join(pool_path(layout, component, source, &file.filename)?);

    if dest.exists() {
        return if sha256_file(&dest)? == file.sha256 {
            Ok((dest, PoolCopy::Current))
        } else {
            Err(PublisherError::PoolFileConflict(
                dest.display().to_string(),
            ))
        };
    }

    if sha256_file(&file.librarian_path)? != file.sha256 {
        return Err(PublisherError::PoolFileDigestMismatch(
            file.librarian_path.clone(),
        ));
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PublisherError::io_path(parent, e))?;
    }

    // Copy under a temporary name so a partial file never appears at the final path.
    let partial = dest.with_file_name(format!(".{}.partial", file.filename));
    std::fs::copy(&file.librarian_path, &partial)
        .map_err(|e| PublisherError::io_path(&partial, e))?;
    std::fs::rename(&partial, &dest).map_err(|e| PublisherError::io_path(&dest, e))?;

    debug!("wrote {} bytes to {}", file.size, dest.display());

    Ok((dest, PoolCopy::Created))
}
