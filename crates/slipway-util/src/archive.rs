//! Gzipped tarball creation and extraction.
//!
//! Work trees are shipped to build hosts as `.tar.gz` payloads and artifacts
//! come back the same way, so both directions live here. Extraction validates
//! every entry path to keep a malicious archive from writing outside its
//! destination.

use std::path::{Component, Path};

use crate::error::UtilError;

/// Pack the contents of `src_dir` into a gzipped tarball at `dest`.
///
/// Entries are stored relative to `src_dir`, so extracting the result into a
/// directory reproduces the tree at its top level.
///
/// # Errors
/// Returns an error if `src_dir` cannot be read or `dest` cannot be written.
pub fn pack_tar_gz(src_dir: &Path, dest: &Path) -> Result<(), UtilError> {
    let file = std::fs::File::create(dest).map_err(|source| UtilError::Io {
        path: dest.display().to_string(),
        source,
    })?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder
        .append_dir_all(".", src_dir)
        .map_err(|e| UtilError::Archive {
            path: dest.display().to_string(),
            message: e.to_string(),
        })?;

    let encoder = builder.into_inner().map_err(|e| UtilError::Archive {
        path: dest.display().to_string(),
        message: e.to_string(),
    })?;
    encoder.finish().map_err(|e| UtilError::Archive {
        path: dest.display().to_string(),
        message: e.to_string(),
    })?;

    Ok(())
}

/// Extract a `.tar.gz` tarball into `dest`.
///
/// Each entry's path is validated to ensure it stays within `dest`,
/// rejecting zip-slip (path traversal) attempts from hostile tarballs.
///
/// # Errors
/// Returns an error if the tarball cannot be read, an entry escapes the
/// destination, or any entry cannot be written.
pub fn unpack_tar_gz(tarball: &Path, dest: &Path) -> Result<(), UtilError> {
    std::fs::create_dir_all(dest).map_err(|source| UtilError::Io {
        path: dest.display().to_string(),
        source,
    })?;

    let canonical_dest = std::fs::canonicalize(dest).map_err(|source| UtilError::Io {
        path: dest.display().to_string(),
        source,
    })?;

    let file = std::fs::File::open(tarball).map_err(|source| UtilError::Io {
        path: tarball.display().to_string(),
        source,
    })?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive.entries().map_err(|e| UtilError::Archive {
        path: tarball.display().to_string(),
        message: e.to_string(),
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|e| UtilError::Archive {
            path: tarball.display().to_string(),
            message: e.to_string(),
        })?;

        let entry_path = entry.path().map_err(|e| UtilError::Archive {
            path: tarball.display().to_string(),
            message: e.to_string(),
        })?;

        // Reject any path component that attempts directory traversal.
        for component in entry_path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(UtilError::PathTraversal {
                    entry_path: entry_path.display().to_string(),
                    dest: canonical_dest.display().to_string(),
                });
            }
        }

        // Verify the resolved path stays within the destination.
        let target = canonical_dest.join(&*entry_path);
        if !target.starts_with(&canonical_dest) {
            return Err(UtilError::PathTraversal {
                entry_path: entry_path.display().to_string(),
                dest: canonical_dest.display().to_string(),
            });
        }

        // Ensure parent directories exist before unpacking the entry.
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| UtilError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        entry.unpack(&target).map_err(|e| UtilError::Archive {
            path: tarball.display().to_string(),
            message: e.to_string(),
        })?;
    }

    Ok(())
}
