//! Workdir lifecycle: the local staging directory for one build.
//!
//! `run` always stages in an ephemeral directory that vanishes with the
//! build unless the operator asks to preserve it. `prepare` may instead be
//! pointed at a caller-owned directory, which slipway creates if absent and
//! never deletes.

use std::path::{Path, PathBuf};

use slipway_util::error::UtilError;
use slipway_util::fs::ensure_dir;
use tempfile::TempDir;
use tracing::debug;

use crate::error::EngineError;

/// A build's local staging directory.
#[derive(Debug)]
pub enum Workdir {
    /// Created by slipway, deleted on drop unless preserved.
    Ephemeral(TempDir),
    /// Supplied by the caller; never deleted.
    Pinned(PathBuf),
}

impl Workdir {
    /// Create a fresh ephemeral workdir under the system temp directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created.
    pub fn ephemeral() -> Result<Self, EngineError> {
        let dir = tempfile::Builder::new()
            .prefix("slipway-")
            .tempdir()
            .map_err(|source| UtilError::Io {
                path: std::env::temp_dir().display().to_string(),
                source,
            })?;
        debug!(workdir = %dir.path().display(), "created ephemeral workdir");
        Ok(Self::Ephemeral(dir))
    }

    /// Use a caller-owned directory, creating it if absent.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created.
    pub fn pinned(path: &Path) -> Result<Self, EngineError> {
        ensure_dir(path)?;
        Ok(Self::Pinned(path.to_path_buf()))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Ephemeral(dir) => dir.path(),
            Self::Pinned(path) => path,
        }
    }

    /// Whether dropping this workdir would delete it.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral(_))
    }

    /// Keep the directory on disk and return its path.
    #[must_use]
    pub fn preserve(self) -> PathBuf {
        match self {
            Self::Ephemeral(dir) => dir.keep(),
            Self::Pinned(path) => path,
        }
    }

    /// Delete an ephemeral workdir now, surfacing any cleanup failure. A
    /// pinned workdir is left alone.
    ///
    /// # Errors
    ///
    /// Fails when the ephemeral directory cannot be removed.
    pub fn close(self) -> Result<(), EngineError> {
        match self {
            Self::Ephemeral(dir) => {
                let path = dir.path().display().to_string();
                dir.close().map_err(|source| EngineError::Io { path, source })
            }
            Self::Pinned(_) => Ok(()),
        }
    }
}
