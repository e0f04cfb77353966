//! Error types for slipway-util.

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A glob pattern was invalid.
    #[error("invalid glob pattern `{pattern}`: {message}")]
    GlobPattern { pattern: String, message: String },

    /// A command failed to execute.
    #[error("cannot execute `{command}`: {source}")]
    CommandExec {
        command: String,
        source: std::io::Error,
    },

    /// A download failed.
    #[error("download failed: {message}")]
    Download { message: String },

    /// Downloaded content does not match the expected digest.
    #[error("digest mismatch for {path} — expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A tarball could not be created or read.
    #[error("archive error for {path}: {message}")]
    Archive { path: String, message: String },

    /// A tarball entry attempted to escape the extraction directory.
    #[error("path traversal rejected: entry `{entry_path}` escapes {dest}")]
    PathTraversal { entry_path: String, dest: String },
}
