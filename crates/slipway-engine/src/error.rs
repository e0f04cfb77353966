//! Error types for slipway-engine.

/// Errors produced by the build driver and its helpers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A filesystem operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] slipway_util::error::UtilError),

    /// A project operation failed.
    #[error("{0}")]
    Project(#[from] slipway_config::project::ProjectError),

    /// An execution engine operation failed.
    #[error("{0}")]
    Backend(#[from] slipway_backend::BackendError),

    /// A retry override is not a usable number.
    #[error("invalid retry setting {setting}={value}: {reason}")]
    InvalidRetrySetting {
        setting: String,
        value: String,
        reason: &'static str,
    },

    /// Every attempt in the budget failed.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        source: Box<EngineError>,
    },

    /// The cumulative wall-clock budget ran out before success.
    #[error("{operation} exceeded its {timeout_secs}s budget after {elapsed_secs}s: {source}")]
    RetryDeadline {
        operation: &'static str,
        elapsed_secs: u64,
        timeout_secs: u64,
        source: Box<EngineError>,
    },

    /// A project already exists at the target path.
    #[error("slipway.toml already exists at {path} — cannot initialize over an existing project")]
    ProjectExists { path: String },

    /// The operator interrupted the run.
    #[error("build cancelled")]
    Cancelled,

    /// The platform declares no way to install build dependencies.
    #[error("platform {platform} has no install command and no package manager")]
    NoInstallStrategy { platform: String },

    /// Artifact metadata serialization failed.
    #[error("cannot serialize build metadata: {source}")]
    Metadata { source: toml::ser::Error },
}
