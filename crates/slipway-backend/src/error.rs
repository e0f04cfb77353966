//! Error type shared by all execution engines.

use slipway_util::error::UtilError;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown engine `{name}` (expected hardware, cloud, container, base, or local)")]
    UnknownKind { name: String },

    #[error("the {kind} engine requires {requirement}")]
    MissingRequirement {
        kind: &'static str,
        requirement: &'static str,
    },

    #[error("engine has not been started yet")]
    NotStarted,

    #[error("command `{command}` failed on {host} (exit {code}):\n{stderr}")]
    CommandFailed {
        host: String,
        command: String,
        code: String,
        stderr: String,
    },

    #[error("could not provision {kind} build host: {message}")]
    Provision {
        kind: &'static str,
        message: String,
    },

    #[error("failed to stage build payload: {source}")]
    Stage {
        #[from]
        source: UtilError,
    },

    #[error("build produced no artifact directory at {path}")]
    MissingArtifact { path: String },
}

impl BackendError {
    /// Build a `CommandFailed` from a finished command, keeping only the tail
    /// of stderr so log lines stay readable.
    pub(crate) fn command_failed(
        host: &str,
        command: &str,
        exit_code: Option<i32>,
        stderr: &str,
    ) -> Self {
        Self::CommandFailed {
            host: host.to_owned(),
            command: command.to_owned(),
            code: exit_code.map_or_else(|| "signal".to_owned(), |c| c.to_string()),
            stderr: excerpt(stderr),
        }
    }
}

/// Last lines of a captured stream, enough to diagnose a failure without
/// flooding the terminal with a full build log.
pub(crate) fn excerpt(stream: &str) -> String {
    const MAX_LINES: usize = 15;
    let lines: Vec<&str> = stream.trim_end().lines().collect();
    if lines.len() <= MAX_LINES {
        return lines.join("\n");
    }
    let omitted = lines.len() - MAX_LINES;
    let tail = lines.get(omitted..).unwrap_or_default().join("\n");
    format!("... ({omitted} earlier lines omitted)\n{tail}")
}
