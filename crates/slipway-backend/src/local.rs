//! The `local` engine: build in place on the invoking machine.
//!
//! Nothing is provisioned and nothing is copied. The staged workdir doubles
//! as the build host's workdir, and `dist/` is already local when the build
//! finishes.

use std::path::{Path, PathBuf};

use slipway_util::process::{run_command, shell_command};
use tracing::{debug, info};

use crate::error::BackendError;
use crate::{Backend, BackendKind};

#[derive(Debug, Default)]
pub struct LocalBackend {
    workdir: Option<PathBuf>,
}

impl LocalBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn target(&self) -> &str {
        "local"
    }

    fn build_host_name(&self) -> String {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
    }

    fn remote_workdir(&self) -> Option<&str> {
        self.workdir.as_deref().and_then(Path::to_str)
    }

    fn start(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        debug!(workdir = %local_workdir.display(), "building in place");
        self.workdir = Some(local_workdir.to_path_buf());
        Ok(())
    }

    fn ship_workdir(&mut self, _local_workdir: &Path) -> Result<(), BackendError> {
        // The workdir is already where the build runs.
        Ok(())
    }

    fn dispatch(&mut self, command: &str) -> Result<(), BackendError> {
        let Some(dir) = self.workdir.clone() else {
            return Err(BackendError::NotStarted);
        };
        info!(engine = "local", command, "dispatching");
        let mut cmd = shell_command(command);
        cmd.current_dir(&dir);
        let output = run_command(&mut cmd)?;
        if output.success {
            debug!(stdout = %output.stdout.trim_end(), "command finished");
            Ok(())
        } else {
            Err(BackendError::command_failed(
                &self.build_host_name(),
                command,
                output.exit_code,
                &output.stderr,
            ))
        }
    }

    fn retrieve_artifact(&mut self) -> Result<PathBuf, BackendError> {
        let Some(dir) = &self.workdir else {
            return Err(BackendError::NotStarted);
        };
        let dist = dir.join("dist");
        if dist.is_dir() {
            Ok(dist)
        } else {
            Err(BackendError::MissingArtifact {
                path: dist.display().to_string(),
            })
        }
    }

    fn teardown(&mut self) -> Result<(), BackendError> {
        // Nothing was acquired; the driver owns the workdir's lifetime.
        Ok(())
    }
}
