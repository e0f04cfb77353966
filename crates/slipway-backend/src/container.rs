//! The `container` engine: a throwaway container from a container image.
//!
//! The container is launched idling (`sleep infinity`) and every build step
//! is a `docker exec` into it. Teardown force-removes the container; the
//! image itself is left in the local daemon's cache.

use std::path::{Path, PathBuf};
use std::process::Command;

use slipway_util::process::run_command;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::{Backend, BackendKind};

#[derive(Debug)]
pub struct ContainerBackend {
    image: String,
    container_id: Option<String>,
    remote_workdir: Option<String>,
    local_workdir: Option<PathBuf>,
}

impl ContainerBackend {
    #[must_use]
    pub fn new(image: &str) -> Self {
        Self {
            image: image.to_owned(),
            container_id: None,
            remote_workdir: None,
            local_workdir: None,
        }
    }

    fn launch_args(image: &str) -> Vec<String> {
        vec![
            "run".to_owned(),
            "-d".to_owned(),
            image.to_owned(),
            "sleep".to_owned(),
            "infinity".to_owned(),
        ]
    }

    fn exec_args(container_id: &str, script: &str) -> Vec<String> {
        vec![
            "exec".to_owned(),
            container_id.to_owned(),
            "sh".to_owned(),
            "-c".to_owned(),
            script.to_owned(),
        ]
    }

    fn copy_in_args(local_workdir: &Path, container_id: &str, remote_dir: &str) -> Vec<String> {
        // `src/.` copies the directory's contents rather than the directory.
        vec![
            "cp".to_owned(),
            format!("{}/.", local_workdir.display()),
            format!("{container_id}:{remote_dir}"),
        ]
    }

    fn copy_out_args(container_id: &str, remote_dir: &str, local_workdir: &Path) -> Vec<String> {
        vec![
            "cp".to_owned(),
            format!("{container_id}:{remote_dir}/dist"),
            local_workdir.display().to_string(),
        ]
    }

    fn remove_args(container_id: &str) -> Vec<String> {
        vec!["rm".to_owned(), "-f".to_owned(), container_id.to_owned()]
    }

    fn docker(&self, args: &[String]) -> Result<String, BackendError> {
        debug!(?args, "docker");
        let mut cmd = Command::new("docker");
        cmd.args(args);
        let output = run_command(&mut cmd)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BackendError::command_failed(
                &self.build_host_name(),
                &format!("docker {}", args.join(" ")),
                output.exit_code,
                &output.stderr,
            ))
        }
    }

    fn container_id(&self) -> Result<&str, BackendError> {
        self.container_id.as_deref().ok_or(BackendError::NotStarted)
    }
}

impl Backend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn target(&self) -> &str {
        &self.image
    }

    fn build_host_name(&self) -> String {
        match &self.container_id {
            // Short form, as the docker CLI prints it.
            Some(id) => id.get(..12).unwrap_or(id).to_owned(),
            None => self.image.clone(),
        }
    }

    fn remote_workdir(&self) -> Option<&str> {
        self.remote_workdir.as_deref()
    }

    fn start(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        self.local_workdir = Some(local_workdir.to_path_buf());
        let launched = self.docker(&Self::launch_args(&self.image))?;
        let id = launched.trim();
        if id.is_empty() {
            return Err(BackendError::Provision {
                kind: "container",
                message: format!("docker run from {} returned no container id", self.image),
            });
        }
        self.container_id = Some(id.to_owned());
        let created = self.docker(&Self::exec_args(id, "mktemp -d /tmp/slipway.XXXXXX"))?;
        let dir = created.trim();
        if dir.is_empty() {
            return Err(BackendError::Provision {
                kind: "container",
                message: "mktemp inside the container returned no path".to_owned(),
            });
        }
        self.remote_workdir = Some(dir.to_owned());
        info!(container = %self.build_host_name(), image = %self.image, "container started");
        Ok(())
    }

    fn ship_workdir(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        let id = self.container_id()?.to_owned();
        let dir = self.remote_workdir.clone().ok_or(BackendError::NotStarted)?;
        self.docker(&Self::copy_in_args(local_workdir, &id, &dir))?;
        Ok(())
    }

    fn dispatch(&mut self, command: &str) -> Result<(), BackendError> {
        let id = self.container_id()?.to_owned();
        let dir = self.remote_workdir.clone().ok_or(BackendError::NotStarted)?;
        info!(engine = "container", container = %self.build_host_name(), command, "dispatching");
        let stdout = self.docker(&Self::exec_args(&id, &format!("cd {dir} && {command}")))?;
        debug!(stdout = %stdout.trim_end(), "command finished");
        Ok(())
    }

    fn retrieve_artifact(&mut self) -> Result<PathBuf, BackendError> {
        let id = self.container_id()?.to_owned();
        let dir = self.remote_workdir.clone().ok_or(BackendError::NotStarted)?;
        let local = self.local_workdir.clone().ok_or(BackendError::NotStarted)?;
        self.docker(&Self::copy_out_args(&id, &dir, &local))?;
        let dist = local.join("dist");
        if dist.is_dir() {
            Ok(dist)
        } else {
            Err(BackendError::MissingArtifact {
                path: dist.display().to_string(),
            })
        }
    }

    fn teardown(&mut self) -> Result<(), BackendError> {
        if let Some(id) = self.container_id.take() {
            info!(container = %id.get(..12).unwrap_or(&id), "removing container");
            self.docker(&Self::remove_args(&id))?;
            self.remote_workdir = None;
        }
        Ok(())
    }
}
