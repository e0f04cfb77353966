//! The `cloud` engine: a throwaway EC2 instance launched from a machine
//! image.
//!
//! Provisioning shells out to the `aws` CLI so credentials, regions, and
//! profiles resolve exactly as they do for the operator's own invocations.
//! The instance id is recorded the moment `run-instances` returns, before
//! the instance is reachable; whatever happens afterwards, teardown
//! terminates it. A preserved workdir never keeps an instance billing.

use std::path::{Path, PathBuf};
use std::process::Command;

use slipway_util::process::run_command;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::remote::{login_target, RemoteHost};
use crate::{Backend, BackendKind};

#[derive(Debug)]
pub struct CloudBackend {
    ami: String,
    user: String,
    instance_id: Option<String>,
    host: Option<RemoteHost>,
    local_workdir: Option<PathBuf>,
}

impl CloudBackend {
    #[must_use]
    pub fn new(ami: &str, user: &str) -> Self {
        Self {
            ami: ami.to_owned(),
            user: user.to_owned(),
            instance_id: None,
            host: None,
            local_workdir: None,
        }
    }

    fn launch_args(ami: &str) -> Vec<String> {
        vec![
            "ec2".to_owned(),
            "run-instances".to_owned(),
            "--image-id".to_owned(),
            ami.to_owned(),
            "--count".to_owned(),
            "1".to_owned(),
            "--query".to_owned(),
            "Instances[0].InstanceId".to_owned(),
            "--output".to_owned(),
            "text".to_owned(),
        ]
    }

    fn wait_args(instance_id: &str) -> Vec<String> {
        // status-ok rather than running: the boot checks passing is the
        // earliest point sshd is reliably up.
        vec![
            "ec2".to_owned(),
            "wait".to_owned(),
            "instance-status-ok".to_owned(),
            "--instance-ids".to_owned(),
            instance_id.to_owned(),
        ]
    }

    fn address_args(instance_id: &str) -> Vec<String> {
        vec![
            "ec2".to_owned(),
            "describe-instances".to_owned(),
            "--instance-ids".to_owned(),
            instance_id.to_owned(),
            "--query".to_owned(),
            "Reservations[0].Instances[0].PublicDnsName".to_owned(),
            "--output".to_owned(),
            "text".to_owned(),
        ]
    }

    fn terminate_args(instance_id: &str) -> Vec<String> {
        vec![
            "ec2".to_owned(),
            "terminate-instances".to_owned(),
            "--instance-ids".to_owned(),
            instance_id.to_owned(),
        ]
    }

    fn aws(&self, args: &[String]) -> Result<String, BackendError> {
        debug!(?args, "aws");
        let mut cmd = Command::new("aws");
        cmd.args(args);
        let output = run_command(&mut cmd)?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(BackendError::command_failed(
                &self.build_host_name(),
                &format!("aws {}", args.join(" ")),
                output.exit_code,
                &output.stderr,
            ))
        }
    }

    fn host_mut(&mut self) -> Result<&mut RemoteHost, BackendError> {
        self.host.as_mut().ok_or(BackendError::NotStarted)
    }
}

/// The aws CLI prints literal `None` for absent query fields.
fn text_query_value(stdout: &str) -> Option<&str> {
    let value = stdout.trim();
    if value.is_empty() || value == "None" {
        None
    } else {
        Some(value)
    }
}

impl Backend for CloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn target(&self) -> &str {
        match &self.host {
            Some(host) => host.session().target(),
            None => &self.ami,
        }
    }

    fn build_host_name(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| self.ami.clone())
    }

    fn remote_workdir(&self) -> Option<&str> {
        self.host.as_ref().and_then(RemoteHost::remote_workdir)
    }

    fn start(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        self.local_workdir = Some(local_workdir.to_path_buf());
        info!(ami = %self.ami, "launching instance");
        let launched = self.aws(&Self::launch_args(&self.ami))?;
        let Some(instance_id) = text_query_value(&launched).map(ToOwned::to_owned) else {
            return Err(BackendError::Provision {
                kind: "cloud",
                message: format!("run-instances from {} returned no instance id", self.ami),
            });
        };
        // Recorded before the instance is reachable so teardown can always
        // terminate it.
        self.instance_id = Some(instance_id.clone());
        info!(instance = %instance_id, "waiting for boot checks");
        self.aws(&Self::wait_args(&instance_id))?;
        let described = self.aws(&Self::address_args(&instance_id))?;
        let Some(address) = text_query_value(&described) else {
            return Err(BackendError::Provision {
                kind: "cloud",
                message: format!("instance {instance_id} has no public address"),
            });
        };
        let mut host = RemoteHost::new(&login_target(&self.user, address));
        host.start()?;
        info!(instance = %instance_id, address, "instance ready");
        self.host = Some(host);
        Ok(())
    }

    fn ship_workdir(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        self.host_mut()?.ship(local_workdir)
    }

    fn dispatch(&mut self, command: &str) -> Result<(), BackendError> {
        info!(engine = "cloud", instance = %self.build_host_name(), command, "dispatching");
        let output = self.host_mut()?.dispatch(command)?;
        debug!(stdout = %output.stdout.trim_end(), "command finished");
        Ok(())
    }

    fn retrieve_artifact(&mut self) -> Result<PathBuf, BackendError> {
        let local = self.local_workdir.clone().ok_or(BackendError::NotStarted)?;
        self.host_mut()?.retrieve(&local)
    }

    fn teardown(&mut self) -> Result<(), BackendError> {
        // The scratch dir dies with the instance; only termination matters.
        self.host = None;
        if let Some(instance_id) = self.instance_id.take() {
            info!(instance = %instance_id, "terminating instance");
            self.aws(&Self::terminate_args(&instance_id))?;
        }
        Ok(())
    }
}
