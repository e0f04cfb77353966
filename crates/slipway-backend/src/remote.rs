//! SSH plumbing shared by every engine that builds on another machine.
//!
//! [`Session`] wraps a login target and knows how to spell `ssh` and `scp`
//! invocations against it; [`RemoteHost`] layers the scratch-directory
//! lifecycle on top: create it, ship the workdir into it, run the build in
//! it, pull `dist/` back out of it, and scrub it.

use std::path::{Path, PathBuf};
use std::process::Command;

use slipway_util::archive::{pack_tar_gz, unpack_tar_gz};
use slipway_util::error::UtilError;
use slipway_util::process::{run_command, CommandOutput};
use tracing::debug;

use crate::error::BackendError;

/// Options passed to every `ssh` and `scp` invocation. Batch mode keeps a
/// headless build from hanging on a password prompt.
const SSH_OPTIONS: [&str; 4] = [
    "-o",
    "BatchMode=yes",
    "-o",
    "StrictHostKeyChecking=accept-new",
];

/// Prefix a bare hostname with the platform login user. Targets that already
/// carry a user (`deploy@host`) are taken verbatim.
#[must_use]
pub fn login_target(user: &str, host: &str) -> String {
    if host.contains('@') {
        host.to_owned()
    } else {
        format!("{user}@{host}")
    }
}

/// An SSH login target (`user@host` or bare hostname).
#[derive(Debug, Clone)]
pub struct Session {
    target: String,
}

impl Session {
    #[must_use]
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_owned(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Hostname part of the target, without the login user.
    #[must_use]
    pub fn host(&self) -> &str {
        self.target.rsplit('@').next().unwrap_or(&self.target)
    }

    fn ssh_command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(SSH_OPTIONS);
        cmd.arg(&self.target);
        cmd.arg(remote_command);
        cmd
    }

    fn scp_push_command(&self, local: &Path, remote: &str) -> Command {
        let mut cmd = Command::new("scp");
        cmd.args(SSH_OPTIONS);
        cmd.arg("-q");
        cmd.arg(local);
        cmd.arg(format!("{}:{remote}", self.target));
        cmd
    }

    fn scp_pull_command(&self, remote: &str, local: &Path) -> Command {
        let mut cmd = Command::new("scp");
        cmd.args(SSH_OPTIONS);
        cmd.arg("-q");
        cmd.arg(format!("{}:{remote}", self.target));
        cmd.arg(local);
        cmd
    }

    /// Run a shell command on the remote host, failing on non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error when `ssh` cannot be spawned or the remote command
    /// exits non-zero.
    pub fn run(&self, remote_command: &str) -> Result<CommandOutput, BackendError> {
        debug!(host = %self.target, command = remote_command, "ssh");
        let output = run_command(&mut self.ssh_command(remote_command))?;
        if output.success {
            Ok(output)
        } else {
            Err(BackendError::command_failed(
                &self.target,
                remote_command,
                output.exit_code,
                &output.stderr,
            ))
        }
    }

    /// Copy a local file onto the remote host.
    ///
    /// # Errors
    ///
    /// Returns an error when `scp` cannot be spawned or exits non-zero.
    pub fn push(&self, local: &Path, remote: &str) -> Result<(), BackendError> {
        debug!(host = %self.target, file = %local.display(), dest = remote, "scp push");
        let output = run_command(&mut self.scp_push_command(local, remote))?;
        if output.success {
            Ok(())
        } else {
            Err(BackendError::command_failed(
                &self.target,
                &format!("scp {} -> {remote}", local.display()),
                output.exit_code,
                &output.stderr,
            ))
        }
    }

    /// Copy a remote file down to a local path.
    ///
    /// # Errors
    ///
    /// Returns an error when `scp` cannot be spawned or exits non-zero.
    pub fn pull(&self, remote: &str, local: &Path) -> Result<(), BackendError> {
        debug!(host = %self.target, file = remote, dest = %local.display(), "scp pull");
        let output = run_command(&mut self.scp_pull_command(remote, local))?;
        if output.success {
            Ok(())
        } else {
            Err(BackendError::command_failed(
                &self.target,
                &format!("scp {remote} -> {}", local.display()),
                output.exit_code,
                &output.stderr,
            ))
        }
    }
}

/// A remote build host with a scratch directory under `/tmp`.
#[derive(Debug)]
pub struct RemoteHost {
    session: Session,
    remote_workdir: Option<String>,
}

impl RemoteHost {
    #[must_use]
    pub fn new(target: &str) -> Self {
        Self {
            session: Session::new(target),
            remote_workdir: None,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn remote_workdir(&self) -> Option<&str> {
        self.remote_workdir.as_deref()
    }

    fn workdir(&self) -> Result<&str, BackendError> {
        self.remote_workdir.as_deref().ok_or(BackendError::NotStarted)
    }

    /// Create the scratch directory on the host.
    ///
    /// # Errors
    ///
    /// Fails when the host is unreachable or `mktemp` fails.
    pub fn start(&mut self) -> Result<(), BackendError> {
        let output = self.session.run("mktemp -d /tmp/slipway.XXXXXX")?;
        let dir = output.stdout.trim();
        if dir.is_empty() {
            return Err(BackendError::Provision {
                kind: "remote",
                message: format!("mktemp on {} returned no path", self.session.target()),
            });
        }
        debug!(host = %self.session.target(), workdir = dir, "scratch directory created");
        self.remote_workdir = Some(dir.to_owned());
        Ok(())
    }

    /// Pack the local workdir into a tarball, push it, and unpack it inside
    /// the scratch directory.
    ///
    /// # Errors
    ///
    /// Fails when packing, transfer, or remote extraction fails.
    pub fn ship(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        let remote_dir = self.workdir()?.to_owned();
        // Staged outside the workdir so the payload never contains itself.
        let payload = tempfile::Builder::new()
            .prefix("slipway-ship-")
            .suffix(".tar.gz")
            .tempfile()
            .map_err(|source| UtilError::Io {
                path: std::env::temp_dir().display().to_string(),
                source,
            })?;
        pack_tar_gz(local_workdir, payload.path())?;
        let remote_payload = format!("{remote_dir}/.payload.tar.gz");
        self.session.push(payload.path(), &remote_payload)?;
        self.session.run(&format!(
            "cd {remote_dir} && tar -xzf .payload.tar.gz && rm -f .payload.tar.gz"
        ))?;
        Ok(())
    }

    /// Run a command inside the scratch directory.
    ///
    /// # Errors
    ///
    /// Fails when the command cannot run or exits non-zero.
    pub fn dispatch(&mut self, command: &str) -> Result<CommandOutput, BackendError> {
        let dir = self.workdir()?.to_owned();
        self.session.run(&format!("cd {dir} && {command}"))
    }

    /// Pull the remote `dist/` tree down into the local workdir and return
    /// its local path.
    ///
    /// # Errors
    ///
    /// Fails when the build produced no `dist/` or the transfer fails.
    pub fn retrieve(&mut self, local_workdir: &Path) -> Result<PathBuf, BackendError> {
        let remote_dir = self.workdir()?.to_owned();
        self.session
            .run(&format!("cd {remote_dir} && tar -czf .dist.tar.gz dist"))?;
        let local_tarball = local_workdir.join(".dist.tar.gz");
        self.session
            .pull(&format!("{remote_dir}/.dist.tar.gz"), &local_tarball)?;
        unpack_tar_gz(&local_tarball, local_workdir)?;
        let _ = std::fs::remove_file(&local_tarball);
        let dist = local_workdir.join("dist");
        if dist.is_dir() {
            Ok(dist)
        } else {
            Err(BackendError::MissingArtifact {
                path: dist.display().to_string(),
            })
        }
    }

    /// Remove the scratch directory. The first call scrubs; later calls are
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Fails when the host is reachable but the removal command fails.
    pub fn scrub(&mut self) -> Result<(), BackendError> {
        if let Some(dir) = self.remote_workdir.take() {
            self.session.run(&format!("rm -rf {dir}"))?;
            debug!(host = %self.session.target(), workdir = %dir, "scratch directory scrubbed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn argv(cmd: &Command) -> Vec<String> {
        std::iter::once(cmd.get_program())
            .chain(cmd.get_args())
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn login_target_prefixes_bare_hosts() {
        assert_eq!(login_target("root", "forge-03"), "root@forge-03");
    }

    #[test]
    fn login_target_keeps_explicit_users() {
        assert_eq!(login_target("root", "deploy@forge-03"), "deploy@forge-03");
    }

    #[test]
    fn host_strips_the_login_user() {
        assert_eq!(Session::new("deploy@forge-03").host(), "forge-03");
        assert_eq!(Session::new("forge-03").host(), "forge-03");
    }

    #[test]
    fn ssh_command_is_batch_mode() {
        let session = Session::new("root@buildhost");
        let cmd = session.ssh_command("uname -a");
        assert_eq!(
            argv(&cmd),
            vec![
                "ssh",
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "root@buildhost",
                "uname -a",
            ]
        );
    }

    #[test]
    fn scp_push_targets_the_remote_path() {
        let session = Session::new("root@buildhost");
        let cmd = session.scp_push_command(Path::new("/tmp/payload.tar.gz"), "/tmp/x/payload");
        assert_eq!(
            argv(&cmd),
            vec![
                "scp",
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-q",
                "/tmp/payload.tar.gz",
                "root@buildhost:/tmp/x/payload",
            ]
        );
    }

    #[test]
    fn scp_pull_reverses_source_and_dest() {
        let session = Session::new("root@buildhost");
        let cmd = session.scp_pull_command("/tmp/x/dist.tar.gz", Path::new("/work/dist.tar.gz"));
        let args = argv(&cmd);
        assert_eq!(args.first().unwrap(), "scp");
        assert_eq!(args.get(args.len() - 2).unwrap(), "root@buildhost:/tmp/x/dist.tar.gz");
        assert_eq!(args.last().unwrap(), "/work/dist.tar.gz");
    }

    #[test]
    fn dispatch_without_start_is_an_error() {
        let mut host = RemoteHost::new("root@buildhost");
        let err = host.dispatch("make").unwrap_err();
        assert!(matches!(err, BackendError::NotStarted));
    }

    #[test]
    fn scrub_before_start_is_a_no_op() {
        let mut host = RemoteHost::new("root@unreachable.invalid");
        // No scratch dir was ever created, so nothing runs and nothing fails.
        host.scrub().unwrap();
    }
}
