//! The `base` engine: an already-running host, taken as-is over SSH.
//!
//! Nothing is provisioned and nothing is released. The host's own tmp reaper
//! eventually collects the scratch directory; slipway does not touch a
//! machine it did not bring up.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::BackendError;
use crate::remote::RemoteHost;
use crate::{Backend, BackendKind};

#[derive(Debug)]
pub struct BaseBackend {
    host: RemoteHost,
    local_workdir: Option<PathBuf>,
}

impl BaseBackend {
    #[must_use]
    pub fn new(target: &str) -> Self {
        Self {
            host: RemoteHost::new(target),
            local_workdir: None,
        }
    }
}

impl Backend for BaseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Base
    }

    fn target(&self) -> &str {
        self.host.session().target()
    }

    fn build_host_name(&self) -> String {
        self.host.session().host().to_owned()
    }

    fn remote_workdir(&self) -> Option<&str> {
        self.host.remote_workdir()
    }

    fn start(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        self.local_workdir = Some(local_workdir.to_path_buf());
        self.host.start()?;
        info!(host = %self.target(), "using existing host");
        Ok(())
    }

    fn ship_workdir(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        self.host.ship(local_workdir)
    }

    fn dispatch(&mut self, command: &str) -> Result<(), BackendError> {
        info!(engine = "base", host = %self.target(), command, "dispatching");
        let output = self.host.dispatch(command)?;
        debug!(stdout = %output.stdout.trim_end(), "command finished");
        Ok(())
    }

    fn retrieve_artifact(&mut self) -> Result<PathBuf, BackendError> {
        let local = self.local_workdir.clone().ok_or(BackendError::NotStarted)?;
        self.host.retrieve(&local)
    }

    fn teardown(&mut self) -> Result<(), BackendError> {
        // Not ours to scrub.
        debug!(host = %self.target(), "leaving existing host untouched");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reports_the_target_host() {
        let backend = BaseBackend::new("deploy@buildhost");
        assert_eq!(backend.target(), "deploy@buildhost");
        assert_eq!(backend.build_host_name(), "buildhost");
        assert_eq!(backend.host_info().engine, "base");
    }

    #[test]
    fn teardown_never_reaches_for_the_network() {
        // The target does not resolve; teardown must still succeed because
        // a base host is never scrubbed.
        let mut backend = BaseBackend::new("root@does-not-resolve.invalid");
        backend.teardown().unwrap();
    }

    #[test]
    fn retrieve_before_start_is_an_error() {
        let mut backend = BaseBackend::new("root@buildhost");
        let err = backend.retrieve_artifact().unwrap_err();
        assert!(matches!(err, BackendError::NotStarted));
    }
}
