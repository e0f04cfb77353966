//! The `hardware` engine: a dedicated machine from the platform's
//! build-host pool.
//!
//! The machine stays up after the build, so the acquired resource here is
//! the scratch directory itself. Teardown scrubs it unconditionally: pool
//! machines are shared, and a preserved workdir on somebody else's build
//! host is a mess, not a debugging aid.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::BackendError;
use crate::remote::RemoteHost;
use crate::{Backend, BackendKind};

#[derive(Debug)]
pub struct HardwareBackend {
    host: RemoteHost,
    local_workdir: Option<PathBuf>,
}

impl HardwareBackend {
    #[must_use]
    pub fn new(target: &str) -> Self {
        Self {
            host: RemoteHost::new(target),
            local_workdir: None,
        }
    }
}

impl Backend for HardwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hardware
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
        info!(host = %self.target(), "build host reserved");
        Ok(())
    }

    fn ship_workdir(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
        self.host.ship(local_workdir)
    }

    fn dispatch(&mut self, command: &str) -> Result<(), BackendError> {
        info!(engine = "hardware", host = %self.target(), command, "dispatching");
        let output = self.host.dispatch(command)?;
        debug!(stdout = %output.stdout.trim_end(), "command finished");
        Ok(())
    }

    fn retrieve_artifact(&mut self) -> Result<PathBuf, BackendError> {
        let local = self.local_workdir.clone().ok_or(BackendError::NotStarted)?;
        self.host.retrieve(&local)
    }

    fn teardown(&mut self) -> Result<(), BackendError> {
        if self.host.remote_workdir().is_some() {
            info!(host = %self.target(), "scrubbing build host");
        }
        self.host.scrub()
    }
}
