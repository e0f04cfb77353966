#![forbid(unsafe_code)]

//! Execution engines for slipway builds.
//!
//! An engine owns a build host for the duration of one build: it brings the
//! host up, ships the staged workdir over, runs commands inside it, pulls the
//! produced artifacts back, and releases whatever it acquired. Five engines
//! exist, from heaviest to lightest:
//!
//! * `hardware` — a dedicated machine from the platform's build-host pool
//! * `cloud`    — a throwaway EC2 instance launched from a machine image
//! * `container`— a throwaway container from a container image
//! * `base`     — an already-running host reached over SSH, taken as-is
//! * `local`    — the invoking machine itself, building in place
//!
//! Which one runs is decided by [`select::select_kind`] from the platform
//! descriptor; [`select::instantiate`] then checks the chosen engine's
//! prerequisites and constructs it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod base;
pub mod cloud;
pub mod container;
pub mod error;
pub mod hardware;
pub mod local;
pub mod remote;
pub mod select;

pub use base::BaseBackend;
pub use cloud::CloudBackend;
pub use container::ContainerBackend;
pub use error::BackendError;
pub use hardware::HardwareBackend;
pub use local::LocalBackend;

/// The kind of execution engine carrying out a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Hardware,
    Cloud,
    Container,
    Base,
    Local,
}

impl BackendKind {
    /// Every kind, in selection-precedence order.
    pub const ALL: [Self; 5] = [
        Self::Hardware,
        Self::Cloud,
        Self::Container,
        Self::Base,
        Self::Local,
    ];

    /// Stable lowercase identifier, as written in configuration and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Cloud => "cloud",
            Self::Container => "container",
            Self::Base => "base",
            Self::Local => "local",
        }
    }

    /// Whether starting this engine acquires a resource that must be released
    /// again no matter how the build ends. Preservation flags keep workdirs
    /// around for debugging; they never keep an instance running or a machine
    /// reserved.
    #[must_use]
    pub fn provisions_resources(self) -> bool {
        matches!(self, Self::Hardware | Self::Cloud)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hardware" => Ok(Self::Hardware),
            "cloud" => Ok(Self::Cloud),
            "container" => Ok(Self::Container),
            "base" => Ok(Self::Base),
            "local" => Ok(Self::Local),
            other => Err(BackendError::UnknownKind {
                name: other.to_owned(),
            }),
        }
    }
}

/// Identity of the host that ran (or will run) a build, as recorded in build
/// reports and surfaced by `slipway info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHostInfo {
    /// Hostname, instance id, or container id of the build host.
    pub name: String,
    /// The engine kind that owns the host.
    pub engine: String,
}

impl fmt::Display for BuildHostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.engine)
    }
}

/// One build host, from acquisition to release.
///
/// The driver calls these in a fixed order: [`start`](Backend::start), then
/// [`ship_workdir`](Backend::ship_workdir), then one or more
/// [`dispatch`](Backend::dispatch) calls, then
/// [`retrieve_artifact`](Backend::retrieve_artifact), and finally
/// [`teardown`](Backend::teardown) on every exit path. Implementations must
/// tolerate `teardown` before `start` and release each acquired resource at
/// most once.
pub trait Backend {
    /// The engine kind of this instance.
    fn kind(&self) -> BackendKind;

    /// The kind's stable lowercase identifier.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// What this engine was pointed at: an address, a machine image, a
    /// container image, or `"local"`.
    fn target(&self) -> &str;

    /// Name of the concrete host executing the build, once known.
    fn build_host_name(&self) -> String;

    /// Scratch directory on the build host, once one exists.
    fn remote_workdir(&self) -> Option<&str>;

    /// Acquire the build host and create its scratch directory.
    ///
    /// # Errors
    ///
    /// Fails when the host cannot be provisioned or reached.
    fn start(&mut self, local_workdir: &Path) -> Result<(), BackendError>;

    /// Copy the staged workdir contents onto the build host.
    ///
    /// # Errors
    ///
    /// Fails when packing or transferring the payload fails.
    fn ship_workdir(&mut self, local_workdir: &Path) -> Result<(), BackendError>;

    /// Run a shell command inside the scratch directory on the build host.
    ///
    /// # Errors
    ///
    /// Fails when the command cannot be executed or exits non-zero.
    fn dispatch(&mut self, command: &str) -> Result<(), BackendError>;

    /// Bring the `dist/` tree produced by the build back to the local
    /// workdir, returning its local path.
    ///
    /// # Errors
    ///
    /// Fails when the transfer fails or the build produced no `dist/`.
    fn retrieve_artifact(&mut self) -> Result<PathBuf, BackendError>;

    /// Release everything [`start`](Backend::start) acquired. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails when a provisioned resource could not be released; callers
    /// should log and surface this rather than retry blindly.
    fn teardown(&mut self) -> Result<(), BackendError>;

    /// The build-host record for reports.
    fn host_info(&self) -> BuildHostInfo {
        BuildHostInfo {
            name: self.build_host_name(),
            engine: self.name().to_owned(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "warehouse".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, BackendError::UnknownKind { name } if name == "warehouse"));
    }

    #[test]
    fn empty_kind_is_rejected() {
        assert!("".parse::<BackendKind>().is_err());
    }

    #[test]
    fn kind_parsing_is_case_sensitive() {
        // Configuration keys are lowercase; anything else is a typo worth
        // surfacing rather than papering over.
        assert!("Local".parse::<BackendKind>().is_err());
        assert!("CLOUD".parse::<BackendKind>().is_err());
    }

    #[test]
    fn only_hardware_and_cloud_provision_resources() {
        assert!(BackendKind::Hardware.provisions_resources());
        assert!(BackendKind::Cloud.provisions_resources());
        assert!(!BackendKind::Container.provisions_resources());
        assert!(!BackendKind::Base.provisions_resources());
        assert!(!BackendKind::Local.provisions_resources());
    }

    #[test]
    fn host_info_display_names_host_and_engine() {
        let info = BuildHostInfo {
            name: "forge-03".to_owned(),
            engine: "hardware".to_owned(),
        };
        assert_eq!(info.to_string(), "forge-03 (hardware)");
    }
}
