use serde::{Deserialize, Serialize};
use std::path::Path;

/// A platform descriptor: where and how a package gets built.
///
/// Loaded from a TOML file the operator points at with `--platform`. The
/// `[backend]` section's declarations drive engine selection; the `[install]`
/// section tells the driver how to put build dependencies on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub platform: PlatformInfo,
    #[serde(default)]
    pub install: Option<InstallSpec>,
    #[serde(default)]
    pub backend: BackendSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Display name, e.g. `debian-12-amd64`.
    pub name: String,
    /// Shell invocation that drives the remote build.
    #[serde(default = "default_build_command")]
    pub build_command: String,
}

fn default_build_command() -> String {
    "make".to_owned()
}

/// How build dependencies get installed on this platform.
///
/// Either an explicit command template (`command` plus optional `suffix`
/// appended after the package list) or a known package `manager` the driver
/// synthesizes the invocation for. When both are present the explicit
/// template wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstallSpec {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub manager: Option<PackageManager>,
}

/// Package managers the driver knows how to invoke directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Zypper,
    Pacman,
    Apk,
}

impl PackageManager {
    /// Synthesize a non-interactive install invocation for `packages`.
    pub fn install_invocation(self, packages: &[String]) -> String {
        let joined = packages.join(" ");
        match self {
            Self::Apt => format!("apt-get install -y {joined}"),
            Self::Dnf => format!("dnf install -y {joined}"),
            Self::Yum => format!("yum install -y {joined}"),
            Self::Zypper => format!("zypper --non-interactive install {joined}"),
            Self::Pacman => format!("pacman -S --noconfirm {joined}"),
            Self::Apk => format!("apk add {joined}"),
        }
    }
}

/// Backend declarations: which execution engines this platform can use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Dedicated build hosts (`user@host` or bare hostname), tried in order.
    #[serde(default)]
    pub build_hosts: Vec<String>,
    /// Cloud machine image to launch an ephemeral instance from.
    #[serde(default)]
    pub ami: Option<String>,
    /// Container image to run the build in.
    #[serde(default)]
    pub image: Option<String>,
    /// Remote login user for provisioned hosts.
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_user() -> String {
    "root".to_owned()
}

impl Default for BackendSpec {
    fn default() -> Self {
        Self {
            build_hosts: Vec::new(),
            ami: None,
            image: None,
            user: default_user(),
        }
    }
}

impl Platform {
    /// Read and parse a platform descriptor from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Self, PlatformError> {
        let content = std::fs::read_to_string(path).map_err(|e| PlatformError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let platform: Platform = toml::from_str(&content).map_err(|e| PlatformError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(platform)
    }

    pub fn name(&self) -> &str {
        &self.platform.name
    }

    pub fn build_command(&self) -> &str {
        &self.platform.build_command
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid platform descriptor at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}
