use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the project manifest file.
pub const FILE_NAME: &str = "slipway.toml";

/// The `slipway.toml` project descriptor.
///
/// Identity, components, source location, and per-project settings. The
/// driver treats it as the owner of everything project-shaped: staging
/// sources and generating the build files that ship to the backend are
/// methods here, not driver logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project: ProjectInfo,
    #[serde(default)]
    pub source: Option<SourceSpec>,
    #[serde(default, rename = "component")]
    pub components: Vec<Component>,
    #[serde(default)]
    pub retry: RetrySpec,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Directory containing `slipway.toml`; set by `from_path`.
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    /// Required for builds; validated by the driver, not the parser, so an
    /// incomplete manifest can still be loaded and inspected.
    #[serde(default)]
    pub version: String,
}

/// Where the project's sources come from.
///
/// Either a directory relative to the project root (`path`, default `src`)
/// or a `.tar.gz` fetched from `url`, optionally pinned with `sha256`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// One buildable component of the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    /// Packages (or sibling component names) this component needs at build time.
    #[serde(default)]
    pub build_requires: Vec<String>,
}

/// Per-project retry overrides for the retried pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetrySpec {
    /// Total attempt budget (first try included).
    #[serde(default)]
    pub attempts: Option<u32>,
    /// Cumulative wall-clock budget in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// The `manifest.toml` shipped alongside the staged sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub components: Vec<String>,
    pub source_sha256: String,
    pub generated_epoch: u64,
}

impl Project {
    /// Read and parse a `slipway.toml` from the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub fn from_path(path: &Path) -> Result<Self, ProjectError> {
        let content = std::fs::read_to_string(path).map_err(|e| ProjectError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut project: Project = toml::from_str(&content).map_err(|e| ProjectError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        project.root = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(project)
    }

    pub fn name(&self) -> &str {
        &self.project.name
    }

    pub fn version(&self) -> &str {
        &self.project.version
    }

    /// Check the invariants a build relies on.
    ///
    /// Name, version, and component names all end up in Makefiles and shell
    /// invocations, so anything outside `[A-Za-z0-9._-]` is rejected here
    /// rather than escaped everywhere downstream. Build requirements are
    /// spliced into the host's install command and get the same treatment,
    /// with `+` also allowed so package names like `g++` pass.
    ///
    /// # Errors
    /// Returns an error for a missing version or an unsafe name.
    pub fn validate(&self) -> Result<(), ProjectError> {
        if self.version().trim().is_empty() {
            return Err(ProjectError::MissingVersion {
                name: self.name().to_owned(),
            });
        }
        if !is_safe_name(self.name()) {
            return Err(ProjectError::UnsafeName {
                name: self.name().to_owned(),
            });
        }
        if !is_safe_name(self.version()) {
            return Err(ProjectError::UnsafeVersion {
                version: self.version().to_owned(),
            });
        }
        for component in &self.components {
            if !is_safe_name(&component.name) {
                return Err(ProjectError::UnsafeComponent {
                    name: component.name.clone(),
                });
            }
            for requirement in &component.build_requires {
                if !is_safe_package(requirement) {
                    return Err(ProjectError::UnsafeDependency {
                        requirement: requirement.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a boolean setting (`"true"` or `"1"` count as set).
    pub fn flag(&self, key: &str) -> bool {
        self.settings
            .get(key)
            .is_some_and(|v| v == "true" || v == "1")
    }

    /// Set a per-run setting, overwriting any manifest-declared value.
    pub fn set_setting(&mut self, key: &str, value: &str) {
        self.settings.insert(key.to_owned(), value.to_owned());
    }

    /// Stage the project's sources into `<workdir>/src`.
    ///
    /// A `url` source is downloaded (digest-verified when pinned) and
    /// unpacked; a single-root tarball is flattened so the sources land at
    /// `src/` directly. A `path` source (default `src`) is copied from the
    /// project root.
    ///
    /// # Errors
    /// Returns an error if the source is missing, the download or digest
    /// check fails, or staging cannot write into the workdir.
    pub fn fetch_sources(&self, workdir: &Path) -> Result<(), ProjectError> {
        if let Some(url) = self.source.as_ref().and_then(|s| s.url.as_deref()) {
            debug!(url, "fetching project sources");
            let label = format!("{} {}", self.name(), self.version());
            let tarball = workdir.join("source.tar.gz");
            let pinned = self.source.as_ref().and_then(|s| s.sha256.as_deref());
            match pinned {
                Some(expected) => {
                    slipway_util::download::download_verified(url, &tarball, &label, expected)?;
                }
                None => {
                    slipway_util::download::download_with_progress(url, &tarball, &label)?;
                }
            }
            unpack_source_tarball(&tarball, workdir)?;
            let _ = std::fs::remove_file(&tarball);
            return Ok(());
        }

        let relative = self
            .source
            .as_ref()
            .and_then(|s| s.path.as_deref())
            .unwrap_or("src");
        let source_dir = self.root.join(relative);
        if !source_dir.is_dir() {
            return Err(ProjectError::SourceMissing {
                path: source_dir.display().to_string(),
            });
        }
        debug!(path = %source_dir.display(), "copying project sources");
        slipway_util::fs::copy_tree(&source_dir, &workdir.join("src"))?;
        Ok(())
    }

    /// Write the top-level `Makefile` the backend runs.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn generate_build_files(&self, workdir: &Path) -> Result<(), ProjectError> {
        let makefile = self.render_makefile();
        write_file(&workdir.join("Makefile"), &makefile)?;
        debug!("generated Makefile");
        Ok(())
    }

    /// Render the shipped `Makefile`'s contents.
    ///
    /// `package` tars the `build/` tree into `dist/<name>_<version>.tar.gz`
    /// and depends on the aggregate project target plus `check` (dropped when
    /// the `skip_checks` setting is on). Each component delegates to the
    /// staged source tree's own Makefile; the `verbose` setting threads
    /// `V=1` through to those sub-makes.
    pub fn render_makefile(&self) -> String {
        let name = self.name();
        let version = self.version();
        let chatter = if self.flag("verbose") { " V=1" } else { "" };
        let mut out = String::new();
        out.push_str("# Generated by slipway. Regenerated on every run; do not edit.\n\n");

        if self.flag("skip_checks") {
            out.push_str(&format!("package: {name}\n"));
        } else {
            out.push_str(&format!("package: {name} check\n"));
        }
        out.push_str("\tmkdir -p dist\n");
        out.push_str(&format!(
            "\ttar -czf dist/{name}_{version}.tar.gz -C build .\n\n"
        ));

        let component_names: Vec<&str> =
            self.components.iter().map(|c| c.name.as_str()).collect();
        if component_names.is_empty() {
            out.push_str(&format!("{name}:\n"));
            out.push_str("\tmkdir -p build\n");
            out.push_str(&format!(
                "\t$(MAKE) -C src DESTDIR=$(abspath build){chatter}\n\n"
            ));
        } else {
            out.push_str(&format!("{name}: {}\n\n", component_names.join(" ")));
            for component in &component_names {
                out.push_str(&format!("{component}:\n"));
                out.push_str("\tmkdir -p build\n");
                out.push_str(&format!(
                    "\t$(MAKE) -C src {component} DESTDIR=$(abspath build){chatter}\n\n"
                ));
            }
        }

        out.push_str("check:\n");
        out.push_str(&format!("\t$(MAKE) -C src check{chatter}\n\n"));

        out.push_str(&format!(".PHONY: package check {name}"));
        for component in &component_names {
            out.push(' ');
            out.push_str(component);
        }
        out.push('\n');
        out
    }

    /// Write `manifest.toml`: identity, component list, and a fingerprint of
    /// the staged sources.
    ///
    /// Must run after `fetch_sources` so the fingerprint covers what actually
    /// ships.
    ///
    /// # Errors
    /// Returns an error if the staged sources cannot be hashed or the file
    /// cannot be written.
    pub fn generate_manifest(&self, workdir: &Path) -> Result<(), ProjectError> {
        let source_sha256 = slipway_util::hash::sha256_tree(&workdir.join("src"), "**/*")?;
        let manifest = BuildManifest {
            name: self.name().to_owned(),
            version: self.version().to_owned(),
            components: self.components.iter().map(|c| c.name.clone()).collect(),
            source_sha256,
            generated_epoch: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_secs()),
        };
        let content = toml::to_string_pretty(&manifest).map_err(|e| ProjectError::Serialize {
            what: "manifest.toml".to_owned(),
            source: e,
        })?;
        write_file(&workdir.join("manifest.toml"), &content)?;
        debug!("generated manifest.toml");
        Ok(())
    }

    /// Write the metadata files the remote packaging recipe consumes.
    ///
    /// # Errors
    /// Returns an error if the files cannot be written.
    pub fn generate_packaging_inputs(&self, workdir: &Path) -> Result<(), ProjectError> {
        let control = self.render_control();
        write_file(&workdir.join("pkg").join("control"), &control)?;
        debug!("generated pkg/control");
        Ok(())
    }

    /// Render the `pkg/control` contents.
    pub fn render_control(&self) -> String {
        let components = self
            .components
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Package: {}\nVersion: {}\nComponents: {}\n",
            self.name(),
            self.version(),
            components
        )
    }
}

fn is_safe_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// The `is_safe_name` set plus `+`, which real package names (`g++`,
/// `libstdc++6`) need.
fn is_safe_package(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
}

/// Unpack a source tarball into `<workdir>/src`, flattening a single root
/// directory (the usual release-tarball layout) if there is one.
fn unpack_source_tarball(tarball: &Path, workdir: &Path) -> Result<(), ProjectError> {
    let staging = workdir.join(".src-unpack");
    slipway_util::archive::unpack_tar_gz(tarball, &staging)?;

    let dest = workdir.join("src");
    slipway_util::fs::remove_dir_all_if_exists(&dest)?;

    let from = single_root_dir(&staging)?.unwrap_or_else(|| staging.clone());
    std::fs::rename(&from, &dest).map_err(|source| ProjectError::Write {
        path: dest.display().to_string(),
        source,
    })?;
    if from != staging {
        let _ = std::fs::remove_dir_all(&staging);
    }
    Ok(())
}

/// If `dir` holds exactly one entry and it is a directory, return it.
fn single_root_dir(dir: &Path) -> Result<Option<PathBuf>, ProjectError> {
    let reader = std::fs::read_dir(dir).map_err(|source| ProjectError::Read {
        path: dir.display().to_string(),
        source,
    })?;
    let mut entries = Vec::new();
    for entry in reader {
        let entry = entry.map_err(|source| ProjectError::Read {
            path: dir.display().to_string(),
            source,
        })?;
        entries.push(entry.path());
    }
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(Some(only.clone())),
        _ => Ok(None),
    }
}

/// Atomic write (write-to-temp-then-rename) so a crashed run never leaves a
/// half-written file in the workdir.
fn write_file(path: &Path, content: &str) -> Result<(), ProjectError> {
    if let Some(parent) = path.parent() {
        slipway_util::fs::ensure_dir(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, content).map_err(|source| ProjectError::Write {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| ProjectError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid slipway.toml at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("project `{name}` has no version — set [project] version before building")]
    MissingVersion { name: String },
    #[error("invalid project name \"{name}\": only alphanumeric characters, dots, hyphens, and underscores are allowed")]
    UnsafeName { name: String },
    #[error("invalid version \"{version}\": only alphanumeric characters, dots, hyphens, and underscores are allowed")]
    UnsafeVersion { version: String },
    #[error("invalid component name \"{name}\": only alphanumeric characters, dots, hyphens, and underscores are allowed")]
    UnsafeComponent { name: String },
    #[error("invalid build requirement \"{requirement}\": only alphanumeric characters, dots, hyphens, underscores, and plus signs are allowed")]
    UnsafeDependency { requirement: String },
    #[error("source directory {path} does not exist")]
    SourceMissing { path: String },
    #[error("cannot stage project files: {source}")]
    Stage {
        #[from]
        source: slipway_util::error::UtilError,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot serialize {what}: {source}")]
    Serialize {
        what: String,
        source: toml::ser::Error,
    },
}
