//! The build driver: orchestrate one engine through staging, build, and
//! artifact retrieval.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use slipway_backend::select::{instantiate, select_kind};
use slipway_backend::{Backend, BackendKind, BuildHostInfo};
use slipway_config::{Platform, Project};
use slipway_util::fs::{collect_files, ensure_dir, materialize};
use slipway_util::hash::sha256_file;
use tracing::{debug, error, info};

use crate::deps::{build_dependencies, install_command};
use crate::error::EngineError;
use crate::retry::{retry_with_timeout, RetryContext};
use crate::workdir::Workdir;

/// Options controlling a driver invocation.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Explicit build-host address, overriding the platform's pool.
    pub target: Option<String>,
    /// Engine used when the platform descriptor names none.
    pub default_engine: BackendKind,
    /// Keep the workdir (and an idle non-provisioning engine) afterwards.
    pub preserve: bool,
    /// Pass verbosity through to the generated build files.
    pub verbose: bool,
    /// Skip the project's check target during packaging.
    pub skip_checks: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            target: None,
            default_engine: BackendKind::Local,
            preserve: false,
            verbose: false,
            skip_checks: false,
        }
    }
}

/// One file brought home from the build, with its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub sha256: String,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct BuildReport {
    /// Every file materialized into the project's `dist/`.
    pub artifacts: Vec<ArtifactRecord>,
    /// The host that executed the build.
    pub host: BuildHostInfo,
    /// Wall-clock time for the whole run, teardown included.
    pub duration: Duration,
}

/// Sidecar metadata written next to the retrieved artifacts.
#[derive(Serialize)]
struct DistMetadata<'a> {
    project: &'a str,
    version: &'a str,
    host: &'a BuildHostInfo,
    #[serde(rename = "artifact")]
    artifacts: &'a [ArtifactRecord],
}

/// Drives one build (or prepare) through a single execution engine.
///
/// Construction selects and instantiates the engine; `run` and `prepare`
/// walk it through its lifecycle. One driver, one engine, one workdir — the
/// driver is not reusable across builds.
pub struct BuildDriver {
    platform: Platform,
    project: Project,
    options: DriverOptions,
    backend: Box<dyn Backend>,
    kind: BackendKind,
    cancel: Arc<AtomicBool>,
}

impl BuildDriver {
    /// Select and construct the engine for this platform and project.
    ///
    /// The driver's verbosity and check-skipping flags are injected into
    /// the project settings here so generated build files see them.
    ///
    /// # Errors
    ///
    /// Fails when the selected engine's prerequisites are not met.
    pub fn new(
        platform: Platform,
        mut project: Project,
        options: DriverOptions,
    ) -> Result<Self, EngineError> {
        if options.verbose {
            project.set_setting("verbose", "true");
        }
        if options.skip_checks {
            project.set_setting("skip_checks", "true");
        }
        let kind = select_kind(&platform, options.target.as_deref(), options.default_engine);
        debug!(engine = %kind, "selected engine");
        let backend = instantiate(kind, &platform, options.target.as_deref())?;
        Ok(Self {
            platform,
            project,
            options,
            backend,
            kind,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The engine kind this driver will use.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// The `{name, engine}` record for the selected build host.
    #[must_use]
    pub fn build_host_info(&self) -> BuildHostInfo {
        self.backend.host_info()
    }

    /// Shared cancellation flag; setting it stops the run at the next
    /// state or retry boundary.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Release the engine's resources. Only needed by `prepare` callers;
    /// `run` tears down on its own.
    ///
    /// # Errors
    ///
    /// Propagates the engine's teardown failure.
    pub fn teardown(&mut self) -> Result<(), EngineError> {
        Ok(self.backend.teardown()?)
    }

    /// Run the full pipeline.
    ///
    /// Steps:
    /// 1. Validate the project and resolve the retry policy — nothing is
    ///    provisioned if either fails
    /// 2. Create the ephemeral workdir and start the engine
    /// 3. Install build dependencies on the host (retried)
    /// 4. Stage sources, build files, manifest, and packaging inputs
    /// 5. Ship the workdir to the host
    /// 6. Dispatch the build command (retried)
    /// 7. Retrieve `dist/` and materialize it into the project's `dist/`
    /// 8. Conclude: teardown and workdir cleanup on every exit path
    ///
    /// # Errors
    ///
    /// Returns the first state's failure, after teardown has had its turn.
    pub fn run(&mut self) -> Result<BuildReport, EngineError> {
        let started = Instant::now();

        // 1. Validate before any resource exists.
        self.project.validate()?;
        let retry = RetryContext::resolve(&self.project)?;

        // 2. From here on, conclude() owns every exit path.
        let workdir = Workdir::ephemeral()?;
        info!(
            project = %self.project.name(),
            engine = %self.kind,
            workdir = %workdir.path().display(),
            "build starting"
        );
        let body = self.run_states(workdir.path(), retry);
        self.conclude(workdir, body, started)
    }

    fn run_states(
        &mut self,
        workdir: &Path,
        retry: RetryContext,
    ) -> Result<Vec<ArtifactRecord>, EngineError> {
        let cancel = Arc::clone(&self.cancel);

        self.ensure_live()?;
        self.backend.start(workdir)?;
        eprintln!(
            "    Started {} engine ({})",
            self.kind,
            self.backend.build_host_name()
        );

        self.ensure_live()?;
        let packages = build_dependencies(&self.project);
        if let Some(command) = install_command(&self.platform, &packages)? {
            eprintln!("    Installing {} build dependencies", packages.len());
            retry_with_timeout("dependency install", retry, &cancel, || {
                self.backend.dispatch(&command).map_err(EngineError::from)
            })?;
        }

        self.ensure_live()?;
        self.project.fetch_sources(workdir)?;
        self.project.generate_build_files(workdir)?;
        self.project.generate_manifest(workdir)?;
        self.project.generate_packaging_inputs(workdir)?;

        self.ensure_live()?;
        eprintln!("    Shipping workdir to {}", self.backend.build_host_name());
        self.backend.ship_workdir(workdir)?;

        self.ensure_live()?;
        let build_command = self.platform.build_command().to_owned();
        eprintln!("    Building {} with `{build_command}`", self.project.name());
        retry_with_timeout("remote build", retry, &cancel, || {
            self.backend.dispatch(&build_command).map_err(EngineError::from)
        })?;

        self.ensure_live()?;
        let dist = self.backend.retrieve_artifact()?;
        self.materialize_artifacts(&dist)
    }

    /// Bring every retrieved file into the project's `dist/`, record its
    /// digest, and write the metadata sidecar.
    fn materialize_artifacts(&self, dist: &Path) -> Result<Vec<ArtifactRecord>, EngineError> {
        let dest_root = self.project.root.join("dist");
        ensure_dir(&dest_root)?;
        let mut artifacts = Vec::new();
        for file in collect_files(dist)? {
            let rel = file.strip_prefix(dist).unwrap_or(&file);
            let dest = dest_root.join(rel);
            if let Some(parent) = dest.parent() {
                ensure_dir(parent)?;
            }
            materialize(&file, &dest)?;
            let sha256 = sha256_file(&dest)?;
            eprintln!("    Wrote {}", dest.display());
            artifacts.push(ArtifactRecord { path: dest, sha256 });
        }

        let host = self.backend.host_info();
        let metadata = DistMetadata {
            project: self.project.name(),
            version: self.project.version(),
            host: &host,
            artifacts: &artifacts,
        };
        let rendered =
            toml::to_string_pretty(&metadata).map_err(|source| EngineError::Metadata { source })?;
        let metadata_path = dest_root.join("metadata.toml");
        std::fs::write(&metadata_path, rendered).map_err(|source| EngineError::Io {
            path: metadata_path.display().to_string(),
            source,
        })?;
        Ok(artifacts)
    }

    /// The single exit path for `run`: teardown, then workdir cleanup, then
    /// the body's verdict. Provisioned resources are released no matter
    /// what — `preserve` only ever keeps local state and idle engines.
    fn conclude(
        &mut self,
        workdir: Workdir,
        body: Result<Vec<ArtifactRecord>, EngineError>,
        started: Instant,
    ) -> Result<BuildReport, EngineError> {
        let host = self.backend.host_info();

        let teardown = if self.kind.provisions_resources() || !self.options.preserve {
            self.backend.teardown()
        } else {
            info!(engine = %self.kind, "leaving engine running (preserve)");
            Ok(())
        };
        if let Err(teardown_error) = &teardown {
            error!(error = %teardown_error, "teardown failed");
        }

        let cleanup = if self.options.preserve {
            let kept = workdir.preserve();
            eprintln!("    Preserved workdir at {}", kept.display());
            Ok(())
        } else {
            workdir.close()
        };
        if let Err(cleanup_error) = &cleanup {
            error!(error = %cleanup_error, "workdir cleanup failed");
        }

        match body {
            Ok(artifacts) => {
                teardown?;
                cleanup?;
                Ok(BuildReport {
                    artifacts,
                    host,
                    duration: started.elapsed(),
                })
            }
            Err(body_error) => {
                // The body's failure outranks teardown and cleanup noise.
                log_error_chain(&body_error);
                Err(body_error)
            }
        }
    }

    /// The lighter developer flow: stage and build on the host, then leave
    /// everything in place for inspection. No retry budget, no packaging
    /// inputs, no artifact retrieval, and no teardown — that last one is
    /// the caller's job, via [`BuildDriver::teardown`].
    ///
    /// A caller-supplied workdir is created if absent and never deleted;
    /// without one, an ephemeral workdir is used and cleaned up unless
    /// `preserve` is set.
    ///
    /// # Errors
    ///
    /// Returns the first failing state's error.
    pub fn prepare(&mut self, workdir_override: Option<&Path>) -> Result<(), EngineError> {
        self.project.validate()?;
        let workdir = match workdir_override {
            Some(path) => Workdir::pinned(path)?,
            None => Workdir::ephemeral()?,
        };
        info!(
            project = %self.project.name(),
            engine = %self.kind,
            workdir = %workdir.path().display(),
            "prepare starting"
        );
        let body = self.prepare_states(workdir.path());

        let cleanup = if !workdir.is_ephemeral() {
            Ok(())
        } else if self.options.preserve {
            let kept = workdir.preserve();
            eprintln!("    Preserved workdir at {}", kept.display());
            Ok(())
        } else {
            workdir.close()
        };
        if let Err(cleanup_error) = &cleanup {
            error!(error = %cleanup_error, "workdir cleanup failed");
        }

        match body {
            Ok(()) => {
                cleanup?;
                Ok(())
            }
            Err(body_error) => {
                log_error_chain(&body_error);
                Err(body_error)
            }
        }
    }

    fn prepare_states(&mut self, workdir: &Path) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.backend.start(workdir)?;
        eprintln!(
            "    Started {} engine ({})",
            self.kind,
            self.backend.build_host_name()
        );

        self.ensure_live()?;
        let packages = build_dependencies(&self.project);
        if let Some(command) = install_command(&self.platform, &packages)? {
            eprintln!("    Installing {} build dependencies", packages.len());
            // One shot: a developer iterating on a build host wants the
            // failure now, not after a retry budget.
            self.backend.dispatch(&command)?;
        }

        self.ensure_live()?;
        self.project.fetch_sources(workdir)?;
        self.project.generate_build_files(workdir)?;
        self.project.generate_manifest(workdir)?;

        self.ensure_live()?;
        self.backend.ship_workdir(workdir)?;

        self.ensure_live()?;
        let command = format!("{} {}", self.platform.build_command(), self.project.name());
        self.backend.dispatch(&command)?;
        eprintln!(
            "    Prepared {} on {} (engine left running)",
            self.project.name(),
            self.backend.build_host_name()
        );
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Log a terminal failure with its full source chain before it surfaces.
fn log_error_chain(failure: &EngineError) {
    error!(error = %failure, "build failed");
    let mut source = std::error::Error::source(failure);
    while let Some(cause) = source {
        error!(cause = %cause, "caused by");
        source = cause.source();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use slipway_backend::BackendError;
    use slipway_config::project::FILE_NAME;
    use slipway_util::error::UtilError;
    use slipway_util::hash::sha256_bytes;
    use tempfile::TempDir;

    /// Shared view into a [`RecordingBackend`]'s life, surviving the move
    /// of the backend into the driver.
    #[derive(Debug, Clone, Default)]
    struct Recorder {
        calls: Rc<RefCell<Vec<String>>>,
        workdir: Rc<RefCell<Option<PathBuf>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        }

        fn workdir(&self) -> Option<PathBuf> {
            self.workdir.borrow().clone()
        }
    }

    /// An engine that only writes down what was asked of it.
    struct RecordingBackend {
        kind: BackendKind,
        recorder: Recorder,
        dispatch_failures: usize,
    }

    impl RecordingBackend {
        fn push(&self, call: impl Into<String>) {
            self.recorder.calls.borrow_mut().push(call.into());
        }
    }

    impl Backend for RecordingBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn target(&self) -> &str {
            "recorder"
        }

        fn build_host_name(&self) -> String {
            "recorder".to_owned()
        }

        fn remote_workdir(&self) -> Option<&str> {
            Some("/tmp/recorder")
        }

        fn start(&mut self, local_workdir: &Path) -> Result<(), BackendError> {
            self.push("start");
            *self.recorder.workdir.borrow_mut() = Some(local_workdir.to_path_buf());
            Ok(())
        }

        fn ship_workdir(&mut self, _local_workdir: &Path) -> Result<(), BackendError> {
            self.push("ship");
            Ok(())
        }

        fn dispatch(&mut self, command: &str) -> Result<(), BackendError> {
            self.push(format!("dispatch {command}"));
            if self.dispatch_failures > 0 {
                self.dispatch_failures -= 1;
                return Err(BackendError::CommandFailed {
                    host: "recorder".to_owned(),
                    command: command.to_owned(),
                    code: "1".to_owned(),
                    stderr: "synthetic failure".to_owned(),
                });
            }
            Ok(())
        }

        fn retrieve_artifact(&mut self) -> Result<PathBuf, BackendError> {
            self.push("retrieve");
            let workdir = self.recorder.workdir().ok_or(BackendError::NotStarted)?;
            let dist = workdir.join("dist");
            let io = |source| BackendError::Stage {
                source: UtilError::Io {
                    path: dist.display().to_string(),
                    source,
                },
            };
            std::fs::create_dir_all(&dist).map_err(io)?;
            std::fs::write(dist.join("demo_1.0.tar.gz"), b"artifact payload").map_err(io)?;
            Ok(dist)
        }

        fn teardown(&mut self) -> Result<(), BackendError> {
            self.push("teardown");
            Ok(())
        }
    }

    fn project_fixture(root: &Path, version: &str) -> Project {
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.c"), "int main(void) { return 0; }\n").unwrap();
        std::fs::write(
            root.join(FILE_NAME),
            format!(
                r#"
[project]
name = "demo"
version = "{version}"

[[component]]
name = "demo-core"
"#
            ),
        )
        .unwrap();
        Project::from_path(&root.join(FILE_NAME)).unwrap()
    }

    fn bare_platform() -> Platform {
        toml::from_str(
            r#"
[platform]
name = "testos"
"#,
        )
        .unwrap()
    }

    fn recording_driver(
        kind: BackendKind,
        recorder: &Recorder,
        dispatch_failures: usize,
        project: Project,
        options: DriverOptions,
    ) -> BuildDriver {
        BuildDriver {
            platform: bare_platform(),
            project,
            options,
            backend: Box::new(RecordingBackend {
                kind,
                recorder: recorder.clone(),
                dispatch_failures,
            }),
            kind,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn run_walks_the_states_in_order() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Container,
            &recorder,
            0,
            project,
            DriverOptions::default(),
        );

        let report = driver.run().unwrap();
        assert_eq!(
            recorder.calls(),
            ["start", "ship", "dispatch make", "retrieve", "teardown"]
        );
        assert_eq!(report.host.name, "recorder");
        assert_eq!(report.host.engine, "container");

        assert_eq!(report.artifacts.len(), 1);
        let artifact = report.artifacts.first().unwrap();
        assert_eq!(artifact.path, root.path().join("dist/demo_1.0.tar.gz"));
        assert_eq!(artifact.sha256, sha256_bytes(b"artifact payload"));
        assert!(artifact.path.is_file());

        let metadata =
            std::fs::read_to_string(root.path().join("dist/metadata.toml")).unwrap();
        assert!(metadata.contains("project = \"demo\""));
        assert!(metadata.contains("demo_1.0.tar.gz"));
    }

    #[test]
    fn empty_version_fails_before_any_engine_call() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "");
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Local,
            &recorder,
            0,
            project,
            DriverOptions::default(),
        );

        let err = driver.run().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Project(slipway_config::project::ProjectError::MissingVersion { .. })
        ));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn bad_retry_override_fails_before_any_engine_call() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("src")).unwrap();
        std::fs::write(
            root.path().join(FILE_NAME),
            r#"
[project]
name = "demo"
version = "1.0"

[retry]
attempts = 0
"#,
        )
        .unwrap();
        let project = Project::from_path(&root.path().join(FILE_NAME)).unwrap();
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Local,
            &recorder,
            0,
            project,
            DriverOptions::default(),
        );

        let err = driver.run().unwrap_err();
        assert!(matches!(err, EngineError::InvalidRetrySetting { .. }));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn unsafe_build_requirement_fails_before_any_engine_call() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("src")).unwrap();
        std::fs::write(
            root.path().join(FILE_NAME),
            r#"
[project]
name = "demo"
version = "1.0"

[[component]]
name = "demo-core"
build_requires = ["gcc; echo pwned"]
"#,
        )
        .unwrap();
        let project = Project::from_path(&root.path().join(FILE_NAME)).unwrap();
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Local,
            &recorder,
            0,
            project,
            DriverOptions::default(),
        );

        // The tainted requirement would otherwise be spliced verbatim into
        // the install command this engine dispatches.
        let err = driver.run().unwrap_err();
        assert!(matches!(
            err,
            EngineError::Project(slipway_config::project::ProjectError::UnsafeDependency { .. })
        ));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn transient_build_failures_are_retried() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("src")).unwrap();
        std::fs::write(root.path().join("src/lib.c"), "\n").unwrap();
        std::fs::write(
            root.path().join(FILE_NAME),
            r#"
[project]
name = "demo"
version = "1.0"

[retry]
attempts = 3
"#,
        )
        .unwrap();
        let project = Project::from_path(&root.path().join(FILE_NAME)).unwrap();
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Container,
            &recorder,
            2,
            project,
            DriverOptions::default(),
        );

        driver.run().unwrap();
        assert_eq!(recorder.count("dispatch make"), 3);
        assert_eq!(recorder.count("teardown"), 1);
    }

    #[test]
    fn exhausted_retries_still_tear_down_exactly_once() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Container,
            &recorder,
            usize::MAX,
            project,
            DriverOptions::default(),
        );

        let err = driver.run().unwrap_err();
        assert!(matches!(
            err,
            EngineError::RetriesExhausted {
                operation: "remote build",
                attempts: 2,
                ..
            }
        ));
        assert_eq!(recorder.count("dispatch make"), 2);
        assert_eq!(recorder.count("teardown"), 1);
        assert_eq!(recorder.count("retrieve"), 0);
    }

    #[test]
    fn provisioning_engines_are_torn_down_despite_preserve() {
        for kind in [BackendKind::Hardware, BackendKind::Cloud] {
            let root = TempDir::new().unwrap();
            let project = project_fixture(root.path(), "1.0");
            let recorder = Recorder::default();
            let options = DriverOptions {
                preserve: true,
                ..DriverOptions::default()
            };
            let mut driver = recording_driver(kind, &recorder, usize::MAX, project, options);

            driver.run().unwrap_err();
            assert_eq!(recorder.count("teardown"), 1, "kind {kind}");

            // The workdir survived the failed run for inspection.
            let workdir = recorder.workdir().unwrap();
            assert!(workdir.is_dir());
            std::fs::remove_dir_all(&workdir).unwrap();
        }
    }

    #[test]
    fn idle_engine_is_kept_when_preserving() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let recorder = Recorder::default();
        let options = DriverOptions {
            preserve: true,
            ..DriverOptions::default()
        };
        let mut driver =
            recording_driver(BackendKind::Container, &recorder, 0, project, options);

        driver.run().unwrap();
        assert_eq!(recorder.count("teardown"), 0);

        let workdir = recorder.workdir().unwrap();
        assert!(workdir.is_dir());
        std::fs::remove_dir_all(&workdir).unwrap();
    }

    #[test]
    fn without_preserve_the_workdir_is_gone() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Container,
            &recorder,
            0,
            project,
            DriverOptions::default(),
        );

        driver.run().unwrap();
        assert_eq!(recorder.count("teardown"), 1);
        assert!(!recorder.workdir().unwrap().exists());
    }

    #[test]
    fn cancellation_before_start_still_concludes() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Container,
            &recorder,
            0,
            project,
            DriverOptions::default(),
        );

        driver.cancel_flag().store(true, Ordering::SeqCst);
        let err = driver.run().unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        // The engine was never started, but teardown still got its turn.
        assert_eq!(recorder.calls(), ["teardown"]);
    }

    #[test]
    fn dependencies_are_installed_before_the_build() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("src")).unwrap();
        std::fs::write(root.path().join("src/lib.c"), "\n").unwrap();
        std::fs::write(
            root.path().join(FILE_NAME),
            r#"
[project]
name = "demo"
version = "1.0"

[[component]]
name = "demo-core"
build_requires = ["cmake", "zlib-dev"]
"#,
        )
        .unwrap();
        let project = Project::from_path(&root.path().join(FILE_NAME)).unwrap();
        let platform: Platform = toml::from_str(
            r#"
[platform]
name = "testos"

[install]
command = "apt-get install -y"
"#,
        )
        .unwrap();
        let recorder = Recorder::default();
        let mut driver = BuildDriver {
            platform,
            project,
            options: DriverOptions::default(),
            backend: Box::new(RecordingBackend {
                kind: BackendKind::Container,
                recorder: recorder.clone(),
                dispatch_failures: 0,
            }),
            kind: BackendKind::Container,
            cancel: Arc::new(AtomicBool::new(false)),
        };

        driver.run().unwrap();
        let calls = recorder.calls();
        let install = calls
            .iter()
            .position(|c| c == "dispatch apt-get install -y cmake zlib-dev")
            .unwrap();
        let build = calls.iter().position(|c| c == "dispatch make").unwrap();
        assert!(install < build);
    }

    #[test]
    fn prepare_skips_packaging_retrieval_and_teardown() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Container,
            &recorder,
            0,
            project,
            DriverOptions::default(),
        );

        let prep = TempDir::new().unwrap();
        let prep_dir = prep.path().join("stage");
        driver.prepare(Some(&prep_dir)).unwrap();

        assert_eq!(
            recorder.calls(),
            ["start", "ship", "dispatch make demo"]
        );
        // Caller-owned workdir: staged, fully populated, and left alone.
        assert!(prep_dir.join("src/main.c").is_file());
        assert!(prep_dir.join("Makefile").is_file());
        assert!(prep_dir.join("manifest.toml").is_file());
        assert!(!prep_dir.join("pkg").exists());

        // Teardown is the caller's move.
        driver.teardown().unwrap();
        assert_eq!(recorder.count("teardown"), 1);
    }

    #[test]
    fn prepare_does_not_retry_a_failed_dispatch() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let recorder = Recorder::default();
        let mut driver = recording_driver(
            BackendKind::Container,
            &recorder,
            usize::MAX,
            project,
            DriverOptions::default(),
        );

        let err = driver.prepare(None).unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
        assert_eq!(recorder.count("dispatch make demo"), 1);
        assert_eq!(recorder.count("teardown"), 0);
    }

    #[test]
    fn new_injects_driver_flags_into_the_settings() {
        let root = TempDir::new().unwrap();
        let project = project_fixture(root.path(), "1.0");
        let options = DriverOptions {
            verbose: true,
            skip_checks: true,
            ..DriverOptions::default()
        };
        let driver = BuildDriver::new(bare_platform(), project, options).unwrap();
        assert_eq!(driver.backend_kind(), BackendKind::Local);
        assert!(driver.project.flag("verbose"));
        assert!(driver.project.flag("skip_checks"));
        assert_eq!(driver.build_host_info().engine, "local");
    }
}
