#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use slipway_backend::select::{instantiate, select_kind};
use slipway_backend::{Backend, BackendKind};
use slipway_config::{Platform, Project};
use slipway_engine::{BuildDriver, DriverOptions};
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "slipway", about = "Build packages on disposable build hosts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new slipway project
    Init {
        /// Project name (defaults to the current directory's name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Run the full build: stage, build on the host, bring artifacts home
    Build {
        /// Platform descriptor file
        #[arg(long)]
        platform: PathBuf,
        /// Build-host address (user@host), overriding the platform's pool
        #[arg(long)]
        target: Option<String>,
        /// Execution engine when neither the descriptor nor a target decides one
        #[arg(long)]
        engine: Option<BackendKind>,
        /// Keep the workdir (and an idle engine) after the build
        #[arg(long)]
        preserve: bool,
        /// Skip the project's check target during packaging
        #[arg(long)]
        skip_checks: bool,
        /// Log the underlying engine commands
        #[arg(long, short = 'v')]
        verbose: bool,
    },
    /// Stage and build on a host, then leave everything in place
    Prepare {
        /// Platform descriptor file
        #[arg(long)]
        platform: PathBuf,
        /// Use this local workdir instead of an ephemeral one
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Build-host address (user@host), overriding the platform's pool
        #[arg(long)]
        target: Option<String>,
        /// Execution engine when neither the descriptor nor a target decides one
        #[arg(long)]
        engine: Option<BackendKind>,
        /// Log the underlying engine commands
        #[arg(long, short = 'v')]
        verbose: bool,
    },
    /// Show which build host and engine a build would use
    Info {
        /// Platform descriptor file
        #[arg(long)]
        platform: PathBuf,
        /// Build-host address (user@host), overriding the platform's pool
        #[arg(long)]
        target: Option<String>,
        /// Execution engine when neither the descriptor nor a target decides one
        #[arg(long)]
        engine: Option<BackendKind>,
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove retrieved artifacts
    Clean,
}

fn main() {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Build { verbose, .. } | Command::Prepare { verbose, .. } => *verbose,
        _ => false,
    };
    init_logging(verbose);

    let result = match cli.command {
        Command::Init { name } => cmd_init(name),
        Command::Build {
            platform,
            target,
            engine,
            preserve,
            skip_checks,
            verbose,
        } => cmd_build(&platform, target, engine, preserve, skip_checks, verbose),
        Command::Prepare {
            platform,
            workdir,
            target,
            engine,
            verbose,
        } => cmd_prepare(&platform, workdir.as_deref(), target, engine, verbose),
        Command::Info {
            platform,
            target,
            engine,
            json,
        } => cmd_info(&platform, target, engine, json),
        Command::Clean => cmd_clean(),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins when set; otherwise `-v` lifts the floor to `debug` so
/// the ssh/docker/aws plumbing shows, and the default `warn` still surfaces
/// every failed retry attempt.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .without_time()
        .init();
}

/// Find the project root by looking for `slipway.toml` in the current directory.
fn project_root() -> Result<PathBuf, Box<dyn Error>> {
    let cwd = std::env::current_dir()?;
    if !cwd.join(slipway_config::project::FILE_NAME).exists() {
        return Err(
            "no slipway.toml found in current directory — run `slipway init` to create a project"
                .into(),
        );
    }
    Ok(cwd)
}

/// Flip the driver's cancel flag on Ctrl-C. The run stops at the next state
/// or retry boundary, where teardown still gets its turn.
fn install_interrupt_handler(driver: &BuildDriver) {
    let cancel = driver.cancel_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("    Interrupted; stopping after the current step");
        cancel.store(true, Ordering::SeqCst);
    }) {
        eprintln!("warning: cannot install interrupt handler: {e}");
    }
}

fn cmd_init(name: Option<String>) -> CliResult {
    let cwd = std::env::current_dir()?;

    let project_name = name.unwrap_or_else(|| {
        cwd.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("my-project")
            .to_owned()
    });

    let project_dir = cwd.join(&project_name);
    slipway_engine::init_project(&project_name, &project_dir)?;

    eprintln!(
        "    Created project `{project_name}` at {}",
        project_dir.display()
    );
    eprintln!();
    eprintln!("  To get started:");
    eprintln!("    cd {project_name}");
    eprintln!("    slipway build --platform <platform.toml> --engine local");
    Ok(())
}

fn cmd_build(
    platform_path: &Path,
    target: Option<String>,
    engine: Option<BackendKind>,
    preserve: bool,
    skip_checks: bool,
    verbose: bool,
) -> CliResult {
    let root = project_root()?;
    let project = Project::from_path(&root.join(slipway_config::project::FILE_NAME))?;
    let platform = Platform::from_path(platform_path)?;
    let label = format!("{} {}", project.name(), project.version());

    let options = DriverOptions {
        target,
        default_engine: engine.unwrap_or(BackendKind::Local),
        preserve,
        verbose,
        skip_checks,
    };
    let mut driver = BuildDriver::new(platform, project, options)?;
    install_interrupt_handler(&driver);

    let report = driver.run()?;

    for artifact in &report.artifacts {
        let short = artifact.sha256.get(..12).unwrap_or(artifact.sha256.as_str());
        eprintln!("      {short}  {}", artifact.path.display());
    }
    eprintln!(
        "    Finished {label} in {:.2}s on {}",
        report.duration.as_secs_f64(),
        report.host
    );
    Ok(())
}

fn cmd_prepare(
    platform_path: &Path,
    workdir: Option<&Path>,
    target: Option<String>,
    engine: Option<BackendKind>,
    verbose: bool,
) -> CliResult {
    let root = project_root()?;
    let project = Project::from_path(&root.join(slipway_config::project::FILE_NAME))?;
    let platform = Platform::from_path(platform_path)?;

    let options = DriverOptions {
        target,
        default_engine: engine.unwrap_or(BackendKind::Local),
        verbose,
        ..DriverOptions::default()
    };
    let mut driver = BuildDriver::new(platform, project, options)?;
    install_interrupt_handler(&driver);

    driver.prepare(workdir)?;
    Ok(())
}

fn cmd_info(
    platform_path: &Path,
    target: Option<String>,
    engine: Option<BackendKind>,
    json: bool,
) -> CliResult {
    let platform = Platform::from_path(platform_path)?;
    let default_engine = engine.unwrap_or(BackendKind::Local);

    // Selection only: nothing is provisioned until a build starts.
    let kind = select_kind(&platform, target.as_deref(), default_engine);
    let backend = instantiate(kind, &platform, target.as_deref())?;
    let info = backend.host_info();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("{info}");
    }
    Ok(())
}


fn cmd_clean() -> CliResult {
    let root = project_root()?;
    let dist_dir = root.join("dist");

    slipway_util::fs::remove_dir_all_if_exists(&dist_dir)?;

    eprintln!("    Cleaned retrieved artifacts");
    Ok(())
}
