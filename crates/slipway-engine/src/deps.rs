//! Build-dependency resolution: which system packages the build host needs
//! before the project will compile.

use std::collections::BTreeSet;

use slipway_config::{Platform, Project};

use crate::error::EngineError;

/// External packages required at build time: the union of every component's
/// requirements minus the component names themselves. A requirement
/// satisfied by a sibling component is never requested from the system
/// package manager. The result is sorted and deduplicated so generated
/// install commands are reproducible.
#[must_use]
pub fn build_dependencies(project: &Project) -> Vec<String> {
    let in_project: BTreeSet<&str> = project
        .components
        .iter()
        .map(|component| component.name.as_str())
        .collect();
    let external: BTreeSet<&String> = project
        .components
        .iter()
        .flat_map(|component| component.build_requires.iter())
        .filter(|requirement| !in_project.contains(requirement.as_str()))
        .collect();
    external.into_iter().cloned().collect()
}

/// The shell command that installs `packages` on the build host, or `None`
/// when there is nothing to install.
///
/// Platforms offer one of two strategies: a literal command template (the
/// packages are appended, an optional suffix goes after them) or a known
/// package manager the invocation is synthesized from. The template wins
/// when both are present.
///
/// # Errors
///
/// [`EngineError::NoInstallStrategy`] when packages are needed but the
/// platform provides neither strategy.
pub fn install_command(
    platform: &Platform,
    packages: &[String],
) -> Result<Option<String>, EngineError> {
    if packages.is_empty() {
        return Ok(None);
    }
    let no_strategy = || EngineError::NoInstallStrategy {
        platform: platform.name().to_owned(),
    };
    let install = platform.install.as_ref().ok_or_else(no_strategy)?;
    if let Some(template) = &install.command {
        let mut command = format!("{template} {}", packages.join(" "));
        if let Some(suffix) = &install.suffix {
            command.push(' ');
            command.push_str(suffix);
        }
        Ok(Some(command))
    } else if let Some(manager) = install.manager {
        Ok(Some(manager.install_invocation(packages)))
    } else {
        Err(no_strategy())
    }
}
