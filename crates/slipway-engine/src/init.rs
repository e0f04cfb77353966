//! Project scaffolding for `slipway init`.

use std::path::Path;

use slipway_config::project::{Component, Project, ProjectInfo, RetrySpec};

use crate::error::EngineError;

/// Scaffold a new slipway project.
///
/// Creates the project directory (if it doesn't exist), a `slipway.toml`
/// with a single component named after the project, and a `src/` stub whose
/// Makefile answers the targets the generated build files dispatch. The
/// result builds as-is with the local engine.
///
/// # Errors
/// Returns an error if:
/// - A `slipway.toml` already exists in `dir`
/// - The directory or files cannot be created
/// - The descriptor cannot be serialized
pub fn init_project(name: &str, dir: &Path) -> Result<(), EngineError> {
    let descriptor_path = dir.join(slipway_config::project::FILE_NAME);

    if descriptor_path.exists() {
        return Err(EngineError::ProjectExists {
            path: descriptor_path.display().to_string(),
        });
    }

    let src_dir = dir.join("src");
    slipway_util::fs::ensure_dir(&src_dir)?;

    let project = Project {
        project: ProjectInfo {
            name: name.to_owned(),
            version: "0.1.0".to_owned(),
        },
        source: None,
        components: vec![Component {
            name: name.to_owned(),
            build_requires: Vec::new(),
        }],
        retry: RetrySpec::default(),
        settings: std::collections::BTreeMap::new(),
        root: dir.to_path_buf(),
    };
    let toml_content =
        toml::to_string_pretty(&project).map_err(|source| EngineError::Metadata { source })?;
    std::fs::write(&descriptor_path, toml_content).map_err(|source| EngineError::Io {
        path: descriptor_path.display().to_string(),
        source,
    })?;

    // The stub answers the targets the generated Makefile dispatches: the
    // component target installs a hello-world binary under DESTDIR, and
    // `check` is wired but empty.
    let makefile_content = format!(
        "CC ?= cc\n\n{name}:\n\tmkdir -p $(DESTDIR)\n\t$(CC) -o $(DESTDIR)/{name} main.c\n\ncheck:\n\t@echo \"no checks configured\"\n\n.PHONY: {name} check\n"
    );
    let makefile_path = src_dir.join("Makefile");
    std::fs::write(&makefile_path, makefile_content).map_err(|source| EngineError::Io {
        path: makefile_path.display().to_string(),
        source,
    })?;

    let main_content = format!(
        "#include <stdio.h>\n\nint main(void) {{\n    printf(\"Hello, {name}!\\n\");\n    return 0;\n}}\n"
    );
    let main_path = src_dir.join("main.c");
    std::fs::write(&main_path, main_content).map_err(|source| EngineError::Io {
        path: main_path.display().to_string(),
        source,
    })?;

    let gitignore_path = dir.join(".gitignore");
    std::fs::write(&gitignore_path, "dist/\n").map_err(|source| EngineError::Io {
        path: gitignore_path.display().to_string(),
        source,
    })?;

    Ok(())
}
