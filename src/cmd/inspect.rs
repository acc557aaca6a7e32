//! Inspection commands — `stagehand transform` and `stagehand resolve`.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde_json::json;

use stagehand::config::Config;
use stagehand::loader::externals::ExternalTable;
use stagehand::loader::resolve::{Resolved, resolve};
use stagehand::project::normalize_path;
use stagehand::registry::Snapshot;
use stagehand::storage::load_project;
use stagehand::transform::transform;

/// Project-relative path for `file` when it lies inside the project,
/// otherwise its file name.
fn display_path(project_dir: &Path, file: &Path) -> String {
    let absolute = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
    let relative = absolute
        .strip_prefix(project_dir)
        .ok()
        .and_then(|p| p.to_str())
        .and_then(normalize_path)
        .filter(|p| !p.is_empty());
    relative.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string())
    })
}

pub fn cmd_transform(project_dir: &Path, file: &Path, json: bool) -> Result<ExitCode> {
    let config = Config::new(project_dir.to_path_buf())?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let path = display_path(&config.project_dir, file);

    match transform(&path, &content, &config.toml.transform) {
        Ok(module) => {
            if json {
                let output = json!({
                    "path": module.path,
                    "kind": module.kind,
                    "dependencies": module.dependencies,
                    "exports": module.exports,
                    "code": module.code,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", module.code);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(fault) => {
            eprintln!("{}", fault);
            Ok(ExitCode::FAILURE)
        }
    }
}

pub fn cmd_resolve(project_dir: &Path, from: &str, specifier: &str) -> Result<ExitCode> {
    let config = Config::new(project_dir.to_path_buf())?;
    let project = load_project(&config.project_dir, &config.toml.ignore)?;
    let files = Snapshot::from_files(project.files);
    let externals = ExternalTable::with_globals(config.toml.externals.clone());
    let from = normalize_path(from).unwrap_or_else(|| from.to_string());

    match resolve(&from, specifier, &files, &externals) {
        Ok(Resolved::Module(path)) => {
            println!("{}", path);
            Ok(ExitCode::SUCCESS)
        }
        Ok(Resolved::External(name)) => {
            println!("external:{}", name);
            Ok(ExitCode::SUCCESS)
        }
        Err(fault) => {
            eprintln!("{}", fault);
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_display_path_inside_and_outside_project() {
        let project = tempdir().unwrap();
        let root = project.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/App.tsx"), "").unwrap();
        assert_eq!(display_path(&root, &root.join("src/App.tsx")), "src/App.tsx");

        let other = tempdir().unwrap();
        std::fs::write(other.path().join("Widget.tsx"), "").unwrap();
        assert_eq!(display_path(&root, &other.path().join("Widget.tsx")), "Widget.tsx");
    }
}
