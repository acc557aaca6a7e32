//! Loading a project directory from disk into project files.

use std::path::Path;

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::CONFIG_DIR;
use crate::project::{ProjectFile, ProjectKind, normalize_path};

/// Directories never descended into.
const SKIPPED_DIRS: [&str; 3] = ["node_modules", ".git", CONFIG_DIR];

#[derive(Debug, Clone)]
pub struct LoadedProject {
    /// Sorted by path.
    pub files: Vec<ProjectFile>,
    pub kind: ProjectKind,
    /// Paths skipped because their content is not UTF-8.
    pub skipped: Vec<String>,
}

impl LoadedProject {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

/// Read every text file under `dir` except ignored globs and skipped
/// directories, and detect the project kind from the result.
pub fn load_project(dir: &Path, ignore: &[String]) -> Result<LoadedProject> {
    if !dir.is_dir() {
        anyhow::bail!("Project directory not found: {}", dir.display());
    }
    let patterns = ignore
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid ignore pattern '{}'", p)))
        .collect::<Result<Vec<_>>>()?;

    let mut files = Vec::new();
    let mut skipped = Vec::new();
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = project_path(dir, entry.path()) else {
            continue;
        };
        if patterns.iter().any(|p| p.matches(&path)) {
            debug!(path = %path, "Ignored by pattern");
            continue;
        }
        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        match String::from_utf8(bytes) {
            Ok(content) => files.push(ProjectFile::new(path, content)),
            Err(_) => {
                warn!(path = %path, "Skipping non-UTF-8 file");
                skipped.push(path);
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    let kind = ProjectKind::detect(files.iter().map(|f| f.path.as_str()));
    debug!(files = files.len(), kind = %kind, "Loaded project from {}", dir.display());
    Ok(LoadedProject {
        files,
        kind,
        skipped,
    })
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

fn project_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?
        .join("/");
    normalize_path(&joined)
}
