//! Project files, project kinds and path normalization.

use serde::{Deserialize, Serialize};

/// One source file of a generated project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Project-relative POSIX path, unique within a snapshot.
    pub path: String,
    /// Source text; may be partial while the file is streaming.
    pub content: String,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Shape of a project, which decides the entry designator and render mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectKind {
    /// `index.html` + `style.css` + `script.js`
    Static,
    /// A single top-level `App` component
    #[default]
    SingleFile,
    /// A `src/` tree with `src/App` as the entry
    MultiFile,
}

impl ProjectKind {
    /// Entry designator, resolved with the same probing as relative imports.
    pub fn entry(&self) -> &'static str {
        match self {
            ProjectKind::Static => "script.js",
            ProjectKind::SingleFile => "App",
            ProjectKind::MultiFile => "src/App",
        }
    }

    /// Detect the kind from the set of paths in a project.
    pub fn detect<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut has_src = false;
        let mut has_index = false;
        let mut has_app = false;
        for path in paths {
            if path.starts_with("src/") {
                has_src = true;
            }
            if path == "index.html" {
                has_index = true;
            }
            if path.rsplit_once('.').map(|(stem, _)| stem) == Some("App")
                && FileKind::from_path(path) == FileKind::Script
            {
                has_app = true;
            }
        }
        if has_src {
            ProjectKind::MultiFile
        } else if has_index && !has_app {
            ProjectKind::Static
        } else {
            ProjectKind::SingleFile
        }
    }
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectKind::Static => write!(f, "static"),
            ProjectKind::SingleFile => write!(f, "single-file"),
            ProjectKind::MultiFile => write!(f, "multi-file"),
        }
    }
}

impl std::str::FromStr for ProjectKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(ProjectKind::Static),
            "single-file" | "single" => Ok(ProjectKind::SingleFile),
            "multi-file" | "multi" => Ok(ProjectKind::MultiFile),
            _ => anyhow::bail!(
                "Invalid project kind '{}'. Valid values: static, single-file, multi-file",
                s
            ),
        }
    }
}

/// Kind of a file as recognized by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Script,
    Stylesheet,
    Markup,
    Other,
}

impl FileKind {
    pub fn from_path(path: &str) -> Self {
        match extension_of(path) {
            Some("tsx" | "ts" | "jsx" | "js" | "mjs" | "cjs" | "mts") => FileKind::Script,
            Some("css") => FileKind::Stylesheet,
            Some("html" | "htm") => FileKind::Markup,
            _ => FileKind::Other,
        }
    }

    /// Content type used when serving a file of this kind. Unknown kinds are
    /// served as scripts.
    pub fn content_type(&self) -> ContentType {
        match self {
            FileKind::Stylesheet => ContentType::Stylesheet,
            FileKind::Markup => ContentType::Markup,
            FileKind::Script | FileKind::Other => ContentType::Script,
        }
    }
}

/// The fixed content-type enumeration of the gateway wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Script,
    Stylesheet,
    Markup,
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Script => "application/javascript; charset=utf-8",
            ContentType::Stylesheet => "text/css; charset=utf-8",
            ContentType::Markup => "text/html; charset=utf-8",
        }
    }
}

/// Extension of the final path segment, without the dot.
pub fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Normalize a project or URL path to canonical POSIX form.
///
/// Leading slashes, empty segments and `.` segments are dropped and `..`
/// pops the previous segment. Returns `None` when `..` would escape the
/// project root.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

/// Directory portion of a normalized path (`""` for top-level files).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}
