//! Pure module resolution.
//!
//! `(fromPath, specifier, files) -> resolvedPath | fault`, with no sandbox
//! involvement. The gateway probes request paths with [`probe`] so that
//! both sides always agree on which registry key a path names.

use std::collections::BTreeSet;

use crate::errors::Fault;
use crate::project::{normalize_path, parent_dir};
use crate::registry::Snapshot;

use super::externals::ExternalTable;

/// Executable extensions, in probing priority order.
pub const SCRIPT_EXTENSIONS: [&str; 4] = [".tsx", ".ts", ".jsx", ".js"];

/// Source-only extensions that the transform rewrites to [`CANONICAL_EXTENSION`].
pub const SOURCE_ONLY_EXTENSIONS: [&str; 4] = [".tsx", ".ts", ".jsx", ".mts"];

/// The single extension rewritten relative specifiers carry.
pub const CANONICAL_EXTENSION: &str = ".js";

/// Anything that can answer "is this key present".
pub trait FileSet {
    fn contains_path(&self, path: &str) -> bool;
}

impl FileSet for Snapshot {
    fn contains_path(&self, path: &str) -> bool {
        self.contains(path)
    }
}

impl FileSet for BTreeSet<String> {
    fn contains_path(&self, path: &str) -> bool {
        self.contains(path)
    }
}

impl FileSet for [&str] {
    fn contains_path(&self, path: &str) -> bool {
        self.contains(&path)
    }
}

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolved {
    /// A registry key.
    Module(String),
    /// A name from the external table.
    External(String),
}

pub fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
}

/// Join a relative specifier against the directory of `from`.
/// `/`-prefixed specifiers are taken from the project root.
pub fn join(from: &str, specifier: &str) -> Option<String> {
    if specifier.starts_with('/') {
        return normalize_path(specifier);
    }
    let dir = parent_dir(from);
    if dir.is_empty() {
        normalize_path(specifier)
    } else {
        normalize_path(&format!("{dir}/{specifier}"))
    }
}

/// Every key `base` may name, in the order they are tried.
pub fn candidates(base: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(12);
    if !base.is_empty() {
        out.push(base.to_string());
        out.extend(SCRIPT_EXTENSIONS.iter().map(|ext| format!("{base}{ext}")));
        if let Some(stem) = base.strip_suffix(CANONICAL_EXTENSION) {
            out.extend(
                SOURCE_ONLY_EXTENSIONS
                    .iter()
                    .map(|ext| format!("{stem}{ext}")),
            );
        }
    }
    let dir = if base.is_empty() {
        String::new()
    } else {
        format!("{base}/")
    };
    out.extend(SCRIPT_EXTENSIONS.iter().map(|ext| format!("{dir}index{ext}")));
    out
}

/// First candidate of `base` present in `files`.
pub fn probe<F: FileSet + ?Sized>(base: &str, files: &F) -> Option<String> {
    candidates(base)
        .into_iter()
        .find(|candidate| files.contains_path(candidate))
}

/// Resolve `specifier` as imported by the module at `from`.
pub fn resolve<F: FileSet + ?Sized>(
    from: &str,
    specifier: &str,
    files: &F,
    externals: &ExternalTable,
) -> Result<Resolved, Fault> {
    if !is_relative(specifier) {
        return if externals.contains(specifier) {
            Ok(Resolved::External(specifier.to_string()))
        } else {
            Err(Fault::UnknownExternal {
                specifier: specifier.to_string(),
                from: from.to_string(),
            })
        };
    }

    let Some(base) = join(from, specifier) else {
        return Err(Fault::Resolution {
            specifier: specifier.to_string(),
            from: from.to_string(),
            attempted: "a path outside the project root".to_string(),
        });
    };

    probe(&base, files)
        .map(Resolved::Module)
        .ok_or_else(|| Fault::Resolution {
            specifier: specifier.to_string(),
            from: from.to_string(),
            attempted: if base.is_empty() {
                "the project root".to_string()
            } else {
                base
            },
        })
}
