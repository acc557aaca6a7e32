//! Source transform pass.
//!
//! Converts one project file into an executable CommonJS module body:
//! TypeScript syntax is erased, JSX is lowered to factory calls, ES module
//! syntax is lowered to `require`/`exports`, and relative specifiers with a
//! source-only extension are rewritten to the canonical `.js` extension.
//!
//! `transform` is a pure function of `(path, content, config)`. Syntax errors
//! become a [`Fault::Transform`] scoped to the one file.
//!
//! ```text
//!   path, content ──► FileKind ──┬─ Script ─────► tree-sitter ──► Emitter ──► TransformedModule
//!                                ├─ Stylesheet ─► style registration body
//!                                ├─ Markup ─────► verbatim
//!                                └─ Other ──────► string / JSON export
//! ```

mod emit;
mod jsx;
mod modules;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::Fault;
use crate::project::{FileKind, extension_of};

pub use modules::rewrite_specifier;

/// Fixed configuration of the transform (which JSX convention to target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_jsx_factory")]
    pub jsx_factory: String,
    #[serde(default = "default_jsx_fragment")]
    pub jsx_fragment: String,
}

fn default_jsx_factory() -> String {
    "React.createElement".to_string()
}

fn default_jsx_fragment() -> String {
    "React.Fragment".to_string()
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            jsx_factory: default_jsx_factory(),
            jsx_fragment: default_jsx_fragment(),
        }
    }
}

/// Statically known shape of a module's default export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "detail", rename_all = "lowercase")]
pub enum DefaultExport {
    /// A function, arrow function or class.
    Component,
    /// An identifier, call or member expression whose value is only known at run time.
    Binding,
    /// A literal value that can never be rendered (described for error messages).
    Value(String),
}

impl DefaultExport {
    pub fn is_renderable(&self) -> bool {
        !matches!(self, DefaultExport::Value(_))
    }
}

/// Names a module exports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub named: Vec<String>,
    pub default: Option<DefaultExport>,
    /// Specifiers re-exported wholesale with `export * from`.
    pub star_from: Vec<String>,
}

/// Result of transforming one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedModule {
    pub path: String,
    pub kind: FileKind,
    /// Executable text.
    pub code: String,
    /// Dependency specifiers in source order, after rewriting, deduplicated.
    pub dependencies: Vec<String>,
    pub exports: ExportSummary,
}

/// Transform one file.
pub fn transform(path: &str, content: &str, config: &TransformConfig) -> Result<TransformedModule, Fault> {
    let kind = FileKind::from_path(path);
    let (code, dependencies, exports) = match kind {
        FileKind::Script => {
            let lowered = emit::lower_script(path, content, config)?;
            (lowered.code, lowered.dependencies, lowered.exports)
        }
        FileKind::Stylesheet => (
            format!(
                "__stagehand_style({}, {});",
                json_string(path),
                json_string(content)
            ),
            Vec::new(),
            ExportSummary::default(),
        ),
        FileKind::Markup => (content.to_string(), Vec::new(), ExportSummary::default()),
        FileKind::Other => {
            let code = if extension_of(path) == Some("json") {
                format!("module.exports = JSON.parse({});", json_string(content))
            } else {
                format!("module.exports = {};", json_string(content))
            };
            (code, Vec::new(), ExportSummary::default())
        }
    };
    Ok(TransformedModule {
        path: path.to_string(),
        kind,
        code,
        dependencies,
        exports,
    })
}

/// Encode a string as a JavaScript (JSON) string literal.
pub(crate) fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

const CACHE_CAPACITY: usize = 512;

type CacheKey = [u8; 32];

/// Memoizes transform results by content digest.
///
/// Transforms are pure, so a hit is always valid; the cache is cleared
/// wholesale when it reaches capacity.
#[derive(Debug, Default)]
pub struct TransformCache {
    config: TransformConfig,
    entries: Mutex<HashMap<CacheKey, Result<Arc<TransformedModule>, Fault>>>,
}

impl TransformCache {
    pub fn new(config: TransformConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn transform(&self, path: &str, content: &str) -> Result<Arc<TransformedModule>, Fault> {
        let key = self.key(path, content);
        if let Some(hit) = self.lock().get(&key) {
            return hit.clone();
        }

        let result = transform(path, content, &self.config).map(Arc::new);
        let mut entries = self.lock();
        if entries.len() >= CACHE_CAPACITY {
            debug!(entries = entries.len(), "transform cache full, clearing");
            entries.clear();
        }
        entries.insert(key, result.clone());
        result
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn key(&self, path: &str, content: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        for part in [
            path,
            content,
            &self.config.jsx_factory,
            &self.config.jsx_fragment,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Result<Arc<TransformedModule>, Fault>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(path: &str, content: &str) -> TransformedModule {
        transform(path, content, &TransformConfig::default()).unwrap()
    }

    #[test]
    fn test_transform_is_pure() {
        let source = "import { useState } from 'react';\n\
                      interface Props { label: string }\n\
                      export default function Button({ label }: Props) {\n\
                        const [n, setN] = useState<number>(0);\n\
                        return <button onClick={() => setN(n + 1)}>{label} {n}</button>;\n\
                      }\n";
        let first = run("components/Button.tsx", source);
        let second = run("components/Button.tsx", source);
        assert_eq!(first, second);
    }

    #[test]
    fn test_stylesheet_registers_css() {
        let module = run("src/index.css", "body { margin: 0; }");
        assert_eq!(module.kind, FileKind::Stylesheet);
        assert!(module.code.starts_with("__stagehand_style(\"src/index.css\""));
        assert!(module.code.contains("body { margin: 0; }"));
        assert!(module.dependencies.is_empty());
    }

    #[test]
    fn test_markup_passes_through() {
        let html = "<div id=\"root\"></div>";
        assert_eq!(run("index.html", html).code, html);
    }

    #[test]
    fn test_json_module_parses_at_runtime() {
        let module = run("data/items.json", "[1, 2]");
        assert_eq!(module.code, "module.exports = JSON.parse(\"[1, 2]\");");
    }

    #[test]
    fn test_syntax_error_is_scoped_transform_fault() {
        let err = transform(
            "src/entry.tsx",
            "const x = 1;\nexport default () =>",
            &TransformConfig::default(),
        )
        .unwrap_err();
        match err {
            Fault::Transform { path, line, .. } => {
                assert_eq!(path, "src/entry.tsx");
                assert!(line >= 1);
            }
            other => panic!("Expected Transform fault, got {other:?}"),
        }
    }

    #[test]
    fn test_cache_returns_same_result() {
        let cache = TransformCache::new(TransformConfig::default());
        let a = cache.transform("a.ts", "export const a: number = 1;").unwrap();
        let b = cache.transform("a.ts", "export const a: number = 1;").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_keeps_faults() {
        let cache = TransformCache::new(TransformConfig::default());
        assert!(cache.transform("a.ts", "export const = ;").is_err());
        assert!(cache.transform("a.ts", "export const = ;").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_key_depends_on_path() {
        let cache = TransformCache::new(TransformConfig::default());
        cache.transform("a.ts", "export {};").unwrap();
        cache.transform("b.ts", "export {};").unwrap();
        assert_eq!(cache.len(), 2);
    }
}
