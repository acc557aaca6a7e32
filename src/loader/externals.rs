//! Fixed lookup table for non-relative (external) module names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the sandbox satisfies an external import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum ExternalBinding {
    /// A shim bundled with the sandbox runtime prelude.
    Shim(String),
    /// A global installed by the host document (e.g. a CDN script).
    Global(String),
}

/// Specifiers the sandbox runtime ships shims for.
pub const BUILTIN_SHIMS: [&str; 5] = [
    "react",
    "react/jsx-runtime",
    "react-dom",
    "react-dom/client",
    "react-router-dom",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTable {
    entries: BTreeMap<String, ExternalBinding>,
}

impl Default for ExternalTable {
    fn default() -> Self {
        let entries = BUILTIN_SHIMS
            .iter()
            .map(|name| (name.to_string(), ExternalBinding::Shim(name.to_string())))
            .collect();
        Self { entries }
    }
}

impl ExternalTable {
    /// Builtin shims plus configured `specifier = "globalName"` pairs.
    /// Configured names override builtins.
    pub fn with_globals<I, K, V>(globals: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut table = Self::default();
        for (specifier, global) in globals {
            table
                .entries
                .insert(specifier.into(), ExternalBinding::Global(global.into()));
        }
        table
    }

    pub fn get(&self, specifier: &str) -> Option<&ExternalBinding> {
        self.entries.get(specifier)
    }

    pub fn contains(&self, specifier: &str) -> bool {
        self.entries.contains_key(specifier)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
