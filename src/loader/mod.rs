//! Module resolver and loader.
//!
//! One execution pass links the program reachable from an entry module:
//! every reachable file is transformed once, each of its dependency
//! specifiers is resolved once with [`resolve::resolve`], and the result is
//! a [`LinkedProgram`] whose per-module `specifier -> target` tables are the
//! only resolution information the sandbox runtime receives.
//!
//! The pass owns a fresh [`InstanceCache`]; nothing is shared between passes.

pub mod externals;
pub mod resolve;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::errors::Fault;
use crate::project::{FileKind, ProjectKind, normalize_path};
use crate::registry::Snapshot;
use crate::transform::{DefaultExport, TransformCache, TransformedModule, json_string};

use externals::{ExternalBinding, ExternalTable};
use resolve::{Resolved, probe};

/// How the entry module is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Render the entry's default export into the mount point.
    Component,
    /// Run the entry for its side effects only (static projects).
    SideEffects,
}

impl RenderMode {
    pub fn for_kind(kind: ProjectKind) -> Self {
        match kind {
            ProjectKind::Static => RenderMode::SideEffects,
            ProjectKind::SingleFile | ProjectKind::MultiFile => RenderMode::Component,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Loading,
    Ready,
    Failed,
}

/// Where one dependency specifier of a module points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Module(String),
    External(String),
}

#[derive(Debug, Clone)]
pub struct ModuleInstance {
    pub path: String,
    pub state: InstanceState,
    pub module: Option<Arc<TransformedModule>>,
    pub targets: BTreeMap<String, Target>,
}

/// Per-pass `path -> instance` cache.
#[derive(Debug, Default)]
pub struct InstanceCache {
    instances: HashMap<String, ModuleInstance>,
    order: Vec<String>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` as loading. Returns `false` if an instance already
    /// exists, in which case the caller must reuse it.
    pub fn begin(&mut self, path: &str) -> bool {
        if self.instances.contains_key(path) {
            return false;
        }
        self.instances.insert(
            path.to_string(),
            ModuleInstance {
                path: path.to_string(),
                state: InstanceState::Loading,
                module: None,
                targets: BTreeMap::new(),
            },
        );
        self.order.push(path.to_string());
        true
    }

    pub fn finish(
        &mut self,
        path: &str,
        state: InstanceState,
        module: Option<Arc<TransformedModule>>,
        targets: BTreeMap<String, Target>,
    ) {
        if let Some(instance) = self.instances.get_mut(path) {
            instance.state = state;
            instance.module = module;
            instance.targets = targets;
        }
    }

    pub fn get(&self, path: &str) -> Option<&ModuleInstance> {
        self.instances.get(path)
    }

    pub fn state(&self, path: &str) -> Option<InstanceState> {
        self.instances.get(path).map(|i| i.state)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances in the order they were first reached.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleInstance> {
        self.order.iter().filter_map(|p| self.instances.get(p))
    }
}

/// One module ready to be instantiated by the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedModule {
    pub path: String,
    pub kind: FileKind,
    pub code: String,
    pub targets: BTreeMap<String, Target>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedProgram {
    pub entry: String,
    pub mode: RenderMode,
    /// Modules in the order they were reached from the entry.
    pub modules: Vec<LinkedModule>,
    /// External bindings referenced by any module.
    pub externals: BTreeMap<String, ExternalBinding>,
}

impl LinkedProgram {
    pub fn module(&self, path: &str) -> Option<&LinkedModule> {
        self.modules.iter().find(|m| m.path == path)
    }
}

/// Every fault raised while linking one pass, each reported once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} fault(s) while linking: {}", .faults.len(), summarize(.faults))]
pub struct LinkFailure {
    pub faults: Vec<Fault>,
}

fn summarize(faults: &[Fault]) -> String {
    faults
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<Fault> for LinkFailure {
    fn from(fault: Fault) -> Self {
        Self {
            faults: vec![fault],
        }
    }
}

pub struct Loader {
    transforms: Arc<TransformCache>,
    externals: ExternalTable,
}

impl Loader {
    pub fn new(transforms: Arc<TransformCache>, externals: ExternalTable) -> Self {
        Self {
            transforms,
            externals,
        }
    }

    pub fn externals(&self) -> &ExternalTable {
        &self.externals
    }

    /// Resolve an entry designator with the same probing as imports.
    pub fn resolve_entry(&self, entry: &str, snapshot: &Snapshot) -> Result<String, Fault> {
        normalize_path(entry)
            .and_then(|base| probe(&base, snapshot))
            .ok_or_else(|| Fault::EntryNotFound {
                entry: entry.to_string(),
            })
    }

    /// Link the program reachable from `entry`.
    pub fn link(&self, entry: &str, snapshot: &Snapshot, mode: RenderMode) -> Result<LinkedProgram, LinkFailure> {
        let entry_path = self.resolve_entry(entry, snapshot)?;
        let mut cache = InstanceCache::new();
        let mut faults = Vec::new();
        self.visit(&entry_path, snapshot, &mut cache, &mut faults);

        if faults.is_empty()
            && mode == RenderMode::Component
            && let Some(fault) = check_entry_contract(&entry_path, &cache)
        {
            faults.push(fault);
        }

        if !faults.is_empty() {
            info!(entry = %entry_path, faults = faults.len(), "Link failed");
            return Err(LinkFailure { faults });
        }

        let mut externals = BTreeMap::new();
        let mut modules = Vec::with_capacity(cache.len());
        for instance in cache.iter() {
            let Some(module) = &instance.module else { continue };
            for target in instance.targets.values() {
                if let Target::External(name) = target
                    && let Some(binding) = self.externals.get(name)
                {
                    externals.insert(name.clone(), binding.clone());
                }
            }
            let code = match module.kind {
                FileKind::Markup => format!("module.exports = {};", json_string(&module.code)),
                _ => module.code.clone(),
            };
            modules.push(LinkedModule {
                path: instance.path.clone(),
                kind: module.kind,
                code,
                targets: instance.targets.clone(),
            });
        }

        debug!(entry = %entry_path, modules = modules.len(), "Linked program");
        Ok(LinkedProgram {
            entry: entry_path,
            mode,
            modules,
            externals,
        })
    }

    fn visit(&self, path: &str, snapshot: &Snapshot, cache: &mut InstanceCache, faults: &mut Vec<Fault>) {
        if !cache.begin(path) {
            // Loading (a cycle) or already done: reuse the instance.
            return;
        }
        let content = snapshot.get(path).unwrap_or_default();
        let module = match self.transforms.transform(path, content) {
            Ok(module) => module,
            Err(fault) => {
                faults.push(fault);
                cache.finish(path, InstanceState::Failed, None, BTreeMap::new());
                return;
            }
        };

        let mut targets = BTreeMap::new();
        let mut failed = false;
        for specifier in &module.dependencies {
            match resolve::resolve(path, specifier, snapshot, &self.externals) {
                Ok(Resolved::Module(dependency)) => {
                    targets.insert(specifier.clone(), Target::Module(dependency.clone()));
                    self.visit(&dependency, snapshot, cache, faults);
                }
                Ok(Resolved::External(name)) => {
                    targets.insert(specifier.clone(), Target::External(name));
                }
                Err(fault) => {
                    failed = true;
                    faults.push(fault);
                }
            }
        }
        let state = if failed {
            InstanceState::Failed
        } else {
            InstanceState::Ready
        };
        cache.finish(path, state, Some(module), targets);
    }
}

/// The entry of a component program must default-export something renderable.
fn check_entry_contract(entry: &str, cache: &InstanceCache) -> Option<Fault> {
    let module = cache.get(entry)?.module.as_ref()?;
    if module.kind != FileKind::Script {
        return Some(Fault::InvalidDefaultExport {
            entry: entry.to_string(),
            found: format!("a {:?} file", module.kind).to_lowercase(),
        });
    }
    match &module.exports.default {
        None => Some(Fault::MissingDefaultExport {
            entry: entry.to_string(),
        }),
        Some(DefaultExport::Value(found)) => Some(Fault::InvalidDefaultExport {
            entry: entry.to_string(),
            found: found.clone(),
        }),
        Some(DefaultExport::Component | DefaultExport::Binding) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectFile;
    use crate::transform::TransformConfig;

    fn loader() -> Loader {
        Loader::new(
            Arc::new(TransformCache::new(TransformConfig::default())),
            ExternalTable::default(),
        )
    }

    fn snapshot(files: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_files(files.iter().map(|(p, c)| ProjectFile::new(*p, *c)))
    }

    #[test]
    fn test_links_reachable_modules_in_order() {
        let snap = snapshot(&[
            (
                "src/App.tsx",
                "import { greet } from './lib/util';\nimport './index.css';\nexport default function App() { return <h1>{greet()}</h1>; }\n",
            ),
            ("src/lib/util.ts", "export const greet = (): string => 'hi';\n"),
            ("src/index.css", "h1 { color: red; }"),
            ("src/unused.ts", "export const broken = ;"),
        ]);
        let program = loader().link("src/App", &snap, RenderMode::Component).unwrap();
        let paths: Vec<_> = program.modules.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["src/App.tsx", "src/lib/util.ts", "src/index.css"]);
        assert_eq!(
            program.module("src/App.tsx").unwrap().targets["./lib/util"],
            Target::Module("src/lib/util.ts".into())
        );
    }

    #[test]
    fn test_unsupported_extension_names_specifier() {
        let snap = snapshot(&[
            (
                "src/App.tsx",
                "import { greet } from './lib/util.json';\nexport default () => greet();\n",
            ),
            ("src/lib/util.ts", "export const greet = () => 'hi';\n"),
        ]);
        let failure = loader().link("src/App", &snap, RenderMode::Component).unwrap_err();
        assert_eq!(failure.faults.len(), 1);
        match &failure.faults[0] {
            Fault::Resolution { specifier, .. } => assert_eq!(specifier, "./lib/util.json"),
            other => panic!("Expected Resolution fault, got {other:?}"),
        }
    }

    #[test]
    fn test_circular_imports_link_once() {
        let snap = snapshot(&[
            ("App.tsx", "import { b } from './b';\nexport const a = 1;\nexport default () => b;\n"),
            ("b.ts", "import { a } from './App';\nexport const b = () => a;\n"),
        ]);
        let program = loader().link("App", &snap, RenderMode::Component).unwrap();
        assert_eq!(program.modules.len(), 2);
        assert_eq!(
            program.module("b.ts").unwrap().targets["./App"],
            Target::Module("App.tsx".into())
        );
    }

    #[test]
    fn test_empty_snapshot_is_entry_not_found() {
        let failure = loader()
            .link("src/App", &Snapshot::default(), RenderMode::Component)
            .unwrap_err();
        assert_eq!(
            failure.faults,
            vec![Fault::EntryNotFound {
                entry: "src/App".into()
            }]
        );
    }

    #[test]
    fn test_missing_default_export_is_startup_fault() {
        let snap = snapshot(&[("App.tsx", "export const App = () => null;\n")]);
        let failure = loader().link("App", &snap, RenderMode::Component).unwrap_err();
        assert_eq!(
            failure.faults,
            vec![Fault::MissingDefaultExport {
                entry: "App.tsx".into()
            }]
        );
    }

    #[test]
    fn test_literal_default_export_is_invalid() {
        let snap = snapshot(&[("App.ts", "export default 'hello';\n")]);
        let failure = loader().link("App", &snap, RenderMode::Component).unwrap_err();
        assert!(matches!(
            &failure.faults[0],
            Fault::InvalidDefaultExport { found, .. } if found == "a string"
        ));
    }

    #[test]
    fn test_side_effect_entry_needs_no_default() {
        let snap = snapshot(&[("script.js", "document.title = 'x';\n")]);
        let program = loader().link("script.js", &snap, RenderMode::SideEffects).unwrap();
        assert_eq!(program.entry, "script.js");
    }

    #[test]
    fn test_transform_fault_in_unreachable_file_is_contained() {
        let snap = snapshot(&[
            ("src/App.tsx", "import B from './B';\nexport default B;\n"),
            ("src/B.tsx", "export default function B() { return <p>b</p>; }\n"),
            ("src/A.tsx", "export default function A( { return 1 }\n"),
        ]);
        let program = loader().link("src/App", &snap, RenderMode::Component).unwrap();
        assert!(program.module("src/B.tsx").is_some());
        assert!(program.module("src/A.tsx").is_none());
    }

    #[test]
    fn test_all_faults_collected_once() {
        let snap = snapshot(&[
            (
                "App.tsx",
                "import './a';\nimport './b';\nimport './a';\nimport 'left-pad';\nexport default () => null;\n",
            ),
            ("a.ts", "export const = 1;"),
            ("b.ts", "import './a';\n"),
        ]);
        let failure = loader().link("App", &snap, RenderMode::Component).unwrap_err();
        let transform_faults = failure
            .faults
            .iter()
            .filter(|f| matches!(f, Fault::Transform { .. }))
            .count();
        assert_eq!(transform_faults, 1);
        assert!(failure
            .faults
            .iter()
            .any(|f| matches!(f, Fault::UnknownExternal { specifier, .. } if specifier == "left-pad")));
    }

    #[test]
    fn test_externals_collected_and_markup_wrapped() {
        let snap = snapshot(&[
            (
                "App.jsx",
                "import React from 'react';\nimport tpl from './tpl.html';\nexport default () => tpl;\n",
            ),
            ("tpl.html", "<b>hi</b>"),
        ]);
        let program = loader().link("App", &snap, RenderMode::Component).unwrap();
        assert!(program.externals.contains_key("react"));
        assert_eq!(
            program.module("tpl.html").unwrap().code,
            "module.exports = \"<b>hi</b>\";"
        );
    }

    #[test]
    fn test_instance_cache_reuses_instances() {
        let mut cache = InstanceCache::new();
        assert!(cache.begin("a.ts"));
        assert_eq!(cache.state("a.ts"), Some(InstanceState::Loading));
        assert!(!cache.begin("a.ts"));
        cache.finish("a.ts", InstanceState::Ready, None, BTreeMap::new());
        assert_eq!(cache.state("a.ts"), Some(InstanceState::Ready));
        assert_eq!(cache.len(), 1);
    }
}
