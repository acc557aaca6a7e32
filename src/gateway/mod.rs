//! Request-interception gateway.
//!
//! The gateway keeps its own copy of the project files, updated only by
//! [`GatewayCommand::ReplaceFiles`] messages sent through a
//! [`GatewayHandle`]. A single actor task owns the copy; request handlers
//! read it through a [`GatewayView`]. Request paths are probed with the
//! loader's own candidate list, so the gateway and the loader always pick
//! the same registry key.

pub mod server;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::loader::resolve::probe;
use crate::project::{ContentType, FileKind, normalize_path};
use crate::registry::Snapshot;
use crate::sandbox::shell::HOST_DOCUMENT_PATH;
use crate::transform::{TransformCache, json_string};

pub use server::{GatewayServer, gateway_router};

const COMMAND_BUFFER: usize = 64;

/// The one message the gateway understands.
#[derive(Debug, Clone)]
pub enum GatewayCommand {
    ReplaceFiles(Snapshot),
}

/// Sending half of the gateway channel.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<GatewayCommand>,
}

impl GatewayHandle {
    /// Push a new copy of the files. Waits only for channel capacity.
    pub async fn replace_files(&self, snapshot: Snapshot) -> Result<(), OrchestratorError> {
        self.tx
            .send(GatewayCommand::ReplaceFiles(snapshot))
            .await
            .map_err(|_| OrchestratorError::GatewayClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side of the gateway's copy of the files.
#[derive(Debug, Clone)]
pub struct GatewayView {
    files: watch::Receiver<Option<Snapshot>>,
    transforms: Arc<TransformCache>,
    scope: String,
}

impl GatewayView {
    /// Files received so far; `None` before the first update.
    pub fn files(&self) -> Option<Snapshot> {
        self.files.borrow().clone()
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn intercept(&self, request_path: &str) -> Interception {
        let files = self.files();
        intercept(files.as_ref(), request_path, &self.scope, &self.transforms)
    }

    /// Wait until the gateway holds a copy at least as new as `version`.
    pub async fn wait_for_version(&mut self, version: u64) -> bool {
        self.files
            .wait_for(|files| files.as_ref().is_some_and(|s| s.version() >= version))
            .await
            .is_ok()
    }
}

/// Spawn the gateway actor.
pub fn spawn_gateway(
    scope: impl Into<String>,
    transforms: Arc<TransformCache>,
) -> (GatewayHandle, GatewayView, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
    let (files_tx, files_rx) = watch::channel(None);

    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                GatewayCommand::ReplaceFiles(snapshot) => {
                    debug!(
                        version = snapshot.version(),
                        files = snapshot.len(),
                        "Gateway files replaced"
                    );
                    files_tx.send_replace(Some(snapshot));
                }
            }
        }
        info!("Gateway channel closed");
    });

    let view = GatewayView {
        files: files_rx,
        transforms,
        scope: normalize_scope(&scope.into()),
    };
    (GatewayHandle { tx }, view, task)
}

/// Scope prefix in canonical form: `""` for the root, else `/a/b`.
pub fn normalize_scope(scope: &str) -> String {
    match normalize_path(scope) {
        Some(path) if !path.is_empty() => format!("/{path}"),
        _ => String::new(),
    }
}

/// Outcome of intercepting one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Interception {
    Serve {
        /// Registry key that answered the request.
        resolved: String,
        content_type: ContentType,
        content: String,
    },
    /// Nothing has been published yet.
    NotFound,
    /// Not a project file: let the request reach the real network.
    PassThrough,
}

/// Answer a read of `request_path` from `files`.
///
/// Only paths under `scope` are project-scoped. The path is normalized and
/// probed exactly like a relative import; the scope root serves the host
/// document. Script kinds are served transformed, a transform fault is
/// served as a script that throws it.
pub fn intercept(
    files: Option<&Snapshot>,
    request_path: &str,
    scope: &str,
    transforms: &TransformCache,
) -> Interception {
    let path = request_path
        .split(['?', '#'])
        .next()
        .unwrap_or(request_path);
    let Some(relative) = strip_scope(path, scope) else {
        return Interception::PassThrough;
    };
    let Some(normalized) = normalize_path(relative) else {
        return Interception::PassThrough;
    };
    let Some(files) = files else {
        return Interception::NotFound;
    };

    let resolved = if normalized.is_empty() && files.contains(HOST_DOCUMENT_PATH) {
        Some(HOST_DOCUMENT_PATH.to_string())
    } else {
        probe(&normalized, files)
    };
    let Some(resolved) = resolved else {
        return Interception::PassThrough;
    };
    let source = files.get(&resolved).unwrap_or_default();

    let kind = FileKind::from_path(&resolved);
    let content = match kind {
        FileKind::Script | FileKind::Other => match transforms.transform(&resolved, source) {
            Ok(module) => module.code.clone(),
            Err(fault) => format!("throw new Error({});\n", json_string(&fault.to_string())),
        },
        FileKind::Stylesheet | FileKind::Markup => source.to_string(),
    };

    Interception::Serve {
        resolved,
        content_type: kind.content_type(),
        content,
    }
}

fn strip_scope<'a>(path: &'a str, scope: &str) -> Option<&'a str> {
    if scope.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(scope)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::externals::ExternalTable;
    use crate::loader::resolve::{Resolved, resolve};
    use crate::project::ProjectFile;

    fn snapshot(files: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_files(files.iter().map(|(p, c)| ProjectFile::new(*p, *c)))
    }

    fn served(outcome: Interception) -> (String, ContentType, String) {
        match outcome {
            Interception::Serve {
                resolved,
                content_type,
                content,
            } => (resolved, content_type, content),
            other => panic!("expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn test_extensionless_request_probes_extensions() {
        let files = snapshot(&[(
            "components/Button.tsx",
            "export default function Button() { return null; }",
        )]);
        let cache = TransformCache::default();
        let (resolved, content_type, content) =
            served(intercept(Some(&files), "/preview/components/Button", "/preview", &cache));
        assert_eq!(resolved, "components/Button.tsx");
        assert_eq!(content_type, ContentType::Script);
        assert!(content.contains("exports"));
    }

    #[test]
    fn test_cold_start_is_not_found() {
        let cache = TransformCache::default();
        assert_eq!(
            intercept(None, "/preview/App", "/preview", &cache),
            Interception::NotFound
        );
    }

    #[test]
    fn test_outside_scope_and_unknown_paths_pass_through() {
        let files = snapshot(&[("App.tsx", "export default () => null;")]);
        let cache = TransformCache::default();
        assert_eq!(
            intercept(Some(&files), "/fonts/inter.woff2", "/preview", &cache),
            Interception::PassThrough
        );
        assert_eq!(
            intercept(Some(&files), "/previewer/App", "/preview", &cache),
            Interception::PassThrough
        );
        assert_eq!(
            intercept(Some(&files), "/preview/vendor/lib.js", "/preview", &cache),
            Interception::PassThrough
        );
        assert_eq!(
            intercept(Some(&files), "/preview/../etc/passwd", "/preview", &cache),
            Interception::PassThrough
        );
    }

    #[test]
    fn test_content_types_follow_file_kind() {
        let files = snapshot(&[
            ("index.html", "<div id=\"root\"></div>"),
            ("style.css", "body { margin: 0 }"),
            ("script.js", "console.log('hi');"),
        ]);
        let cache = TransformCache::default();
        let (_, ty, content) = served(intercept(Some(&files), "/style.css?v=2", "", &cache));
        assert_eq!(ty, ContentType::Stylesheet);
        assert_eq!(content, "body { margin: 0 }");
        let (resolved, ty, _) = served(intercept(Some(&files), "/", "", &cache));
        assert_eq!(resolved, "index.html");
        assert_eq!(ty, ContentType::Markup);
        let (_, ty, _) = served(intercept(Some(&files), "/script.js", "", &cache));
        assert_eq!(ty, ContentType::Script);
    }

    #[test]
    fn test_transform_fault_is_served_as_throwing_script() {
        let files = snapshot(&[("App.tsx", "export default () => <div>;")]);
        let cache = TransformCache::default();
        let (_, ty, content) = served(intercept(Some(&files), "/App.tsx", "", &cache));
        assert_eq!(ty, ContentType::Script);
        assert!(content.starts_with("throw new Error(\"Transform fault in App.tsx"));
    }

    #[test]
    fn test_gateway_and_loader_agree() {
        let files = snapshot(&[
            ("App.tsx", ""),
            ("components/Button.tsx", ""),
            ("components/index.ts", ""),
            ("lib/util.ts", ""),
            ("lib/util.js", ""),
            ("data/config.json", ""),
            ("hooks/useThing.jsx", ""),
        ]);
        let cache = TransformCache::default();
        let externals = ExternalTable::default();
        for spec in [
            "components/Button",
            "components/Button.js",
            "components",
            "lib/util",
            "lib/util.js",
            "data/config.json",
            "hooks/useThing.js",
            "missing/thing",
        ] {
            let loader = resolve("App.tsx", &format!("./{spec}"), &files, &externals).ok();
            let gateway = match intercept(Some(&files), &format!("/{spec}"), "", &cache) {
                Interception::Serve { resolved, .. } => Some(Resolved::Module(resolved)),
                _ => None,
            };
            assert_eq!(loader, gateway, "disagreement on {spec}");
        }
    }

    #[tokio::test]
    async fn test_actor_applies_replace_files() {
        let (handle, mut view, _task) = spawn_gateway("/preview/", Arc::new(TransformCache::default()));
        assert_eq!(view.scope(), "/preview");
        assert_eq!(view.intercept("/preview/App"), Interception::NotFound);

        handle
            .replace_files(snapshot(&[("App.tsx", "export default () => null;")]))
            .await
            .unwrap();
        assert!(view.wait_for_version(0).await);
        assert!(matches!(
            view.intercept("/preview/App"),
            Interception::Serve { .. }
        ));
    }

    #[test]
    fn test_normalize_scope() {
        assert_eq!(normalize_scope("/"), "");
        assert_eq!(normalize_scope(""), "");
        assert_eq!(normalize_scope("preview/"), "/preview");
        assert_eq!(normalize_scope("/a//b"), "/a/b");
    }
}
