//! A running preview: loader, sandbox, fault channel and surface wired
//! together around boot requests from the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::errors::{Fault, FaultSignal};
use crate::events::{EventSender, PreviewEvent, publish};
use crate::loader::{LinkedProgram, Loader, RenderMode};
use crate::orchestrator::{BootTicket, BuildState};
use crate::project::ProjectKind;
use crate::registry::{Registry, Snapshot};
use crate::sandbox::shell::DEFAULT_MOUNT_ID;
use crate::sandbox::{BootReport, BootRequest, HostDocument, Sandbox};
use crate::surface::Surface;

const FAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kind: ProjectKind,
    /// Overrides the kind's entry designator.
    pub entry: Option<String>,
    pub mount_id: String,
    pub settle: Duration,
    /// Gateway scope the composed document resolves its assets against.
    pub scope: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kind: ProjectKind::default(),
            entry: None,
            mount_id: DEFAULT_MOUNT_ID.to_string(),
            settle: Duration::from_millis(250),
            scope: String::new(),
        }
    }
}

/// Result of one boot.
#[derive(Debug, Clone, Default)]
pub struct BootOutcome {
    pub version: u64,
    pub faults: Vec<Fault>,
    pub document: Option<String>,
    pub program: Option<LinkedProgram>,
    pub report: Option<BootReport>,
}

impl BootOutcome {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

pub struct PreviewSession {
    config: SessionConfig,
    loader: Loader,
    sandbox: Arc<dyn Sandbox>,
    events: EventSender,
    faults: broadcast::Sender<FaultSignal>,
    surface: watch::Sender<Surface>,
}

impl PreviewSession {
    pub fn new(config: SessionConfig, loader: Loader, sandbox: Arc<dyn Sandbox>, events: EventSender) -> Self {
        let (faults, _) = broadcast::channel(FAULT_CAPACITY);
        let (surface, _) = watch::channel(Surface::Empty);
        Self {
            config,
            loader,
            sandbox,
            events,
            faults,
            surface,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn entry(&self) -> &str {
        self.config
            .entry
            .as_deref()
            .unwrap_or_else(|| self.config.kind.entry())
    }

    /// The outbound fault channel.
    pub fn subscribe_faults(&self) -> broadcast::Receiver<FaultSignal> {
        self.faults.subscribe()
    }

    pub fn surface(&self) -> Surface {
        self.surface.borrow().clone()
    }

    pub fn subscribe_surface(&self) -> watch::Receiver<Surface> {
        self.surface.subscribe()
    }

    /// Boot a fresh sandbox for `snapshot`.
    ///
    /// Faults from every stage are emitted on the fault channel, each once,
    /// and the surface always ends up `Running` or `Faulted`.
    pub async fn boot(&self, snapshot: &Snapshot) -> BootOutcome {
        let version = snapshot.version();
        publish(&self.events, PreviewEvent::BootStarted { version });
        let mut outcome = BootOutcome {
            version,
            ..BootOutcome::default()
        };

        let mode = RenderMode::for_kind(self.config.kind);
        let host = HostDocument::from_snapshot(snapshot, &self.config.mount_id);
        if mode == RenderMode::Component
            && let Err(fault) = host.ensure_mount(&self.config.mount_id)
        {
            outcome.faults.push(fault);
            return self.finish(outcome);
        }

        let program = match self.loader.link(self.entry(), snapshot, mode) {
            Ok(program) => program,
            Err(failure) => {
                outcome.faults = failure.faults;
                return self.finish(outcome);
            }
        };

        let request = BootRequest {
            program: program.clone(),
            mount_id: self.config.mount_id.clone(),
            elements: host.elements(),
            settle: self.config.settle,
        };
        outcome.program = Some(program);
        let report = match self.sandbox.boot(request).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Sandbox failed");
                outcome
                    .faults
                    .push(Fault::runtime(format!("Sandbox failed: {e:#}")));
                return self.finish(outcome);
            }
        };
        for line in &report.logs {
            info!(target: "stagehand::console", console = %line.level, "{}", line.message);
        }

        outcome.faults = report.faults.clone();
        if outcome.faults.is_empty() {
            let base = format!("{}/", self.config.scope);
            let mount = match mode {
                RenderMode::Component => Some((
                    self.config.mount_id.as_str(),
                    report.mount_html.as_deref().unwrap_or_default(),
                )),
                RenderMode::SideEffects => None,
            };
            outcome.document = Some(host.compose(mount, &report.styles, Some(&base)));
        }
        outcome.report = Some(report);
        self.finish(outcome)
    }

    /// Show build progress while a plan streams.
    pub fn show_building(&self, state: BuildState, snapshot: &Snapshot) {
        let files = snapshot.paths().map(str::to_string).collect();
        self.surface.send_replace(Surface::Building { state, files });
    }

    /// Mirror in-flight and failed builds onto the surface until the
    /// orchestrator goes away. Settled builds are left to the next boot.
    pub async fn track_builds(&self, mut states: watch::Receiver<BuildState>, registry: Arc<Registry>) {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            if state.is_active() || matches!(state, BuildState::Faulted { .. }) {
                self.show_building(state, &registry.snapshot());
            }
        }
    }

    /// Boot for every ticket, skipping tickets superseded while booting.
    pub async fn run(&self, mut tickets: watch::Receiver<Option<BootTicket>>) {
        while tickets.changed().await.is_ok() {
            let ticket = tickets.borrow_and_update().clone();
            if let Some(ticket) = ticket {
                info!(
                    build_id = %ticket.build_id,
                    version = ticket.snapshot.version(),
                    reason = ?ticket.reason,
                    "Booting preview"
                );
                self.boot(&ticket.snapshot).await;
            }
        }
    }

    fn finish(&self, outcome: BootOutcome) -> BootOutcome {
        let mut signals = Vec::with_capacity(outcome.faults.len());
        for fault in &outcome.faults {
            let signal = fault.to_signal();
            warn!(kind = %signal.kind, path = ?signal.path, "{}", signal.message);
            // Nobody listening is fine; the surface still shows it.
            let _ = self.faults.send(signal.clone());
            publish(
                &self.events,
                PreviewEvent::Fault {
                    signal: signal.clone(),
                },
            );
            signals.push(signal);
        }

        let surface = match &outcome.document {
            Some(document) if signals.is_empty() => Surface::Running {
                version: outcome.version,
                document: document.clone(),
            },
            _ => Surface::Faulted {
                version: outcome.version,
                faults: signals,
            },
        };
        self.surface.send_replace(surface);

        info!(
            version = outcome.version,
            faults = outcome.faults.len(),
            "Boot finished"
        );
        publish(
            &self.events,
            PreviewEvent::BootFinished {
                version: outcome.version,
                rendered: outcome.document.is_some(),
                faults: outcome.faults.len(),
            },
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::loader::externals::ExternalTable;
    use crate::project::ProjectFile;
    use crate::sandbox::StyleSheet;
    use crate::transform::TransformCache;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records boot requests and answers with a canned report.
    #[derive(Default)]
    struct ScriptedSandbox {
        report: BootReport,
        requests: Mutex<Vec<BootRequest>>,
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        async fn boot(&self, request: BootRequest) -> anyhow::Result<BootReport> {
            self.requests.lock().unwrap().push(request);
            Ok(self.report.clone())
        }
    }

    struct FailingSandbox;

    #[async_trait]
    impl Sandbox for FailingSandbox {
        async fn boot(&self, _request: BootRequest) -> anyhow::Result<BootReport> {
            anyhow::bail!("spawn failed")
        }
    }

    fn session(kind: ProjectKind, sandbox: Arc<dyn Sandbox>) -> PreviewSession {
        let loader = Loader::new(Arc::new(TransformCache::default()), ExternalTable::default());
        let (tx, _) = events::channel();
        PreviewSession::new(
            SessionConfig {
                kind,
                scope: "/preview".into(),
                ..SessionConfig::default()
            },
            loader,
            sandbox,
            tx,
        )
    }

    fn snapshot(files: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_files(files.iter().map(|(p, c)| ProjectFile::new(*p, *c)))
    }

    fn rendered(html: &str) -> Arc<ScriptedSandbox> {
        Arc::new(ScriptedSandbox {
            report: BootReport {
                mount_html: Some(html.to_string()),
                ..BootReport::default()
            },
            ..ScriptedSandbox::default()
        })
    }

    #[tokio::test]
    async fn test_clean_boot_composes_document() {
        let sandbox = Arc::new(ScriptedSandbox {
            report: BootReport {
                mount_html: Some("<h1>Hello</h1>".into()),
                styles: vec![StyleSheet {
                    path: "index.css".into(),
                    css: "h1{color:red}".into(),
                }],
                ..BootReport::default()
            },
            ..ScriptedSandbox::default()
        });
        let session = session(ProjectKind::SingleFile, sandbox.clone());
        let outcome = session
            .boot(&snapshot(&[(
                "App.tsx",
                "import './index.css';\nexport default function App() { return <h1>Hello</h1>; }",
            ), ("index.css", "h1{color:red}")]))
            .await;

        assert!(outcome.is_clean());
        let document = outcome.document.unwrap();
        assert!(document.contains("<div id=\"root\"><h1>Hello</h1></div>"));
        assert!(document.contains("<base href=\"/preview/\" />"));
        assert!(document.contains("data-stagehand-path=\"index.css\""));
        assert_eq!(session.surface().status(), "running");

        let requests = sandbox.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].program.entry, "App.tsx");
        assert_eq!(requests[0].mount_id, "root");
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_entry_not_found() {
        let sandbox = rendered("");
        let session = session(ProjectKind::MultiFile, sandbox.clone());
        let mut faults = session.subscribe_faults();

        let registry = Registry::new();
        registry.replace_all(Vec::new());
        let outcome = session.boot(&registry.snapshot()).await;

        assert_eq!(
            outcome.faults,
            vec![Fault::EntryNotFound {
                entry: "src/App".into()
            }]
        );
        assert_eq!(faults.recv().await.unwrap().kind, crate::errors::FaultKind::Startup);
        assert!(faults.try_recv().is_err());
        assert!(sandbox.requests.lock().unwrap().is_empty());
        assert_eq!(session.surface().status(), "faulted");
    }

    #[tokio::test]
    async fn test_partial_stream_surfaces_fault_instead_of_crashing() {
        let session = session(ProjectKind::SingleFile, rendered("<p/>"));

        // The first chunk alone is valid code without a default export.
        let outcome = session.boot(&snapshot(&[("App.tsx", "const x = 1;")])).await;
        assert_eq!(
            outcome.faults,
            vec![Fault::MissingDefaultExport {
                entry: "App.tsx".into()
            }]
        );

        // A chunk boundary inside an expression is a transform fault.
        let outcome = session
            .boot(&snapshot(&[("App.tsx", "const x = 1; export default () =>")]))
            .await;
        assert_eq!(outcome.faults.len(), 1);
        assert_eq!(outcome.faults[0].kind(), crate::errors::FaultKind::Transform);

        let outcome = session
            .boot(&snapshot(&[("App.tsx", "const x = 1; export default () => x;")]))
            .await;
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn test_missing_mount_point_is_startup_fault() {
        let session = session(ProjectKind::SingleFile, rendered("<p/>"));
        let outcome = session
            .boot(&snapshot(&[
                ("index.html", "<html><body><div id=\"app\"></div></body></html>"),
                ("App.tsx", "export default () => null;"),
            ]))
            .await;
        assert_eq!(
            outcome.faults,
            vec![Fault::NoMountPoint {
                mount_id: "root".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_runtime_fault_leaves_unimported_module_alone() {
        let sandbox = Arc::new(ScriptedSandbox {
            report: BootReport {
                faults: vec![Fault::Runtime {
                    message: "Error: a failed".into(),
                    path: Some("a.ts".into()),
                }],
                ..BootReport::default()
            },
            ..ScriptedSandbox::default()
        });
        let session = session(ProjectKind::SingleFile, sandbox.clone());
        let mut faults = session.subscribe_faults();
        let files = snapshot(&[
            ("App.tsx", "import './a';\nexport default () => null;"),
            ("a.ts", "throw new Error('a failed');"),
            ("b.ts", "export const b = () => { throw new Error('never'); };"),
        ]);
        let outcome = session.boot(&files).await;

        let signal = faults.recv().await.unwrap();
        assert_eq!(signal.path.as_deref(), Some("a.ts"));
        assert_eq!(signal.message, "Error: a failed");
        assert!(faults.try_recv().is_err());

        let program = outcome.program.unwrap();
        assert!(program.module("a.ts").is_some());
        assert!(program.module("b.ts").is_none());
        assert_eq!(
            files.get("b.ts"),
            Some("export const b = () => { throw new Error('never'); };")
        );
    }

    #[tokio::test]
    async fn test_sandbox_error_becomes_runtime_fault() {
        let session = session(ProjectKind::SingleFile, Arc::new(FailingSandbox));
        let outcome = session
            .boot(&snapshot(&[("App.tsx", "export default () => null;")]))
            .await;
        assert_eq!(outcome.faults.len(), 1);
        assert!(outcome.faults[0].to_string().contains("spawn failed"));
    }

    #[tokio::test]
    async fn test_static_project_keeps_its_own_document() {
        let sandbox = rendered("");
        let session = session(ProjectKind::Static, sandbox.clone());
        let outcome = session
            .boot(&snapshot(&[
                (
                    "index.html",
                    "<html><head></head><body><button class=\"go\">Go</button>\
                     <script src=\"script.js\"></script></body></html>",
                ),
                ("style.css", "button { color: red; }"),
                ("script.js", "document.querySelector('.go').addEventListener('click', () => {});"),
            ]))
            .await;
        assert!(outcome.is_clean());
        let document = outcome.document.unwrap();
        assert!(document.contains("<script src=\"script.js\"></script>"));
        let requests = sandbox.requests.lock().unwrap();
        assert_eq!(requests[0].program.mode, RenderMode::SideEffects);
        assert_eq!(requests[0].elements[0].classes, vec!["go".to_string()]);
    }

    #[tokio::test]
    async fn test_run_boots_newest_ticket() {
        let sandbox = rendered("<p>ok</p>");
        let session = Arc::new(session(ProjectKind::SingleFile, sandbox.clone()));
        let (tx, rx) = watch::channel(None);
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run(rx).await })
        };
        let mut surface = session.subscribe_surface();

        tx.send_replace(Some(BootTicket {
            build_id: uuid::Uuid::new_v4(),
            reason: crate::orchestrator::BootReason::SnapshotLoaded,
            snapshot: snapshot(&[("App.tsx", "export default () => null;")]),
        }));
        surface
            .wait_for(|s| s.status() == "running")
            .await
            .unwrap();

        drop(tx);
        runner.await.unwrap();
        assert_eq!(sandbox.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_track_builds_shows_streaming_files() {
        let session = Arc::new(session(ProjectKind::SingleFile, rendered("")));
        let registry = Arc::new(Registry::new());
        let (tx, rx) = watch::channel(BuildState::Idle);
        let tracker = {
            let session = session.clone();
            let registry = registry.clone();
            tokio::spawn(async move { session.track_builds(rx, registry).await })
        };
        let mut surface = session.subscribe_surface();

        registry.upsert("App.tsx", "");
        tx.send_replace(BuildState::Streaming {
            build_id: uuid::Uuid::nil(),
            index: 0,
            path: "App.tsx".into(),
        });
        let shown = surface
            .wait_for(|s| s.status() == "building")
            .await
            .unwrap()
            .clone();
        assert!(matches!(shown, Surface::Building { ref files, .. } if files == &["App.tsx".to_string()]));

        drop(tx);
        tracker.await.unwrap();
    }
}
