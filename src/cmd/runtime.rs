//! Wiring shared by the commands that run a preview.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use stagehand::config::Config;
use stagehand::events::{self, EventSender};
use stagehand::gateway::{GatewayServer, GatewayView, normalize_scope, spawn_gateway};
use stagehand::loader::Loader;
use stagehand::loader::externals::ExternalTable;
use stagehand::orchestrator::{Orchestrator, OrchestratorCommand};
use stagehand::project::ProjectKind;
use stagehand::registry::Registry;
use stagehand::sandbox::NodeSandbox;
use stagehand::server::{self, HostState, ServerConfig};
use stagehand::session::{PreviewSession, SessionConfig};
use stagehand::transform::TransformCache;

const COMMAND_BUFFER: usize = 8;

/// Registry, gateway, orchestrator and session for one project.
pub struct Runtime {
    pub registry: Arc<Registry>,
    pub events: EventSender,
    pub orchestrator: Arc<Orchestrator>,
    pub session: Arc<PreviewSession>,
    gateway_view: GatewayView,
    upstream: Option<String>,
    sandbox: NodeSandbox,
}

impl Runtime {
    /// Entry precedence: `entry` argument, then `[project] entry`, then the
    /// kind's designator.
    pub fn new(config: &Config, kind: ProjectKind, entry: Option<String>) -> Result<Self> {
        let toml = &config.toml;
        let transforms = Arc::new(TransformCache::new(toml.transform.clone()));
        let loader = Loader::new(
            transforms.clone(),
            ExternalTable::with_globals(toml.externals.clone()),
        );

        let mut sandbox = NodeSandbox::new(toml.sandbox.command.clone())
            .with_args(toml.sandbox.args.clone())
            .with_timeout(toml.sandbox.timeout());
        for (key, value) in &toml.sandbox.env {
            sandbox = sandbox.with_env(key, value);
        }

        let (events, _) = events::channel();
        let registry = Arc::new(Registry::new());
        let scope = normalize_scope(&toml.gateway.scope);
        let (gateway, gateway_view, _gateway_task) = spawn_gateway(scope.clone(), transforms);
        let orchestrator = Arc::new(
            Orchestrator::new(registry.clone(), gateway, events.clone())
                .with_policy(toml.build.boot_on),
        );
        let session = Arc::new(PreviewSession::new(
            SessionConfig {
                kind,
                entry: entry.or_else(|| toml.project.entry.clone()),
                mount_id: toml.sandbox.mount_id.clone(),
                settle: toml.sandbox.settle(),
                scope,
            },
            loader,
            Arc::new(sandbox.clone()),
            events.clone(),
        ));

        Ok(Self {
            registry,
            events,
            orchestrator,
            session,
            gateway_view,
            upstream: toml.gateway.upstream.clone(),
            sandbox,
        })
    }

    /// Warn early when the JavaScript runtime cannot be started; every boot
    /// would otherwise fault the same way.
    pub async fn check_sandbox(&self) {
        if !self.sandbox.is_available().await {
            warn!(
                command = %self.sandbox.command(),
                "Sandbox runtime not found; boots will fault (set [sandbox] command or STAGEHAND_NODE)"
            );
        }
    }

    /// Boot on every request and mirror build progress onto the surface.
    pub fn spawn_session(&self) -> Vec<JoinHandle<()>> {
        let booter = {
            let session = self.session.clone();
            let tickets = self.orchestrator.boot_requests();
            tokio::spawn(async move { session.run(tickets).await })
        };
        let tracker = {
            let session = self.session.clone();
            let states = self.orchestrator.subscribe_state();
            let registry = self.registry.clone();
            tokio::spawn(async move { session.track_builds(states, registry).await })
        };
        vec![booter, tracker]
    }

    pub fn spawn_orchestrator(&self) -> (mpsc::Sender<OrchestratorCommand>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let orchestrator = self.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.run(rx).await });
        (tx, task)
    }

    pub fn router(&self) -> Result<Router> {
        let gateway = Arc::new(GatewayServer::new(
            self.gateway_view.clone(),
            self.upstream.clone(),
        )?);
        let state = Arc::new(HostState {
            session: self.session.clone(),
            registry: self.registry.clone(),
            build_state: self.orchestrator.subscribe_state(),
            events: self.events.clone(),
        });
        Ok(server::build_router(state, gateway))
    }
}

pub fn server_config(config: &Config, port: Option<u16>, open: bool, dev: bool) -> ServerConfig {
    ServerConfig {
        host: config.toml.gateway.host.clone(),
        port: port.unwrap_or(config.toml.gateway.port),
        dev_mode: dev,
        open_browser: open,
    }
}
