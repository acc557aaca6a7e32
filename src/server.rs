//! Host HTTP server: the preview surface, a status endpoint and a
//! WebSocket feed of [`PreviewEvent`]s, merged with the gateway router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::header,
    response::{Html, IntoResponse},
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::events::{EventSender, PreviewEvent};
use crate::gateway::{GatewayServer, gateway_router};
use crate::orchestrator::BuildState;
use crate::registry::Registry;
use crate::session::PreviewSession;

pub const EVENTS_PATH: &str = "/__stagehand/events";
pub const STATUS_PATH: &str = "/__stagehand/status";

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a separately served dev frontend.
    pub dev_mode: bool,
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4173,
            dev_mode: false,
            open_browser: false,
        }
    }
}

/// Shared state of the host routes.
pub struct HostState {
    pub session: Arc<PreviewSession>,
    pub registry: Arc<Registry>,
    pub build_state: watch::Receiver<BuildState>,
    pub events: EventSender,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub boot_version: Option<u64>,
    pub registry_version: u64,
    pub files: usize,
    pub build: BuildState,
}

/// Host routes plus the gateway; the gateway owns the fallback.
pub fn build_router(state: Arc<HostState>, gateway: Arc<GatewayServer>) -> Router {
    Router::new()
        .route("/", get(surface_handler))
        .route(STATUS_PATH, get(status_handler))
        .route(EVENTS_PATH, get(events_handler))
        .with_state(state)
        .merge(gateway_router(gateway))
}

async fn surface_handler(State(state): State<Arc<HostState>>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(state.session.surface().render()),
    )
}

async fn status_handler(State(state): State<Arc<HostState>>) -> Json<StatusResponse> {
    let surface = state.session.surface();
    let snapshot = state.registry.snapshot();
    Json(StatusResponse {
        status: surface.status(),
        boot_version: surface.version(),
        registry_version: snapshot.version(),
        files: snapshot.len(),
        build: state.build_state.borrow().clone(),
    })
}

async fn events_handler(ws: WebSocketUpgrade, State(state): State<Arc<HostState>>) -> impl IntoResponse {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<PreviewEvent>) {
    debug!("Event socket connected");
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx).await;
    debug!("Event socket closed");
}

/// Forward events to one client, pinging it periodically and dropping it
/// once a pong is overdue.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<PreviewEvent>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("Event socket missed pong");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize preview event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event socket lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, app: Router) -> Result<()> {
    let app = if config.dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;
    let url = format!("http://{}", local_addr);
    info!(url = %url, "Preview server listening");
    println!("Preview running at {}", url);

    if config.open_browser
        && let Err(e) = open::that(&url)
    {
        warn!(error = %e, "Failed to open browser");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Preview server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::gateway::spawn_gateway;
    use crate::loader::Loader;
    use crate::loader::externals::ExternalTable;
    use crate::project::{ProjectFile, ProjectKind};
    use crate::registry::Snapshot;
    use crate::sandbox::{BootReport, BootRequest, Sandbox};
    use crate::session::SessionConfig;
    use crate::transform::TransformCache;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct StaticSandbox;

    #[async_trait]
    impl Sandbox for StaticSandbox {
        async fn boot(&self, _request: BootRequest) -> anyhow::Result<BootReport> {
            Ok(BootReport {
                mount_html: Some("<h1>Hi</h1>".into()),
                ..BootReport::default()
            })
        }
    }

    struct Fixture {
        app: Router,
        session: Arc<PreviewSession>,
        registry: Arc<Registry>,
    }

    async fn fixture(files: &[(&str, &str)]) -> Fixture {
        let transforms = Arc::new(TransformCache::default());
        let (events, _) = events::channel();
        let registry = Arc::new(Registry::new());
        let (handle, mut view, _task) = spawn_gateway("/preview", transforms.clone());
        if !files.is_empty() {
            registry.replace_all(files.iter().map(|(p, c)| ProjectFile::new(*p, *c)));
            let snapshot: Snapshot = registry.snapshot();
            let version = snapshot.version();
            handle.replace_files(snapshot).await.unwrap();
            assert!(view.wait_for_version(version).await);
        }
        let session = Arc::new(PreviewSession::new(
            SessionConfig {
                kind: ProjectKind::SingleFile,
                scope: "/preview".into(),
                ..SessionConfig::default()
            },
            Loader::new(transforms, ExternalTable::default()),
            Arc::new(StaticSandbox),
            events.clone(),
        ));
        let (_state_tx, build_state) = watch::channel(BuildState::Idle);
        let state = Arc::new(HostState {
            session: session.clone(),
            registry: registry.clone(),
            build_state,
            events,
        });
        let gateway = Arc::new(GatewayServer::new(view, None).unwrap());
        Fixture {
            app: build_router(state, gateway),
            session,
            registry,
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_surface_before_first_boot() {
        let fixture = fixture(&[]).await;
        let (status, body) = get(fixture.app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Waiting for files"));
    }

    #[tokio::test]
    async fn test_surface_after_boot_shows_document() {
        let fixture = fixture(&[("App.tsx", "export default () => <h1>Hi</h1>;")]).await;
        let outcome = fixture.session.boot(&fixture.registry.snapshot()).await;
        assert!(outcome.is_clean());

        let (status, body) = get(fixture.app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<div id=\"root\"><h1>Hi</h1></div>"));
        assert!(body.contains("data-stagehand-reload"));
    }

    #[tokio::test]
    async fn test_status_reports_surface_and_build() {
        let fixture = fixture(&[("App.tsx", "export default 1;")]).await;
        fixture.session.boot(&fixture.registry.snapshot()).await;

        let (status, body) = get(fixture.app, STATUS_PATH).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "faulted");
        assert_eq!(json["files"], 1);
        assert_eq!(json["build"]["state"], "idle");
        assert_eq!(json["boot_version"], json["registry_version"]);
    }

    #[tokio::test]
    async fn test_gateway_routes_are_merged() {
        let fixture = fixture(&[("style.css", "p{}")]).await;
        let (status, body) = get(fixture.app.clone(), "/preview/style.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "p{}");

        // Outside the scope with no upstream configured.
        let (status, _) = get(fixture.app, "/favicon.ico").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_events_route_requires_upgrade() {
        let fixture = fixture(&[]).await;
        let (status, _) = get(fixture.app, EVENTS_PATH).await;
        assert!(status.is_client_error());
    }
}
