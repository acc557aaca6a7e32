//! HTTP surface of the gateway.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{OriginalUri, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use super::{GatewayView, Interception};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves intercepted reads and forwards everything else upstream.
pub struct GatewayServer {
    view: GatewayView,
    client: reqwest::Client,
    upstream: Option<String>,
}

impl GatewayServer {
    pub fn new(view: GatewayView, upstream: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .context("Failed to build upstream HTTP client")?;
        Ok(Self {
            view,
            client,
            upstream: upstream.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    pub fn view(&self) -> &GatewayView {
        &self.view
    }

    async fn pass_through(&self, uri: &Uri) -> Response {
        let Some(upstream) = &self.upstream else {
            return (StatusCode::NOT_FOUND, "Not found").into_response();
        };
        let target = format!(
            "{}{}",
            upstream,
            uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        );
        debug!(target = %target, "Gateway pass-through");

        let response = match self.client.get(&target).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(target = %target, error = %e, "Upstream request failed");
                return (StatusCode::BAD_GATEWAY, format!("Upstream request failed: {e}"))
                    .into_response();
            }
        };

        let status =
            StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target = %target, error = %e, "Upstream body failed");
                return (StatusCode::BAD_GATEWAY, format!("Upstream body failed: {e}"))
                    .into_response();
            }
        };
        if !status.is_success() {
            warn!(target = %target, status = status.as_u16(), "Upstream returned an error");
        }

        let mut builder = Response::builder().status(status);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder
            .body(Body::from(bytes.to_vec()))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
    }
}

/// Router answering `{scope}/{*path}`; all other paths fall through upstream.
pub fn gateway_router(server: Arc<GatewayServer>) -> Router {
    let scope = server.view.scope().to_string();
    let router = if scope.is_empty() {
        Router::new().route("/{*path}", get(handle))
    } else {
        Router::new()
            .route(&scope, get(handle))
            .route(&format!("{scope}/"), get(handle))
            .route(&format!("{scope}/{{*path}}"), get(handle))
    };
    router.fallback(handle).with_state(server)
}

async fn handle(State(server): State<Arc<GatewayServer>>, OriginalUri(uri): OriginalUri) -> Response {
    // Registry keys are plain text; a path that is not valid UTF-8 once
    // decoded cannot name one and is matched as sent.
    let path = percent_decode_str(uri.path())
        .decode_utf8()
        .unwrap_or_else(|_| uri.path().into());
    match server.view.intercept(&path) {
        Interception::Serve {
            content_type,
            content,
            ..
        } => (
            [
                (header::CONTENT_TYPE, content_type.mime()),
                (header::CACHE_CONTROL, "no-store"),
            ],
            content,
        )
            .into_response(),
        Interception::NotFound => (
            StatusCode::NOT_FOUND,
            "Preview files have not been published yet",
        )
            .into_response(),
        Interception::PassThrough => server.pass_through(&uri).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::spawn_gateway;
    use crate::project::ProjectFile;
    use crate::registry::Snapshot;
    use crate::transform::TransformCache;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn router(files: Option<&[(&str, &str)]>, upstream: Option<&str>) -> Router {
        let (handle, mut view, _task) = spawn_gateway("/preview", Arc::new(TransformCache::default()));
        if let Some(files) = files {
            handle
                .replace_files(Snapshot::from_files(
                    files.iter().map(|(p, c)| ProjectFile::new(*p, *c)),
                ))
                .await
                .unwrap();
            assert!(view.wait_for_version(0).await);
        }
        let server = GatewayServer::new(view, upstream.map(str::to_string)).unwrap();
        gateway_router(Arc::new(server))
    }

    async fn get_path(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn test_serves_stylesheet_with_content_type() {
        let app = router(Some(&[("style.css", "p { color: red }")]), None).await;
        let (status, content_type, body) = get_path(app, "/preview/style.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/css; charset=utf-8"));
        assert_eq!(body, "p { color: red }");
    }

    #[tokio::test]
    async fn test_serves_transformed_script_for_extensionless_path() {
        let app = router(
            Some(&[("components/Button.tsx", "const n: number = 1;\nexport default n;\n")]),
            None,
        )
        .await;
        let (status, content_type, body) = get_path(app, "/preview/components/Button").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            content_type.as_deref(),
            Some("application/javascript; charset=utf-8")
        );
        assert!(!body.contains(": number"));
        assert!(body.contains("exports.default = n;"));
    }

    #[tokio::test]
    async fn test_percent_encoded_paths_match_registry_keys() {
        let app = router(
            Some(&[("assets/my file.css", "h1 {}"), ("données.css", "p {}")]),
            None,
        )
        .await;
        let (status, _, body) = get_path(app.clone(), "/preview/assets/my%20file.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "h1 {}");

        let (status, _, body) = get_path(app, "/preview/donn%C3%A9es.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "p {}");
    }

    #[tokio::test]
    async fn test_cold_start_returns_not_found() {
        let app = router(None, None).await;
        let (status, _, _) = get_path(app, "/preview/App").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pass_through_without_upstream_is_not_found() {
        let app = router(Some(&[("App.tsx", "")]), None).await;
        let (status, _, _) = get_path(app, "/vendor/react.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        let app = router(Some(&[("App.tsx", "")]), Some("http://127.0.0.1:9")).await;
        let (status, _, _) = get_path(app, "/fonts/inter.woff2").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
