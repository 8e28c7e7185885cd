//! HTTP listener wiring
//!
//! Assembles the axum application: health check, read-only introspection
//! API, and a catch-all fallback that routes every other method and path
//! through the proxy state machine.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http::StatusCode;
use infergate_config::Config;
use infergate_store::CacheStore;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::api;
use crate::mode::Mode;
use crate::request::ProxyRequest;
use crate::router::GateRouter;
use crate::upstream::{HttpUpstream, Upstream};

/// Static facts about the running gate, served by `GET /api/config`
#[derive(Clone)]
pub struct GateInfo {
    pub mode: Mode,
    pub upstream_url: Option<Url>,
    pub host: String,
    pub port: u16,
    pub cache_dir: PathBuf,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub router: Arc<GateRouter>,
    pub info: GateInfo,
}

/// Assembled server with all routes and middleware
pub struct Server {
    router: axum::Router,
    listen: (String, u16),
}

impl Server {
    /// Build the server from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the router cannot
    /// be constructed
    pub fn new(config: &Config, mode: Mode) -> anyhow::Result<Self> {
        let store = Arc::new(CacheStore::open(&config.cache_dir)?);

        let upstream: Option<Arc<dyn Upstream>> = match mode {
            Mode::RecordAndReplay => Some(Arc::new(HttpUpstream::new(
                config.upstream.clone(),
                config.api_key.clone(),
            ))),
            Mode::ReplayOnly => None,
        };

        let router = Arc::new(GateRouter::new(mode, store, upstream)?);
        let info = GateInfo {
            mode,
            upstream_url: (mode == Mode::RecordAndReplay).then(|| config.upstream.clone()),
            host: config.host.clone(),
            port: config.port,
            cache_dir: config.cache_dir.clone(),
        };

        let app = axum::Router::new()
            .route("/health", get(health_handler))
            .route("/api/cache", get(api::cache_list_handler))
            .route("/api/cache/{id}", get(api::cache_detail_handler))
            .route("/api/stats", get(api::stats_handler))
            .route("/api/config", get(api::config_handler))
            .fallback(proxy_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(AppState { router, info });

        Ok(Self {
            router: app,
            listen: (config.host.clone(), config.port),
        })
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> axum::Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind((self.listen.0.as_str(), self.listen.1)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "gate listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}

/// Handle `GET /health`
async fn health_handler(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "mode": state.info.mode,
    }))
    .into_response()
}

/// Catch-all: every non-introspection request goes through the proxy core
async fn proxy_handler(State(state): State<AppState>, request: axum::extract::Request) -> Response {
    match into_proxy_request(request).await {
        Ok(proxy_request) => state.router.handle(proxy_request).await,
        Err(response) => response,
    }
}

async fn into_proxy_request(request: axum::extract::Request) -> Result<ProxyRequest, Response> {
    let (parts, body) = request.into_parts();

    let body = axum::body::to_bytes(body, usize::MAX).await.map_err(|e| {
        tracing::warn!(error = %e, "failed to read request body");
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "unreadable request body" })),
        )
            .into_response()
    })?;

    let query = parts
        .uri
        .query()
        .map(|raw| {
            url::form_urlencoded::parse(raw.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect()
        })
        .unwrap_or_default();

    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    Ok(ProxyRequest {
        method: parts.method.as_str().to_owned(),
        path: parts.uri.path().to_owned(),
        query,
        headers,
        body,
    })
}
