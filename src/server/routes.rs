//! Route handlers.

use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::connection::{ConnectionHandler, RelayParams};
use super::page::{PageTemplate, PageVars, LOADING_TEXT};
use crate::config::Config;
use crate::error::Result;
use crate::shutdown::ShutdownCoordinator;
use crate::upstream::UpstreamSource;

/// Path of the relay socket.
pub const WS_PATH: &str = "/ws";

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    handler: Arc<ConnectionHandler>,
    page: Arc<str>,
    source_name: &'static str,
    shutdown: ShutdownCoordinator,
}

impl AppState {
    /// Build state from configuration, rendering the page once.
    pub fn new(
        config: &Config,
        source: Arc<dyn UpstreamSource>,
        shutdown: ShutdownCoordinator,
    ) -> Result<Self> {
        let template = PageTemplate::from_config(&config.page)?;
        let page = template.render(&PageVars {
            title: &config.page.title,
            ws_path: WS_PATH,
            loading: LOADING_TEXT,
        });

        let source_name = source.name();
        let handler = ConnectionHandler::new(
            config.server.clone(),
            config.upstream.clone(),
            config.relay.clone(),
            source,
        );

        Ok(Self {
            handler: Arc::new(handler),
            page: page.into(),
            source_name,
            shutdown,
        })
    }
}

/// Build the application router.
pub fn router(state: AppState, static_dir: Option<&str>) -> Router {
    let mut router = Router::new()
        .route("/", get(index))
        .route(WS_PATH, get(ws_handler))
        .route("/health", get(health));

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.page.to_string())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "source": state.source_name }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<RelayParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(guard) = state.shutdown.try_register() else {
        tracing::warn!(
            active = state.shutdown.active_connections(),
            max = state.shutdown.max_connections(),
            "Rejecting connection: at capacity or shutting down"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "relay unavailable").into_response();
    };

    let handler = state.handler.clone();
    ws.on_upgrade(move |socket| async move { handler.handle(socket, guard, params).await })
}
