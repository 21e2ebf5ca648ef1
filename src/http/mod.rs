//! HTTP surface (spec §6): the SSE feed, market-control endpoints, and the
//! static dashboard.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::runtime::{Runtime, RuntimeEvent};
use crate::sse::SseHub;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub hub: Arc<SseHub>,
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/events", get(sse_handler))
        .route("/api/market/dip", post(market_dip))
        .route("/api/market/rally", post(market_rally))
        .route("/api/market/reset", post(market_reset))
        .route("/healthz", get(healthz))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .fallback_service(ServeDir::new("static"))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(crate::middleware::logging::request_logging_simple))
}

/// Forward every RuntimeEvent onto the SSE hub for as long as both the
/// runtime and the hub are alive. One logical owner of the translation from
/// internal event to wire message (spec §4.10).
pub fn spawn_hub_forwarder(runtime: Arc<Runtime>, hub: Arc<SseHub>) -> tokio::task::JoinHandle<()> {
    let mut events = runtime.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let (name, payload) = crate::runtime::events::to_hub_message(event);
                    hub.broadcast(name, &payload);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// axum's `Sse` only sets `Content-Type: text/event-stream` and
/// `Cache-Control: no-cache` on its own; the spec also requires
/// `Connection: keep-alive` and `X-Accel-Buffering: no` (so a proxy in
/// front of the server doesn't buffer the stream) on every client-accept
/// (spec §4.10).
async fn sse_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut response = state.hub.client_stream().into_response();
    let headers = response.headers_mut();
    headers.insert(axum::http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.runtime.get_states().await.len();
    Json(serde_json::json!({ "status": "ok", "agents": agents }))
}

#[derive(Debug, Deserialize)]
struct MarketShockBody {
    percent: f64,
}

#[derive(Debug, Serialize)]
struct MarketControlResponse {
    success: bool,
    clients: usize,
}

async fn market_dip(State(state): State<AppState>, Json(body): Json<MarketShockBody>) -> impl IntoResponse {
    state.runtime.inject_dip(body.percent).await;
    Json(MarketControlResponse { success: true, clients: state.hub.client_count() })
}

async fn market_rally(State(state): State<AppState>, Json(body): Json<MarketShockBody>) -> impl IntoResponse {
    state.runtime.inject_rally(body.percent).await;
    Json(MarketControlResponse { success: true, clients: state.hub.client_count() })
}

async fn market_reset(State(state): State<AppState>) -> impl IntoResponse {
    state.runtime.reset_market().await;
    Json(MarketControlResponse { success: true, clients: state.hub.client_count() })
}
