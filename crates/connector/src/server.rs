use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::handle::{SessionState, SubscriptionHandle};
use crate::metrics::encode_metrics;

#[derive(Serialize)]
pub struct FeedHealth {
    pub feed: String,
    pub state: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub feeds: Vec<FeedHealth>,
}

/// Sessions reported by the health endpoints
#[derive(Clone, Default)]
pub struct ServerState {
    feeds: Arc<Vec<(String, SubscriptionHandle)>>,
}

impl ServerState {
    pub fn new(feeds: Vec<(String, SubscriptionHandle)>) -> Self {
        Self {
            feeds: Arc::new(feeds),
        }
    }

    /// Every session subscribed
    pub fn is_ready(&self) -> bool {
        self.feeds
            .iter()
            .all(|(_, handle)| handle.state() == SessionState::Subscribed)
    }

    fn feeds(&self) -> Vec<FeedHealth> {
        self.feeds
            .iter()
            .map(|(feed, handle)| FeedHealth {
                feed: feed.clone(),
                state: handle.state().to_string(),
            })
            .collect()
    }
}

/// Always 200 while the process serves requests
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        feeds: state.feeds(),
    })
}

/// 200 only when every feed session is subscribed
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };
    (
        code,
        Json(HealthResponse {
            status,
            feeds: state.feeds(),
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `cancel` fires
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
