use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::store::Snapshot;
use super::window::SummaryWindow;
use super::SharedState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscriberHealth {
    pub subscriber_id: String,
    pub broker_connected: bool,
    pub status: String,
}

/// Read-only JSON view of the subscriber
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/snapshot", get(snapshot))
        .route("/api/summaries", get(summaries))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn snapshot(State(state): State<SharedState>) -> Json<Snapshot> {
    Json(state.read().await.store.snapshot())
}

async fn summaries(State(state): State<SharedState>) -> Json<Vec<SummaryWindow>> {
    Json(state.read().await.windows.windows().cloned().collect())
}

async fn health(State(state): State<SharedState>) -> Json<SubscriberHealth> {
    let state = state.read().await;
    Json(SubscriberHealth {
        subscriber_id: state.windows.subscriber_id().to_string(),
        broker_connected: state.store.is_connected(),
        status: "ok".to_string(),
    })
}
