//! Health check endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Json<Value> {
    let shutting_down = state.scheduler.shutdown_token().is_cancelled();
    Json(json!({
        "status": if shutting_down { "stopping" } else { "ready" },
        "max_workers": state.scheduler.config().max_workers,
    }))
}
