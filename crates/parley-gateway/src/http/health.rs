use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "agents": state.orchestrator.registry().len(),
        "sleeping": state.orchestrator.is_sleeping(),
    }))
}
