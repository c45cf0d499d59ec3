use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::inference::registry::ModelState;
use crate::state::AppState;

/// GET /health
/// Liveness plus a summary of loaded models and cache counters.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let models = state.registry.status();
    let ready = models.iter().filter(|m| m.state == ModelState::Ready).count();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "compass-api",
        "models": {
            "registered": models.len(),
            "ready": ready,
        },
        "cache": state.cache.stats(),
        "record_store": state.records.is_some(),
    }))
}
