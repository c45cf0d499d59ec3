pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::inference::handlers as inference;
use crate::matching::handlers as matching;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Inference API
        .route("/models", get(inference::handle_models))
        .route("/embed", post(inference::handle_embed))
        .route("/classify", post(inference::handle_classify))
        // Matching API
        .route("/match", post(matching::handle_match))
        .route("/coach", post(matching::handle_coach))
        .with_state(state)
}
