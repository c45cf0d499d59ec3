//! Axum route handlers for the Inference API.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::batching::Priority;
use crate::errors::{AppError, EngineError};
use crate::inference::model::{Classification, LoadedModel, TaskKind};
use crate::inference::registry::{ModelRegistry, ModelStatus};
use crate::models::embedding::EmbeddingVector;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
    pub model_id: String,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
    pub model_id: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelStatus>,
}

/// POST /embed
pub async fn handle_embed(
    State(state): State<AppState>,
    Json(request): Json<EmbedRequest>,
) -> Result<Json<EmbeddingVector>, AppError> {
    if request.text.trim().is_empty() {
        return Err(AppError::Validation("text cannot be empty".to_string()));
    }

    let vector = state
        .embeddings
        .embed_with_priority(&request.text, &request.model_id, request.priority)
        .await?;
    Ok(Json(vector))
}

/// POST /classify
///
/// Classification is not batched: the model is small and runs inline.
pub async fn handle_classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> Result<Json<Classification>, AppError> {
    if request.text.trim().is_empty() {
        return Err(AppError::Validation("text cannot be empty".to_string()));
    }

    let result = classify(&state.registry, &request.text, &request.model_id).await?;
    Ok(Json(result))
}

/// GET /models
pub async fn handle_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.registry.status(),
    })
}

pub async fn classify(
    registry: &ModelRegistry,
    text: &str,
    model_id: &str,
) -> Result<Classification, EngineError> {
    let descriptor = registry.descriptor(model_id)?;
    if descriptor.task != TaskKind::Classification {
        return Err(EngineError::WrongTaskKind {
            model_id: model_id.to_string(),
            expected: TaskKind::Classification,
            actual: descriptor.task,
        });
    }

    let handle = registry.ensure_ready(model_id).await?;
    match handle.model() {
        LoadedModel::Classification(model) => model.classify(text).await,
        other => Err(EngineError::WrongTaskKind {
            model_id: model_id.to_string(),
            expected: TaskKind::Classification,
            actual: other.kind(),
        }),
    }
}
