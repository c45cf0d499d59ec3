use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::inference::model::TaskKind;

/// Failures raised by the inference and matching core.
///
/// `Clone` because a single failed load or batch is delivered to every waiter.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("model '{model_id}' is not registered")]
    ModelNotFound { model_id: String },

    #[error("model '{model_id}' failed to load: {reason}")]
    ModelLoad { model_id: String, reason: String },

    #[error("inference failed on model '{model_id}'{}: {reason}", fingerprint_suffix(.fingerprint))]
    Inference {
        model_id: String,
        fingerprint: Option<String>,
        reason: String,
    },

    #[error("cache tier '{tier}' unavailable: {reason}")]
    CacheUnavailable { tier: &'static str, reason: String },

    #[error("request to model '{model_id}' timed out after {}ms", .waited.as_millis())]
    Timeout { model_id: String, waited: Duration },

    #[error("model '{model_id}' is a {actual} model, expected {expected}")]
    WrongTaskKind {
        model_id: String,
        expected: TaskKind,
        actual: TaskKind,
    },
}

fn fingerprint_suffix(fingerprint: &Option<String>) -> String {
    fingerprint
        .as_deref()
        .map(|fp| format!(" (fingerprint {fp})"))
        .unwrap_or_default()
}

impl EngineError {
    pub fn model_load(model_id: &str, reason: impl ToString) -> Self {
        EngineError::ModelLoad {
            model_id: model_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(model_id: &str, reason: impl ToString) -> Self {
        EngineError::Inference {
            model_id: model_id.to_string(),
            fingerprint: None,
            reason: reason.to_string(),
        }
    }

    /// Attaches the request fingerprint to inference failures so callers can retry or alert.
    pub fn with_fingerprint(self, fp: &str) -> Self {
        match self {
            EngineError::Inference {
                model_id,
                fingerprint: None,
                reason,
            } => EngineError::Inference {
                model_id,
                fingerprint: Some(fp.to_string()),
                reason,
            },
            other => other,
        }
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Engine(e) => match e {
                EngineError::ModelNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "MODEL_NOT_FOUND", e.to_string())
                }
                EngineError::WrongTaskKind { .. } => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                EngineError::ModelLoad { .. } => {
                    tracing::error!("Model load error: {e}");
                    (StatusCode::SERVICE_UNAVAILABLE, "MODEL_LOAD_ERROR", e.to_string())
                }
                EngineError::Inference { .. } => {
                    tracing::error!("Inference error: {e}");
                    (StatusCode::BAD_GATEWAY, "INFERENCE_ERROR", e.to_string())
                }
                EngineError::Timeout { .. } => {
                    tracing::warn!("Inference timeout: {e}");
                    (StatusCode::GATEWAY_TIMEOUT, "INFERENCE_TIMEOUT", e.to_string())
                }
                EngineError::CacheUnavailable { .. } => {
                    tracing::error!("Cache error reached the surface: {e}");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "CACHE_UNAVAILABLE",
                        "A cache tier is unavailable".to_string(),
                    )
                }
            },
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
