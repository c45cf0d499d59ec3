use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::cache::Fingerprint;
use crate::errors::EngineError;
use crate::models::embedding::EmbeddingVector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Joins the open batch and waits for it to fill or time out.
    #[default]
    Normal,
    /// Joins the open batch and dispatches it straight away.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub model_id: String,
    /// Normalized input text; the fingerprint was computed over exactly this text.
    pub input: String,
    pub fingerprint: Fingerprint,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
}

impl InferenceRequest {
    pub fn new(model_id: &str, input: String, fingerprint: Fingerprint, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id: model_id.to_string(),
            input,
            fingerprint,
            priority,
            submitted_at: Utc::now(),
        }
    }
}

pub(crate) type Responder = oneshot::Sender<Result<EmbeddingVector, EngineError>>;

/// A request waiting in a batch, paired with the channel that resolves its caller.
pub(crate) struct PendingRequest {
    pub request: InferenceRequest,
    pub responder: Responder,
}

impl PendingRequest {
    /// The caller dropped its receiver; nothing is waiting for this result.
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }

    pub fn resolve(self, result: Result<EmbeddingVector, EngineError>) {
        // The caller may have gone away after dispatch; the result is simply discarded.
        let _ = self.responder.send(result);
    }

    pub fn fail(self, error: &EngineError) {
        let error = error.clone().with_fingerprint(self.request.fingerprint.as_str());
        self.resolve(Err(error));
    }
}
