//! Model descriptors and the capability interfaces each task kind exposes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Embedding,
    Classification,
    Generation,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Embedding => "embedding",
            TaskKind::Classification => "classification",
            TaskKind::Generation => "generation",
        };
        f.write_str(s)
    }
}

/// Registration record for a model. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub task: TaskKind,
    /// Participates in cache fingerprints; bump it whenever the artifact changes.
    pub version: String,
    /// Location passed to the artifact store (relative path or object key).
    pub artifact: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_idle_unload_secs")]
    pub idle_unload_secs: u64,
}

fn default_memory_mb() -> u64 {
    256
}

fn default_max_batch_size() -> usize {
    32
}

fn default_idle_unload_secs() -> u64 {
    900
}

impl ModelDescriptor {
    pub fn idle_unload(&self) -> Duration {
        Duration::from_secs(self.idle_unload_secs)
    }
}

/// Output of a classification model for one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
    /// Per-label scores, sorted descending.
    pub scores: Vec<(String, f64)>,
}

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embeds a batch; the result has exactly one vector per input, in input order.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;
}

#[async_trait]
pub trait ClassificationModel: Send + Sync {
    async fn classify(&self, input: &str) -> Result<Classification, EngineError>;
}

#[async_trait]
pub trait GenerationModel: Send + Sync {
    async fn generate(&self, prompt: &str, system: &str) -> Result<String, EngineError>;
}

/// An in-memory model, one variant per task kind.
#[derive(Clone)]
pub enum LoadedModel {
    Embedding(Arc<dyn EmbeddingModel>),
    Classification(Arc<dyn ClassificationModel>),
    Generation(Arc<dyn GenerationModel>),
}

impl LoadedModel {
    pub fn kind(&self) -> TaskKind {
        match self {
            LoadedModel::Embedding(_) => TaskKind::Embedding,
            LoadedModel::Classification(_) => TaskKind::Classification,
            LoadedModel::Generation(_) => TaskKind::Generation,
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoadedModel({})", self.kind())
    }
}
