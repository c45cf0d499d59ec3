use std::sync::Arc;

use crate::cache::InferenceCache;
use crate::config::Config;
use crate::db::RecordStore;
use crate::embedding::EmbeddingService;
use crate::inference::registry::ModelRegistry;
use crate::matching::{MatchEngine, MatchWeights};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub registry: ModelRegistry,
    pub embeddings: EmbeddingService,
    pub cache: Arc<InferenceCache>,
    pub matcher: MatchEngine,
    /// Present only when `DATABASE_URL` is configured.
    pub records: Option<Arc<dyn RecordStore>>,
    /// Baseline weights; a request may override them.
    pub weights: MatchWeights,
    pub config: Config,
}
