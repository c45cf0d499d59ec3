//! Turns a registered descriptor into an in-memory model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::errors::EngineError;
use crate::inference::artifacts::ArtifactStore;
use crate::inference::bert::{BertFiles, CandleBertConfig, CandleBertEmbedder};
use crate::inference::centroid::{CentroidClassifier, CentroidConfig};
use crate::inference::hashing::{HashedNgramConfig, HashedNgramEmbedder};
use crate::inference::model::{LoadedModel, ModelDescriptor, TaskKind};
use crate::inference::remote::{MessagesApiConfig, MessagesApiGenerator};

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedModel, EngineError>;
}

/// Serialized artifact formats understood by `ArtifactModelLoader`.
#[derive(Debug, Deserialize)]
#[serde(tag = "format", rename_all = "kebab-case")]
pub enum ModelArtifact {
    HashedNgram(HashedNgramConfig),
    /// Pretrained BERT-family checkpoint; the artifact only names the checkpoint files.
    CandleBert(CandleBertConfig),
    Centroid(CentroidConfig),
    MessagesApi(MessagesApiConfig),
}

impl ModelArtifact {
    fn task(&self) -> TaskKind {
        match self {
            ModelArtifact::HashedNgram(_) | ModelArtifact::CandleBert(_) => TaskKind::Embedding,
            ModelArtifact::Centroid(_) => TaskKind::Classification,
            ModelArtifact::MessagesApi(_) => TaskKind::Generation,
        }
    }
}

pub struct ArtifactModelLoader {
    store: Arc<dyn ArtifactStore>,
    generation_api_key: String,
}

impl ArtifactModelLoader {
    pub fn new(store: Arc<dyn ArtifactStore>, generation_api_key: String) -> Self {
        Self {
            store,
            generation_api_key,
        }
    }

    async fn decode(&self, descriptor: &ModelDescriptor, bytes: &[u8]) -> Result<LoadedModel, EngineError> {
        let id = descriptor.id.as_str();
        let artifact: ModelArtifact = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::model_load(id, format!("corrupt artifact: {e}")))?;

        if artifact.task() != descriptor.task {
            return Err(EngineError::model_load(
                id,
                format!(
                    "artifact is a {} model but the manifest registers a {} model",
                    artifact.task(),
                    descriptor.task
                ),
            ));
        }

        let model = match artifact {
            ModelArtifact::HashedNgram(config) => LoadedModel::Embedding(Arc::new(
                HashedNgramEmbedder::new(config).map_err(|e| EngineError::model_load(id, e))?,
            )),
            ModelArtifact::CandleBert(config) => {
                let files = self.fetch_bert_files(&config).await.map_err(|e| {
                    EngineError::model_load(id, format!("{e:#}"))
                })?;
                LoadedModel::Embedding(Arc::new(
                    CandleBertEmbedder::from_files(id, &config, files)
                        .map_err(|e| EngineError::model_load(id, format!("{e:#}")))?,
                ))
            }
            ModelArtifact::Centroid(config) => LoadedModel::Classification(Arc::new(
                CentroidClassifier::build(config).map_err(|e| EngineError::model_load(id, e))?,
            )),
            ModelArtifact::MessagesApi(config) => LoadedModel::Generation(Arc::new(
                MessagesApiGenerator::new(id, config, self.generation_api_key.clone())
                    .map_err(|e| EngineError::model_load(id, e))?,
            )),
        };
        Ok(model)
    }

    async fn fetch_bert_files(&self, config: &CandleBertConfig) -> anyhow::Result<BertFiles> {
        let (model_config, weights, tokenizer) = tokio::try_join!(
            self.store.fetch(&config.config),
            self.store.fetch(&config.weights),
            self.store.fetch(&config.tokenizer),
        )?;
        Ok(BertFiles {
            config: model_config.to_vec(),
            weights: weights.to_vec(),
            tokenizer: tokenizer.to_vec(),
        })
    }
}

#[async_trait]
impl ModelLoader for ArtifactModelLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedModel, EngineError> {
        let bytes = self
            .store
            .fetch(&descriptor.artifact)
            .await
            .map_err(|e| EngineError::model_load(&descriptor.id, format!("{e:#}")))?;
        let model = self.decode(descriptor, &bytes).await?;
        info!(
            "Decoded model '{}' ({}, {} bytes of artifact)",
            descriptor.id,
            model.kind(),
            bytes.len()
        );
        Ok(model)
    }
}
