//! Nearest-centroid text classifier built on the hashed n-gram embedder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::inference::hashing::{HashedNgramConfig, HashedNgramEmbedder};
use crate::inference::model::{Classification, ClassificationModel, EmbeddingModel};
use crate::models::embedding::cosine_similarity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelExemplars {
    pub label: String,
    pub exemplars: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidConfig {
    pub encoder: HashedNgramConfig,
    pub labels: Vec<LabelExemplars>,
    /// Softmax temperature applied to cosine similarities.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    0.1
}

pub struct CentroidClassifier {
    encoder: HashedNgramEmbedder,
    centroids: Vec<(String, Vec<f32>)>,
    temperature: f64,
}

impl CentroidClassifier {
    /// Builds centroids from exemplars. Fails on empty label sets or labels without exemplars.
    pub fn build(config: CentroidConfig) -> Result<Self, String> {
        if config.labels.is_empty() {
            return Err("classifier has no labels".to_string());
        }
        if !(config.temperature > 0.0) {
            return Err("temperature must be positive".to_string());
        }
        let encoder = HashedNgramEmbedder::new(config.encoder)?;

        let mut centroids = Vec::with_capacity(config.labels.len());
        for entry in config.labels {
            if entry.exemplars.is_empty() {
                return Err(format!("label '{}' has no exemplars", entry.label));
            }
            let mut centroid = vec![0.0_f32; encoder.dimension()];
            for text in &entry.exemplars {
                for (c, v) in centroid.iter_mut().zip(encoder.encode(text)) {
                    *c += v;
                }
            }
            let n = entry.exemplars.len() as f32;
            centroid.iter_mut().for_each(|c| *c /= n);
            centroids.push((entry.label, centroid));
        }

        Ok(Self {
            encoder,
            centroids,
            temperature: config.temperature,
        })
    }

    fn score(&self, text: &str) -> Classification {
        let encoded = self.encoder.encode(text);
        let sims: Vec<(String, f64)> = self
            .centroids
            .iter()
            .map(|(label, c)| (label.clone(), cosine_similarity(&encoded, c)))
            .collect();

        let max = sims.iter().map(|(_, s)| *s).fold(f64::MIN, f64::max);
        let exps: Vec<f64> = sims
            .iter()
            .map(|(_, s)| ((s - max) / self.temperature).exp())
            .collect();
        let total: f64 = exps.iter().sum();

        let mut scores: Vec<(String, f64)> = sims
            .into_iter()
            .zip(exps)
            .map(|((label, _), e)| (label, e / total))
            .collect();
        // Stable sort keeps manifest order among equal scores.
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (label, confidence) = scores[0].clone();
        Classification {
            label,
            confidence,
            scores,
        }
    }
}

#[async_trait]
impl ClassificationModel for CentroidClassifier {
    async fn classify(&self, input: &str) -> Result<Classification, EngineError> {
        Ok(self.score(input))
    }
}
