//! Hashed n-gram embedder: a deterministic, dependency-free text encoder.
//!
//! Word unigrams and character n-grams are hashed (seeded FNV-1a) into a fixed number
//! of signed buckets, then the vector is L2-normalized. Identical input always yields
//! a bit-identical vector, which is what the inference cache relies on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::inference::model::EmbeddingModel;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashedNgramConfig {
    pub dimension: usize,
    #[serde(default = "default_ngram_min")]
    pub ngram_min: usize,
    #[serde(default = "default_ngram_max")]
    pub ngram_max: usize,
    #[serde(default)]
    pub seed: u64,
    /// Weight of a whole-word feature relative to a single character n-gram.
    #[serde(default = "default_word_weight")]
    pub word_weight: f32,
}

fn default_ngram_min() -> usize {
    3
}

fn default_ngram_max() -> usize {
    4
}

fn default_word_weight() -> f32 {
    2.0
}

#[derive(Debug, Clone)]
pub struct HashedNgramEmbedder {
    config: HashedNgramConfig,
}

impl HashedNgramEmbedder {
    pub fn new(config: HashedNgramConfig) -> Result<Self, String> {
        if config.dimension == 0 {
            return Err("dimension must be positive".to_string());
        }
        if config.ngram_min == 0 || config.ngram_min > config.ngram_max {
            return Err(format!(
                "invalid n-gram range {}..={}",
                config.ngram_min, config.ngram_max
            ));
        }
        Ok(Self { config })
    }

    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.config.dimension];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric() && c != '+' && c != '#')
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut vector, word.as_bytes(), self.config.word_weight);

            let padded: Vec<char> = format!("<{word}>").chars().collect();
            for n in self.config.ngram_min..=self.config.ngram_max {
                if padded.len() < n {
                    break;
                }
                for window in padded.windows(n) {
                    let gram: String = window.iter().collect();
                    self.add_feature(&mut vector, gram.as_bytes(), 1.0);
                }
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(self.config.seed, feature);
        let bucket = (hash % self.config.dimension as u64) as usize;
        // Top bit picks the sign so unrelated features cancel rather than pile up.
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET ^ seed;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[async_trait]
impl EmbeddingModel for HashedNgramEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        Ok(inputs.iter().map(|text| self.encode(text)).collect())
    }
}
