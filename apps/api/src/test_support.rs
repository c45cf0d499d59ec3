//! Stub models and loaders shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::remote::KvStore;
use crate::cache::Fingerprint;
use crate::db::RecordStore;
use crate::errors::EngineError;
use crate::inference::hashing::{HashedNgramConfig, HashedNgramEmbedder};
use crate::inference::loader::ModelLoader;
use crate::inference::model::{
    Classification, ClassificationModel, EmbeddingModel, GenerationModel, LoadedModel,
    ModelDescriptor, TaskKind,
};
use crate::models::embedding::EmbeddingVector;
use crate::models::profile::{CandidateProfile, JobPosting};

pub fn descriptor(id: &str, max_batch_size: usize) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        task: TaskKind::Embedding,
        version: "v1".to_string(),
        artifact: format!("{id}.json"),
        memory_mb: 16,
        max_batch_size,
        idle_unload_secs: 900,
    }
}

/// Embedder that records every batch it is asked to run.
pub struct CountingEmbedder {
    inner: HashedNgramEmbedder,
    calls: AtomicUsize,
    batches: Mutex<Vec<(Instant, Vec<String>)>>,
    failure: Mutex<Option<String>>,
    delay: Duration,
}

impl CountingEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashedNgramEmbedder::new(HashedNgramConfig {
                dimension: 32,
                ngram_min: 3,
                ngram_max: 4,
                seed: 11,
                word_weight: 2.0,
            })
            .expect("valid test config"),
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            delay,
        }
    }

    pub fn fail_with(&self, reason: &str) {
        *self.failure.lock() = Some(reason.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<(Instant, Vec<String>)> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl EmbeddingModel for CountingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push((Instant::now(), inputs.to_vec()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(reason) = self.failure.lock().clone() {
            return Err(EngineError::inference("stub", reason));
        }
        self.inner.embed_batch(inputs).await
    }
}

struct FixedClassifier;

#[async_trait]
impl ClassificationModel for FixedClassifier {
    async fn classify(&self, _input: &str) -> Result<Classification, EngineError> {
        Ok(Classification {
            label: "senior".to_string(),
            confidence: 0.9,
            scores: vec![("senior".to_string(), 0.9), ("junior".to_string(), 0.1)],
        })
    }
}

struct EchoGenerator;

#[async_trait]
impl GenerationModel for EchoGenerator {
    async fn generate(&self, prompt: &str, _system: &str) -> Result<String, EngineError> {
        Ok(format!("advice for: {}", prompt.lines().next().unwrap_or_default()))
    }
}

pub struct StubLoader {
    loads: AtomicUsize,
    load_delay: Duration,
    load_failure: Option<String>,
    embedder: Arc<CountingEmbedder>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            load_delay: Duration::ZERO,
            load_failure: None,
            embedder: Arc::new(CountingEmbedder::new(Duration::ZERO)),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_embedder(mut self, embedder: CountingEmbedder) -> Self {
        self.embedder = Arc::new(embedder);
        self
    }

    pub fn failing_load(mut self, reason: &str) -> Self {
        self.load_failure = Some(reason.to_string());
        self
    }

    pub fn embedder(&self) -> Arc<CountingEmbedder> {
        self.embedder.clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for StubLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedModel, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if let Some(reason) = &self.load_failure {
            return Err(EngineError::model_load(&descriptor.id, reason));
        }
        Ok(match descriptor.task {
            TaskKind::Embedding => LoadedModel::Embedding(self.embedder.clone()),
            TaskKind::Classification => LoadedModel::Classification(Arc::new(FixedClassifier)),
            TaskKind::Generation => LoadedModel::Generation(Arc::new(EchoGenerator)),
        })
    }
}

pub fn sample_vector(fp: &Fingerprint) -> EmbeddingVector {
    EmbeddingVector {
        source_hash: fp.to_string(),
        model_id: "m".to_string(),
        model_version: "v1".to_string(),
        values: vec![0.125, -0.5, 0.333_333_34, 1.0e-7],
        created_at: Utc::now(),
    }
}

/// In-process stand-in for Redis that honours TTLs against the tokio clock.
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        let mut entries = self.entries.lock();
        let expired = matches!(entries.get(key), Some((_, expires)) if *expires <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), EngineError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

/// A shared store that is always unreachable.
pub struct FailingKvStore;

#[async_trait]
impl KvStore for FailingKvStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Err(EngineError::CacheUnavailable {
            tier: "remote",
            reason: "connection refused".to_string(),
        })
    }

    async fn set_ex(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), EngineError> {
        Err(EngineError::CacheUnavailable {
            tier: "remote",
            reason: "connection refused".to_string(),
        })
    }
}

pub struct MemoryRecordStore {
    jobs: Vec<JobPosting>,
    profiles: Vec<CandidateProfile>,
}

impl MemoryRecordStore {
    pub fn new(jobs: Vec<JobPosting>, profiles: Vec<CandidateProfile>) -> Self {
        Self { jobs, profiles }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn jobs_by_ids(&self, ids: &[Uuid]) -> Result<Vec<JobPosting>, sqlx::Error> {
        Ok(self
            .jobs
            .iter()
            .filter(|job| ids.contains(&job.id))
            .cloned()
            .collect())
    }

    async fn profile_by_id(&self, id: Uuid) -> Result<Option<CandidateProfile>, sqlx::Error> {
        Ok(self.profiles.iter().find(|p| p.id == id).cloned())
    }
}
