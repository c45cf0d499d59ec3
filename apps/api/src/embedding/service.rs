//! Embedding Service: cache lookup, request coalescing, and hand-off to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use tracing::debug;

use crate::batching::{BatchScheduler, InferenceRequest, Priority};
use crate::cache::fingerprint::normalize_text;
use crate::cache::{Fingerprint, InferenceCache};
use crate::errors::EngineError;
use crate::inference::model::TaskKind;
use crate::inference::registry::ModelRegistry;
use crate::models::embedding::EmbeddingVector;

type EmbedFuture = BoxFuture<'static, Result<EmbeddingVector, EngineError>>;

/// Dead entries are pruned once the in-flight map grows past this.
const INFLIGHT_PRUNE_AT: usize = 1024;

#[derive(Clone)]
pub struct EmbeddingService {
    registry: ModelRegistry,
    cache: Arc<InferenceCache>,
    scheduler: BatchScheduler,
    /// Weak so that a request abandoned by every caller is dropped from its batch.
    inflight: Arc<Mutex<HashMap<Fingerprint, WeakShared<EmbedFuture>>>>,
}

impl EmbeddingService {
    pub fn new(registry: ModelRegistry, cache: Arc<InferenceCache>, scheduler: BatchScheduler) -> Self {
        Self {
            registry,
            cache,
            scheduler,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn embed(&self, text: &str, model_id: &str) -> Result<EmbeddingVector, EngineError> {
        self.embed_with_priority(text, model_id, Priority::Normal).await
    }

    pub async fn embed_with_priority(
        &self,
        text: &str,
        model_id: &str,
        priority: Priority,
    ) -> Result<EmbeddingVector, EngineError> {
        let descriptor = self.registry.descriptor(model_id)?;
        if descriptor.task != TaskKind::Embedding {
            return Err(EngineError::WrongTaskKind {
                model_id: model_id.to_string(),
                expected: TaskKind::Embedding,
                actual: descriptor.task,
            });
        }

        let input = normalize_text(text);
        let fp = Fingerprint::compute(&input, model_id, &descriptor.version);
        if let Some(vector) = self.cache.get(&fp).await {
            return Ok(vector);
        }

        let shared = self.join_or_start(&fp, model_id, input, priority);
        let result = shared.clone().await;
        self.finish(&fp, &shared);
        result
    }

    /// Embeds every text concurrently; the first failure fails the whole call.
    pub async fn embed_many(
        &self,
        texts: &[String],
        model_id: &str,
    ) -> Result<Vec<EmbeddingVector>, EngineError> {
        try_join_all(texts.iter().map(|text| self.embed(text, model_id))).await
    }

    fn join_or_start(
        &self,
        fp: &Fingerprint,
        model_id: &str,
        input: String,
        priority: Priority,
    ) -> Shared<EmbedFuture> {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(fp).and_then(WeakShared::upgrade) {
            debug!("Coalescing embed for {fp} onto in-flight request");
            return existing;
        }

        let scheduler = self.scheduler.clone();
        let cache = self.cache.clone();
        let key = fp.clone();
        let request = InferenceRequest::new(model_id, input, fp.clone(), priority);
        let future: EmbedFuture = async move {
            let vector = scheduler.submit(request).await?;
            cache.put(&key, &vector).await;
            Ok(vector)
        }
        .boxed();
        let shared = future.shared();

        if inflight.len() >= INFLIGHT_PRUNE_AT {
            inflight.retain(|_, weak| weak.upgrade().is_some());
        }
        if let Some(weak) = shared.downgrade() {
            inflight.insert(fp.clone(), weak);
        }
        shared
    }

    /// Clears the in-flight entry, unless a newer request already replaced it.
    fn finish(&self, fp: &Fingerprint, shared: &Shared<EmbedFuture>) {
        let mut inflight = self.inflight.lock();
        let current = inflight
            .get(fp)
            .and_then(WeakShared::upgrade)
            .map(|current| current.ptr_eq(shared));
        if current != Some(false) {
            inflight.remove(fp);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use super::*;
    use crate::batching::BatchPolicy;
    use crate::cache::local::LocalTier;
    use crate::test_support::{descriptor, sample_vector, CountingEmbedder, StubLoader};

    struct Fixture {
        service: EmbeddingService,
        cache: Arc<InferenceCache>,
        embedder: Arc<CountingEmbedder>,
    }

    fn fixture(loader: StubLoader) -> Fixture {
        let embedder = loader.embedder();
        let registry = ModelRegistry::new(Arc::new(loader), 1024);
        registry.register(descriptor("minilm", 4)).unwrap();
        let mut classifier = descriptor("seniority", 4);
        classifier.task = TaskKind::Classification;
        registry.register(classifier).unwrap();

        let cache = Arc::new(InferenceCache::new(
            LocalTier::new(NonZeroUsize::new(64).unwrap(), Duration::from_secs(3600)),
            Vec::new(),
        ));
        let scheduler = BatchScheduler::new(
            registry.clone(),
            BatchPolicy::new(Duration::from_millis(50), Duration::from_secs(5)),
        );
        Fixture {
            service: EmbeddingService::new(registry, cache.clone(), scheduler),
            cache,
            embedder,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_is_idempotent() {
        let first = fixture(StubLoader::new());
        let second = fixture(StubLoader::new());

        let a = first.service.embed("Python and SQL", "minilm").await.unwrap();
        let b = first.service.embed("Python  and SQL", "minilm").await.unwrap();
        let c = second.service.embed("Python and SQL", "minilm").await.unwrap();

        assert_eq!(a.values, b.values);
        assert_eq!(a.values, c.values);
        assert_eq!(a.source_hash, c.source_hash);
        assert_eq!(first.embedder.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_one_inference() {
        let f = fixture(StubLoader::new());

        let results = futures::future::join_all(
            (0..5).map(|_| f.service.embed("distributed systems", "minilm")),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(f.embedder.call_count(), 1);
        assert_eq!(f.embedder.batches()[0].1.len(), 1);
        assert!(f.service.inflight.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_the_model() {
        let f = fixture(StubLoader::new());
        let fp = Fingerprint::compute("rust", "minilm", "v1");
        let cached = sample_vector(&fp);
        f.cache.put(&fp, &cached).await;

        let vector = f.service.embed("rust", "minilm").await.unwrap();
        assert_eq!(vector, cached);
        assert_eq!(f.embedder.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_inference_is_cached() {
        let f = fixture(StubLoader::new());
        let vector = f.service.embed("kafka", "minilm").await.unwrap();

        let fp = Fingerprint::compute("kafka", "minilm", "v1");
        assert_eq!(f.cache.get(&fp).await, Some(vector));
        assert_eq!(f.cache.stats().local_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_reaches_all_concurrent_embeds() {
        let f = fixture(StubLoader::new().failing_load("weights file missing"));

        let (a, b, c) = tokio::join!(
            f.service.embed("a", "minilm"),
            f.service.embed("b", "minilm"),
            f.service.embed("c", "minilm"),
        );
        for result in [a, b, c] {
            assert!(matches!(result, Err(EngineError::ModelLoad { .. })));
        }
        assert_eq!(f.embedder.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_inference_is_not_cached() {
        let f = fixture(StubLoader::new());
        f.embedder.fail_with("device lost");

        assert!(f.service.embed("go", "minilm").await.is_err());
        assert_eq!(f.cache.stats().local_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_lets_next_caller_start_fresh() {
        let f = fixture(StubLoader::new());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            f.service.embed("terraform", "minilm"),
        )
        .await;
        assert!(abandoned.is_err());

        let vector = f.service.embed("terraform", "minilm").await.unwrap();
        assert_eq!(vector.model_id, "minilm");
        // The first batch was abandoned before dispatch and never reached the model.
        assert_eq!(f.embedder.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_many_preserves_order() {
        let f = fixture(StubLoader::new());
        let texts = vec!["python".to_string(), "aws".to_string(), "sql".to_string()];

        let vectors = f.service.embed_many(&texts, "minilm").await.unwrap();
        let hashes: Vec<String> = vectors.into_iter().map(|v| v.source_hash).collect();
        let expected: Vec<String> = texts
            .iter()
            .map(|t| Fingerprint::compute(t, "minilm", "v1").to_string())
            .collect();
        assert_eq!(hashes, expected);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let f = fixture(StubLoader::new());
        let err = f.service.embed("x", "nope").await.unwrap_err();
        assert!(matches!(err, EngineError::ModelNotFound { .. }));
    }

    #[tokio::test]
    async fn test_wrong_task_kind() {
        let f = fixture(StubLoader::new());
        let err = f.service.embed("x", "seniority").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::WrongTaskKind {
                actual: TaskKind::Classification,
                ..
            }
        ));
    }
}
