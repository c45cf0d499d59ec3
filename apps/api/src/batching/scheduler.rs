//! At most one open batch per model id. A batch dispatches when it reaches the model's
//! `max_batch_size`, when `max_wait` has elapsed since it opened, or, if its timer is
//! late, when a new request arrives after the hard ceiling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::batching::request::{InferenceRequest, PendingRequest, Priority};
use crate::errors::EngineError;
use crate::inference::model::{LoadedModel, TaskKind};
use crate::inference::registry::{ModelLease, ModelRegistry};
use crate::models::embedding::EmbeddingVector;

#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Longest a batch waits for more requests after the first one joins.
    pub max_wait: Duration,
    /// A batch still open past this age is force-dispatched.
    pub hard_ceiling: Duration,
    /// Longest a caller waits for its result before giving up with `Timeout`.
    pub request_timeout: Duration,
}

impl BatchPolicy {
    pub fn new(max_wait: Duration, request_timeout: Duration) -> Self {
        Self {
            max_wait,
            hard_ceiling: max_wait * 2,
            request_timeout,
        }
    }
}

struct OpenBatch {
    id: u64,
    model_id: String,
    max_size: usize,
    opened_at: Instant,
    ceiling: Instant,
    requests: Vec<PendingRequest>,
    _lease: ModelLease,
}

#[derive(Default)]
struct ModelQueue {
    open: Mutex<Option<OpenBatch>>,
}

struct SchedulerInner {
    registry: ModelRegistry,
    policy: BatchPolicy,
    queues: Mutex<HashMap<String, Arc<ModelQueue>>>,
    next_batch_id: AtomicU64,
}

#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
}

impl BatchScheduler {
    pub fn new(registry: ModelRegistry, policy: BatchPolicy) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                policy,
                queues: Mutex::new(HashMap::new()),
                next_batch_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queues the request and waits for its batch to resolve it.
    ///
    /// Dropping the returned future before dispatch removes the request from its batch.
    pub async fn submit(&self, request: InferenceRequest) -> Result<EmbeddingVector, EngineError> {
        let model_id = request.model_id.clone();
        let request_id = request.id;
        let (tx, rx) = oneshot::channel();
        self.inner.enqueue(PendingRequest {
            request,
            responder: tx,
        })?;

        let timeout = self.inner.policy.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::inference(
                &model_id,
                "batch was dropped before producing a result",
            )),
            Err(_) => {
                warn!(
                    "Request {request_id} to '{model_id}' timed out after {}ms",
                    timeout.as_millis()
                );
                Err(EngineError::Timeout {
                    model_id,
                    waited: timeout,
                })
            }
        }
    }
}

impl SchedulerInner {
    fn queue(&self, model_id: &str) -> Arc<ModelQueue> {
        self.queues
            .lock()
            .entry(model_id.to_string())
            .or_default()
            .clone()
    }

    fn enqueue(self: &Arc<Self>, pending: PendingRequest) -> Result<(), EngineError> {
        let model_id = pending.request.model_id.clone();
        let descriptor = self.registry.descriptor(&model_id)?;
        if descriptor.task != TaskKind::Embedding {
            return Err(EngineError::WrongTaskKind {
                model_id,
                expected: TaskKind::Embedding,
                actual: descriptor.task,
            });
        }

        let queue = self.queue(&model_id);
        let mut open = queue.open.lock();
        let now = Instant::now();

        if open.as_ref().is_some_and(|b| now >= b.ceiling) {
            if let Some(stale) = open.take() {
                warn!(
                    "Batch {} for '{}' passed its hard ceiling; force-dispatching",
                    stale.id, stale.model_id
                );
                self.spawn_dispatch(stale);
            }
        }

        let mut batch = match open.take() {
            Some(batch) => batch,
            None => {
                let lease = self.registry.lease(&model_id)?;
                let batch = OpenBatch {
                    id: self.next_batch_id.fetch_add(1, Ordering::Relaxed),
                    model_id: model_id.clone(),
                    max_size: descriptor.max_batch_size,
                    opened_at: now,
                    ceiling: now + self.policy.hard_ceiling,
                    requests: Vec::with_capacity(descriptor.max_batch_size),
                    _lease: lease,
                };
                self.spawn_timer(queue.clone(), batch.id, now + self.policy.max_wait);
                batch
            }
        };

        let flush = pending.request.priority == Priority::Immediate;
        batch.requests.push(pending);
        if flush || batch.requests.len() >= batch.max_size {
            self.spawn_dispatch(batch);
        } else {
            *open = Some(batch);
        }
        Ok(())
    }

    fn spawn_timer(self: &Arc<Self>, queue: Arc<ModelQueue>, batch_id: u64, deadline: Instant) {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let expired = {
                let mut open = queue.open.lock();
                if open.as_ref().is_some_and(|b| b.id == batch_id) {
                    open.take()
                } else {
                    None
                }
            };
            if let Some(batch) = expired {
                inner.dispatch(batch).await;
            }
        });
    }

    fn spawn_dispatch(self: &Arc<Self>, batch: OpenBatch) {
        let inner = self.clone();
        tokio::spawn(async move { inner.dispatch(batch).await });
    }

    /// Invokes the model once for every live request and resolves each caller in order.
    async fn dispatch(&self, batch: OpenBatch) {
        let OpenBatch {
            id,
            model_id,
            opened_at,
            requests,
            _lease,
            ..
        } = batch;

        let submitted = requests.len();
        let live: Vec<PendingRequest> = requests.into_iter().filter(|p| !p.is_abandoned()).collect();
        if live.is_empty() {
            debug!("Batch {id} for '{model_id}' abandoned by all {submitted} callers");
            return;
        }

        let oldest_wait = (Utc::now() - live[0].request.submitted_at).num_milliseconds();
        debug!(
            "Dispatching batch {id} for '{model_id}': {} requests ({} abandoned), open {}ms, oldest waited {oldest_wait}ms",
            live.len(),
            submitted - live.len(),
            opened_at.elapsed().as_millis()
        );

        let handle = match self.registry.ensure_ready(&model_id).await {
            Ok(handle) => handle,
            Err(e) => {
                live.into_iter().for_each(|p| p.fail(&e));
                return;
            }
        };

        let model = match handle.model() {
            LoadedModel::Embedding(model) => model.clone(),
            other => {
                let e = EngineError::WrongTaskKind {
                    model_id: model_id.clone(),
                    expected: TaskKind::Embedding,
                    actual: other.kind(),
                };
                live.into_iter().for_each(|p| p.fail(&e));
                return;
            }
        };

        let inputs: Vec<String> = live.iter().map(|p| p.request.input.clone()).collect();
        let outputs = match model.embed_batch(&inputs).await {
            Ok(outputs) if outputs.len() == live.len() => outputs,
            Ok(outputs) => {
                let e = EngineError::inference(
                    &model_id,
                    format!("model returned {} vectors for {} inputs", outputs.len(), live.len()),
                );
                live.into_iter().for_each(|p| p.fail(&e));
                return;
            }
            Err(e) => {
                warn!("Batch {id} for '{model_id}' failed: {e}");
                live.into_iter().for_each(|p| p.fail(&e));
                return;
            }
        };

        let dimension = model.dimension();
        let version = handle.descriptor().version.clone();
        for (pending, values) in live.into_iter().zip(outputs) {
            if values.len() != dimension {
                let e = EngineError::inference(
                    &model_id,
                    format!("expected dimension {dimension}, got {}", values.len()),
                );
                pending.fail(&e);
                continue;
            }
            let vector = EmbeddingVector {
                source_hash: pending.request.fingerprint.to_string(),
                model_id: model_id.clone(),
                model_version: version.clone(),
                values,
                created_at: Utc::now(),
            };
            pending.resolve(Ok(vector));
        }
    }
}
