//! Model Registry: owns every registered model and its load lifecycle.
//!
//! State machine per model:
//!
//! ```text
//! Unloaded ──ensure_ready──▶ Loading ──ok──▶ Ready ──release_idle──▶ Unloaded
//!                               └────err────▶ Unloaded (error fans out to every waiter)
//! ```
//!
//! Concurrent `ensure_ready` calls during a load share one in-flight load future.
//! A model is pinned (never idle-released or evicted) while any `ModelLease` is alive;
//! the batching scheduler holds one for each open batch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::inference::loader::ModelLoader;
use crate::inference::model::{LoadedModel, ModelDescriptor, TaskKind};

type SharedLoad = Shared<BoxFuture<'static, Result<LoadedModel, EngineError>>>;

enum Slot {
    Unloaded,
    Loading(SharedLoad),
    Ready(LoadedModel),
}

impl Slot {
    fn state(&self) -> ModelState {
        match self {
            Slot::Unloaded => ModelState::Unloaded,
            Slot::Loading(_) => ModelState::Loading,
            Slot::Ready(_) => ModelState::Ready,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
}

struct ModelEntry {
    descriptor: ModelDescriptor,
    slot: Mutex<Slot>,
    leases: AtomicUsize,
    last_used: Mutex<Instant>,
    loads: AtomicU64,
}

impl ModelEntry {
    fn new(descriptor: ModelDescriptor) -> Self {
        Self {
            descriptor,
            slot: Mutex::new(Slot::Unloaded),
            leases: AtomicUsize::new(0),
            last_used: Mutex::new(Instant::now()),
            loads: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }
}

/// Pins a model in memory while alive.
pub struct ModelLease {
    entry: Arc<ModelEntry>,
}

impl ModelLease {
    /// Must be called with the entry's slot lock held so idle release observes it.
    fn acquire(entry: &Arc<ModelEntry>) -> Self {
        entry.leases.fetch_add(1, Ordering::SeqCst);
        entry.touch();
        Self {
            entry: entry.clone(),
        }
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.entry.touch();
        self.entry.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A ready model plus the lease that keeps it loaded.
pub struct ModelHandle {
    model: LoadedModel,
    lease: ModelLease,
}

impl ModelHandle {
    pub fn model(&self) -> &LoadedModel {
        &self.model
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.lease.entry.descriptor
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub id: String,
    pub task: TaskKind,
    pub version: String,
    pub state: ModelState,
    pub memory_mb: u64,
    pub idle_secs: u64,
    pub active_leases: usize,
    pub load_count: u64,
}

struct RegistryInner {
    loader: Arc<dyn ModelLoader>,
    memory_budget_mb: u64,
    entries: RwLock<HashMap<String, Arc<ModelEntry>>>,
    /// Memory charged to Loading and Ready models.
    reserved_mb: Mutex<u64>,
}

#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>, memory_budget_mb: u64) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                loader,
                memory_budget_mb,
                entries: RwLock::new(HashMap::new()),
                reserved_mb: Mutex::new(0),
            }),
        }
    }

    /// Registers a model in the Unloaded state. Ids are unique.
    pub fn register(&self, descriptor: ModelDescriptor) -> anyhow::Result<()> {
        if descriptor.max_batch_size == 0 {
            bail!("model '{}' must allow a batch size of at least 1", descriptor.id);
        }
        let mut entries = self.inner.entries.write();
        if entries.contains_key(&descriptor.id) {
            bail!("model '{}' is already registered", descriptor.id);
        }
        info!(
            "Registered model '{}' ({}, version {})",
            descriptor.id, descriptor.task, descriptor.version
        );
        entries.insert(descriptor.id.clone(), Arc::new(ModelEntry::new(descriptor)));
        Ok(())
    }

    pub fn descriptor(&self, model_id: &str) -> Result<ModelDescriptor, EngineError> {
        Ok(self.entry(model_id)?.descriptor.clone())
    }

    fn entry(&self, model_id: &str) -> Result<Arc<ModelEntry>, EngineError> {
        self.inner
            .entries
            .read()
            .get(model_id)
            .cloned()
            .ok_or_else(|| EngineError::ModelNotFound {
                model_id: model_id.to_string(),
            })
    }

    /// Pins a model without loading it. Used for batches that are still filling up.
    pub fn lease(&self, model_id: &str) -> Result<ModelLease, EngineError> {
        let entry = self.entry(model_id)?;
        let _slot = entry.slot.lock();
        Ok(ModelLease::acquire(&entry))
    }

    /// Returns a handle to a Ready model, loading it first if needed.
    pub async fn ensure_ready(&self, model_id: &str) -> Result<ModelHandle, EngineError> {
        let entry = self.entry(model_id)?;

        let (lease, load) = {
            let mut slot = entry.slot.lock();
            let lease = ModelLease::acquire(&entry);
            let load = match &*slot {
                Slot::Ready(model) => {
                    return Ok(ModelHandle {
                        model: model.clone(),
                        lease,
                    })
                }
                Slot::Loading(load) => load.clone(),
                Slot::Unloaded => {
                    let load = self.start_load(entry.clone());
                    *slot = Slot::Loading(load.clone());
                    load
                }
            };
            (lease, load)
        };

        let model = load.await?;
        Ok(ModelHandle { model, lease })
    }

    /// Spawns the load so it completes even if every waiter goes away.
    /// Caller holds the entry's slot lock.
    fn start_load(&self, entry: Arc<ModelEntry>) -> SharedLoad {
        let inner = self.inner.clone();
        let model_id = entry.descriptor.id.clone();
        info!("Loading model '{model_id}'");

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = inner.load_entry(&entry).await;
            let mut slot = entry.slot.lock();
            match &result {
                Ok(model) => {
                    entry.loads.fetch_add(1, Ordering::Relaxed);
                    *slot = Slot::Ready(model.clone());
                    info!(
                        "Model '{}' ready in {}ms",
                        entry.descriptor.id,
                        started.elapsed().as_millis()
                    );
                }
                Err(e) => {
                    *slot = Slot::Unloaded;
                    warn!("Model '{}' failed to load: {e}", entry.descriptor.id);
                }
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(EngineError::model_load(
                    &model_id,
                    format!("load task aborted: {e}"),
                ))
            })
        }
        .boxed()
        .shared()
    }

    /// Unloads Ready models idle longer than `min(max_idle, descriptor.idle_unload)`.
    /// Leased models are skipped. Returns the ids that were unloaded.
    pub fn release_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let entries: Vec<Arc<ModelEntry>> = self.inner.entries.read().values().cloned().collect();

        let mut released = Vec::new();
        let mut freed_mb = 0;
        for entry in entries {
            let threshold = max_idle.min(entry.descriptor.idle_unload());
            let mut slot = entry.slot.lock();
            if !matches!(*slot, Slot::Ready(_))
                || entry.leases.load(Ordering::SeqCst) > 0
                || entry.idle_for(now) < threshold
            {
                continue;
            }
            *slot = Slot::Unloaded;
            freed_mb += entry.descriptor.memory_mb;
            released.push(entry.descriptor.id.clone());
        }

        if !released.is_empty() {
            self.inner.release_memory(freed_mb);
            info!("Released idle models: {}", released.join(", "));
        }
        released
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        let now = Instant::now();
        let mut statuses: Vec<ModelStatus> = self
            .inner
            .entries
            .read()
            .values()
            .map(|entry| ModelStatus {
                id: entry.descriptor.id.clone(),
                task: entry.descriptor.task,
                version: entry.descriptor.version.clone(),
                state: entry.slot.lock().state(),
                memory_mb: entry.descriptor.memory_mb,
                idle_secs: entry.idle_for(now).as_secs(),
                active_leases: entry.leases.load(Ordering::SeqCst),
                load_count: entry.loads.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

impl RegistryInner {
    async fn load_entry(&self, entry: &Arc<ModelEntry>) -> Result<LoadedModel, EngineError> {
        let descriptor = &entry.descriptor;
        self.reserve_memory(descriptor)?;

        let result = self.loader.load(descriptor).await.and_then(|model| {
            if model.kind() == descriptor.task {
                Ok(model)
            } else {
                Err(EngineError::model_load(
                    &descriptor.id,
                    format!("loader produced a {} model", model.kind()),
                ))
            }
        });
        if result.is_err() {
            self.release_memory(descriptor.memory_mb);
        }
        result
    }

    /// Charges `descriptor.memory_mb` against the budget, evicting least-recently-used
    /// unleased Ready models if needed.
    fn reserve_memory(&self, descriptor: &ModelDescriptor) -> Result<(), EngineError> {
        let needed = descriptor.memory_mb;
        if needed > self.memory_budget_mb {
            return Err(EngineError::model_load(
                &descriptor.id,
                format!(
                    "insufficient memory: needs {needed}MB, budget is {}MB",
                    self.memory_budget_mb
                ),
            ));
        }

        let mut reserved = self.reserved_mb.lock();
        while *reserved + needed > self.memory_budget_mb {
            match self.evict_lru(&descriptor.id) {
                Some(freed) => *reserved = reserved.saturating_sub(freed),
                None => {
                    return Err(EngineError::model_load(
                        &descriptor.id,
                        format!(
                            "insufficient memory: needs {needed}MB, {}MB of {}MB in use by pinned models",
                            *reserved, self.memory_budget_mb
                        ),
                    ))
                }
            }
        }
        *reserved += needed;
        Ok(())
    }

    fn evict_lru(&self, requesting: &str) -> Option<u64> {
        let now = Instant::now();
        let mut candidates: Vec<Arc<ModelEntry>> = self
            .entries
            .read()
            .values()
            .filter(|e| e.descriptor.id != requesting)
            .cloned()
            .collect();
        candidates.sort_by_key(|e| std::cmp::Reverse(e.idle_for(now)));

        for entry in candidates {
            let mut slot = entry.slot.lock();
            if matches!(*slot, Slot::Ready(_)) && entry.leases.load(Ordering::SeqCst) == 0 {
                *slot = Slot::Unloaded;
                info!(
                    "Evicted model '{}' to make room for '{requesting}'",
                    entry.descriptor.id
                );
                return Some(entry.descriptor.memory_mb);
            }
        }
        None
    }

    fn release_memory(&self, mb: u64) {
        let mut reserved = self.reserved_mb.lock();
        *reserved = reserved.saturating_sub(mb);
    }
}
