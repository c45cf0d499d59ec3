//! Shared key-value tier (Redis in production).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client as RedisClient;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::fingerprint::Fingerprint;
use crate::cache::CacheTier;
use crate::errors::EngineError;
use crate::models::embedding::EmbeddingVector;

const TIER: &str = "remote";

/// Minimal `get/set/expire` surface of the shared store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError>;
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), EngineError>;
}

fn unavailable(reason: impl ToString) -> EngineError {
    EngineError::CacheUnavailable {
        tier: TIER,
        reason: reason.to_string(),
    }
}

pub struct RedisKvStore {
    client: RedisClient,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisKvStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            connection: Mutex::new(None),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, EngineError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drops the cached connection so the next call reconnects.
    async fn reset(&self) {
        *self.connection.lock().await = None;
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<Vec<u8>>> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.reset().await;
                Err(unavailable(e))
            }
        }
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), EngineError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            self.reset().await;
            return Err(unavailable(e));
        }
        Ok(())
    }
}

/// Stores serialized vectors under `<prefix>:<fingerprint>` with a TTL.
pub struct RemoteTier {
    store: Arc<dyn KvStore>,
    prefix: String,
    ttl: Duration,
    op_timeout: Duration,
}

impl RemoteTier {
    pub fn new(store: Arc<dyn KvStore>, prefix: String, ttl: Duration, op_timeout: Duration) -> Self {
        Self {
            store,
            prefix,
            ttl,
            op_timeout,
        }
    }

    fn key(&self, fp: &Fingerprint) -> String {
        format!("{}:{}", self.prefix, fp)
    }
}

#[async_trait]
impl CacheTier for RemoteTier {
    fn name(&self) -> &'static str {
        TIER
    }

    async fn get(&self, fp: &Fingerprint) -> Result<Option<EmbeddingVector>, EngineError> {
        let raw = tokio::time::timeout(self.op_timeout, self.store.get(&self.key(fp)))
            .await
            .map_err(|_| unavailable("GET timed out"))??;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_slice::<EmbeddingVector>(&raw) {
            Ok(vector) => Ok(Some(vector)),
            Err(e) => {
                // Undecodable payloads are treated as absent; the write-through repairs them.
                debug!("Discarding undecodable remote entry {fp}: {e}");
                Ok(None)
            }
        }
    }

    async fn put(&self, fp: &Fingerprint, vector: &EmbeddingVector) -> Result<(), EngineError> {
        let payload = serde_json::to_vec(vector).map_err(unavailable)?;
        tokio::time::timeout(
            self.op_timeout,
            self.store.set_ex(&self.key(fp), payload, self.ttl),
        )
        .await
        .map_err(|_| unavailable("SET timed out"))?
    }
}
