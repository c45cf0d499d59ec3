//! Disk tier: one JSON file per fingerprint, long TTL.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::cache::fingerprint::Fingerprint;
use crate::cache::CacheTier;
use crate::errors::EngineError;
use crate::models::embedding::EmbeddingVector;

const TIER: &str = "disk";

#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    stored_at: DateTime<Utc>,
    vector: EmbeddingVector,
}

fn unavailable(reason: impl ToString) -> EngineError {
    EngineError::CacheUnavailable {
        tier: TIER,
        reason: reason.to_string(),
    }
}

pub struct DiskTier {
    root: PathBuf,
    ttl: Duration,
}

impl DiskTier {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    /// `<root>/<first two hex chars>/<fingerprint>.json`
    fn path(&self, fp: &Fingerprint) -> PathBuf {
        let key = fp.as_str();
        self.root.join(&key[..2]).join(format!("{key}.json"))
    }

    fn is_expired(&self, stored_at: DateTime<Utc>) -> bool {
        let age = (Utc::now() - stored_at).to_std().unwrap_or(Duration::ZERO);
        age >= self.ttl
    }
}

#[async_trait]
impl CacheTier for DiskTier {
    fn name(&self) -> &'static str {
        TIER
    }

    async fn get(&self, fp: &Fingerprint) -> Result<Option<EmbeddingVector>, EngineError> {
        let path = self.path(fp);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(format!("{}: {e}", path.display()))),
        };

        let record = match serde_json::from_slice::<DiskRecord>(&raw) {
            Ok(record) => record,
            Err(e) => {
                debug!("Discarding unreadable disk entry {}: {e}", path.display());
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if self.is_expired(record.stored_at) {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(record.vector))
    }

    async fn put(&self, fp: &Fingerprint, vector: &EmbeddingVector) -> Result<(), EngineError> {
        let path = self.path(fp);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(unavailable)?;
        }

        let record = DiskRecord {
            stored_at: Utc::now(),
            vector: vector.clone(),
        };
        let payload = serde_json::to_vec(&record).map_err(unavailable)?;

        // Write-then-rename so readers never observe a partial file.
        let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, payload).await.map_err(unavailable)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(unavailable(e));
        }
        Ok(())
    }
}
