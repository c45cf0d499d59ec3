use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::cache::fingerprint::Fingerprint;
use crate::models::embedding::EmbeddingVector;

struct Entry {
    vector: EmbeddingVector,
    expires_at: Instant,
}

/// Process-local tier: bounded LRU map whose entries also expire after `ttl`.
pub struct LocalTier {
    entries: Mutex<LruCache<Fingerprint, Entry>>,
    ttl: Duration,
}

impl LocalTier {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Marks the entry as most recently used on hit. Expired entries are dropped.
    pub fn get(&self, fp: &Fingerprint) -> Option<EmbeddingVector> {
        let mut entries = self.entries.lock();
        let live = entries
            .get(fp)
            .map(|entry| (entry.expires_at > Instant::now()).then(|| entry.vector.clone()));
        match live {
            Some(Some(vector)) => Some(vector),
            Some(None) => {
                entries.pop(fp);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, fp: Fingerprint, vector: EmbeddingVector) {
        let entry = Entry {
            vector,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().put(fp, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn vector(fp: &Fingerprint) -> EmbeddingVector {
        EmbeddingVector {
            source_hash: fp.to_string(),
            model_id: "m".to_string(),
            model_version: "v1".to_string(),
            values: vec![1.0, 2.0],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_least_recently_used_entry_is_evicted() {
        let tier = LocalTier::new(NonZeroUsize::new(2).unwrap(), Duration::from_secs(60));
        let a = Fingerprint::compute("a", "m", "v1");
        let b = Fingerprint::compute("b", "m", "v1");
        let c = Fingerprint::compute("c", "m", "v1");

        tier.put(a.clone(), vector(&a));
        tier.put(b.clone(), vector(&b));
        // Touch `a` so `b` becomes the eviction candidate.
        assert!(tier.get(&a).is_some());
        tier.put(c.clone(), vector(&c));

        assert!(tier.get(&a).is_some());
        assert!(tier.get(&b).is_none());
        assert!(tier.get(&c).is_some());
        assert_eq!(tier.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let tier = LocalTier::new(NonZeroUsize::new(4).unwrap(), Duration::from_secs(60));
        let fp = Fingerprint::compute("a", "m", "v1");
        tier.put(fp.clone(), vector(&fp));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(tier.get(&fp).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(tier.get(&fp).is_none());
        assert_eq!(tier.len(), 0);
    }
}
