//! Duplicate suppression for redelivered provider messages.

use {async_trait::async_trait, dashmap::DashMap, tracing::debug};

use spinline_common::now_ms;

use crate::Result;

/// Tracks recently-seen provider message ids for a bounded retention period.
///
/// `seen` is an atomic check-and-mark: the first call for an id within the
/// retention period returns `false` and records it; later calls return
/// `true` until the record expires. Expired records are treated as unseen
/// and re-marked, trading a small duplicate-processing risk for bounded
/// storage.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn seen(&self, provider_message_id: &str) -> Result<bool>;

    /// Remove expired records. Returns the number purged.
    async fn purge_expired(&self) -> Result<u64>;
}

/// In-memory dedup backend. Single-process deployments and tests.
pub struct MemoryDedupStore {
    records: DashMap<String, u64>,
    ttl_ms: u64,
}

impl MemoryDedupStore {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            records: DashMap::new(),
            ttl_ms,
        }
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn seen(&self, provider_message_id: &str) -> Result<bool> {
        let now = now_ms();
        // The entry guard holds the shard lock, so check-and-mark is atomic
        // per id even under concurrent webhook deliveries.
        let mut entry = self
            .records
            .entry(provider_message_id.to_string())
            .or_insert(0);
        let live = *entry > now;
        if !live {
            *entry = now + self.ttl_ms;
            debug!(provider_message_id, "dedup: first sighting");
        }
        Ok(live)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = now_ms();
        let before = self.records.len();
        self.records.retain(|_, expires_at| *expires_at > now);
        Ok((before - self.records.len()) as u64)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[tokio::test]
    async fn first_sighting_is_not_seen() {
        let store = MemoryDedupStore::new(60_000);
        assert!(!store.seen("wamid.1").await.unwrap());
        assert!(store.seen("wamid.1").await.unwrap());
        assert!(store.seen("wamid.1").await.unwrap());
    }

    #[tokio::test]
    async fn distinct_ids_are_independent() {
        let store = MemoryDedupStore::new(60_000);
        assert!(!store.seen("wamid.1").await.unwrap());
        assert!(!store.seen("wamid.2").await.unwrap());
    }

    #[tokio::test]
    async fn expired_record_is_unseen_again() {
        let store = MemoryDedupStore::new(20);
        assert!(!store.seen("wamid.1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.seen("wamid.1").await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let store = MemoryDedupStore::new(20);
        store.seen("old").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.records.insert("fresh".into(), now_ms() + 60_000);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.records.contains_key("fresh"));
    }

    #[tokio::test]
    async fn concurrent_first_sightings_mark_exactly_once() {
        let store = std::sync::Arc::new(MemoryDedupStore::new(60_000));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.seen("wamid.race").await.unwrap() },
            ));
        }
        let mut unseen = 0;
        for handle in handles {
            if !handle.await.unwrap() {
                unseen += 1;
            }
        }
        assert_eq!(unseen, 1);
    }
}
