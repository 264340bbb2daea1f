//! SQLite-backed coordination stores using sqlx.
//!
//! One pool serves all four primitives so several pipeline instances can
//! coordinate through a shared database. Atomicity comes from single
//! conditional-upsert statements (set-if-absent-with-TTL) and short
//! transactions (atomic drain); SQLite serializes the writers.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tracing::debug,
};

use spinline_common::{ConversationKey, PendingMessage, now_ms};

use crate::{
    Result,
    dedup::DedupStore,
    lock::{ConversationLock, LockToken},
    queue::PendingQueue,
    window::{WindowDecision, WindowTracker},
};

/// SQLite backend for dedup records, locks, windows, and pending messages.
pub struct SqliteBatchingStore {
    pool: SqlitePool,
    dedup_ttl_ms: u64,
}

impl SqliteBatchingStore {
    /// Create a store with its own connection pool and run migrations.
    ///
    /// For shared pools use [`SqliteBatchingStore::with_pool`] after calling
    /// [`crate::run_migrations`].
    pub async fn new(database_url: &str, dedup_ttl_ms: u64) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool, dedup_ttl_ms })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool, dedup_ttl_ms: u64) -> Self {
        Self { pool, dedup_ttl_ms }
    }
}

#[async_trait]
impl DedupStore for SqliteBatchingStore {
    async fn seen(&self, provider_message_id: &str) -> Result<bool> {
        let now = now_ms() as i64;
        // Insert-or-re-mark in one statement: the conditional upsert only
        // touches a row whose retention has lapsed, so rows_affected == 0
        // means a live record already existed.
        let result = sqlx::query(
            "INSERT INTO dedup_records (provider_message_id, expires_at_ms) VALUES (?, ?)
             ON CONFLICT(provider_message_id) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
             WHERE dedup_records.expires_at_ms <= ?",
        )
        .bind(provider_message_id)
        .bind(now + self.dedup_ttl_ms as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 0)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dedup_records WHERE expires_at_ms <= ?")
            .bind(now_ms() as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ConversationLock for SqliteBatchingStore {
    async fn acquire(&self, key: &ConversationKey, ttl_ms: u64) -> Result<Option<LockToken>> {
        let now = now_ms() as i64;
        let token = LockToken::fresh();
        let result = sqlx::query(
            "INSERT INTO conversation_locks (conversation_key, holder_token, expires_at_ms)
             VALUES (?, ?, ?)
             ON CONFLICT(conversation_key) DO UPDATE SET
               holder_token = excluded.holder_token,
               expires_at_ms = excluded.expires_at_ms
             WHERE conversation_locks.expires_at_ms <= ?",
        )
        .bind(key.to_string())
        .bind(token.as_str())
        .bind(now + ttl_ms as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            debug!(%key, "lock contended");
            return Ok(None);
        }
        Ok(Some(token))
    }

    async fn release(&self, key: &ConversationKey, token: &LockToken) -> Result<()> {
        sqlx::query(
            "DELETE FROM conversation_locks WHERE conversation_key = ? AND holder_token = ?",
        )
        .bind(key.to_string())
        .bind(token.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WindowTracker for SqliteBatchingStore {
    async fn open_or_extend(
        &self,
        key: &ConversationKey,
        delay_ms: u64,
    ) -> Result<WindowDecision> {
        let now = now_ms() as i64;
        let expires_at_ms = now + delay_ms as i64;
        let result = sqlx::query(
            "INSERT INTO batch_windows (conversation_key, expires_at_ms) VALUES (?, ?)
             ON CONFLICT(conversation_key) DO UPDATE SET expires_at_ms = excluded.expires_at_ms
             WHERE batch_windows.expires_at_ms <= ?",
        )
        .bind(key.to_string())
        .bind(expires_at_ms)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(%key, expires_at_ms, "window opened");
            return Ok(WindowDecision {
                is_new_window: true,
                expires_at_ms: expires_at_ms as u64,
            });
        }

        let existing: i64 =
            sqlx::query_scalar("SELECT expires_at_ms FROM batch_windows WHERE conversation_key = ?")
                .bind(key.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(WindowDecision {
            is_new_window: false,
            expires_at_ms: existing as u64,
        })
    }

    async fn clear(&self, key: &ConversationKey) -> Result<()> {
        sqlx::query("DELETE FROM batch_windows WHERE conversation_key = ?")
            .bind(key.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PendingQueue for SqliteBatchingStore {
    async fn append(&self, key: &ConversationKey, message: PendingMessage) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM pending_messages WHERE conversation_key = ?",
        )
        .bind(key.to_string())
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO pending_messages
               (conversation_key, position, provider_message_id, sender_display_name, body, timestamp_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(key.to_string())
        .bind(next)
        .bind(&message.provider_message_id)
        .bind(&message.sender_display_name)
        .bind(&message.text)
        .bind(message.timestamp_ms as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn drain_all(&self, key: &ConversationKey) -> Result<Vec<PendingMessage>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT provider_message_id, sender_display_name, body, timestamp_ms
             FROM pending_messages WHERE conversation_key = ?
             ORDER BY position, id",
        )
        .bind(key.to_string())
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM pending_messages WHERE conversation_key = ?")
            .bind(key.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let drained = rows
            .into_iter()
            .map(|row| PendingMessage {
                provider_message_id: row.get("provider_message_id"),
                sender_display_name: row.get("sender_display_name"),
                text: row.get("body"),
                timestamp_ms: row.get::<i64, _>("timestamp_ms") as u64,
            })
            .collect::<Vec<_>>();
        debug!(%key, count = drained.len(), "queue drained");
        Ok(drained)
    }

    async fn requeue_front(
        &self,
        key: &ConversationKey,
        messages: Vec<PendingMessage>,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        let min: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MIN(position), 0) FROM pending_messages WHERE conversation_key = ?",
        )
        .bind(key.to_string())
        .fetch_one(&mut *tx)
        .await?;
        let base = min - messages.len() as i64;
        for (offset, message) in messages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO pending_messages
                   (conversation_key, position, provider_message_id, sender_display_name, body, timestamp_ms)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(key.to_string())
            .bind(base + offset as i64)
            .bind(&message.provider_message_id)
            .bind(&message.sender_display_name)
            .bind(&message.text)
            .bind(message.timestamp_ms as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn len(&self, key: &ConversationKey) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pending_messages WHERE conversation_key = ?")
                .bind(key.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    async fn test_store(dedup_ttl_ms: u64) -> SqliteBatchingStore {
        SqliteBatchingStore::new("sqlite::memory:", dedup_ttl_ms)
            .await
            .unwrap()
    }

    fn key() -> ConversationKey {
        ConversationKey::new("acme", "c1").unwrap()
    }

    fn msg(id: &str, at: u64) -> PendingMessage {
        PendingMessage {
            provider_message_id: id.into(),
            text: format!("text-{id}"),
            timestamp_ms: at,
            sender_display_name: None,
        }
    }

    #[tokio::test]
    async fn dedup_check_and_mark() {
        let store = test_store(60_000).await;
        assert!(!store.seen("wamid.1").await.unwrap());
        assert!(store.seen("wamid.1").await.unwrap());
        assert!(!store.seen("wamid.2").await.unwrap());
    }

    #[tokio::test]
    async fn dedup_expired_record_remarks() {
        let store = test_store(10).await;
        assert!(!store.seen("wamid.1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.seen("wamid.1").await.unwrap());
    }

    #[tokio::test]
    async fn dedup_purge() {
        let store = test_store(10).await;
        store.seen("wamid.1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lock_acquire_contend_release() {
        let store = test_store(60_000).await;
        let token = store.acquire(&key(), 60_000).await.unwrap().unwrap();
        assert!(store.acquire(&key(), 60_000).await.unwrap().is_none());
        store.release(&key(), &token).await.unwrap();
        assert!(store.acquire(&key(), 60_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lock_stale_release_ignored() {
        let store = test_store(60_000).await;
        let first = store.acquire(&key(), 10).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _second = store.acquire(&key(), 60_000).await.unwrap().unwrap();
        store.release(&key(), &first).await.unwrap();
        assert!(store.acquire(&key(), 60_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn window_coalesces_until_cleared() {
        let store = test_store(60_000).await;
        let first = store.open_or_extend(&key(), 60_000).await.unwrap();
        assert!(first.is_new_window);
        let second = store.open_or_extend(&key(), 60_000).await.unwrap();
        assert!(!second.is_new_window);
        assert_eq!(second.expires_at_ms, first.expires_at_ms);

        store.clear(&key()).await.unwrap();
        assert!(
            store
                .open_or_extend(&key(), 60_000)
                .await
                .unwrap()
                .is_new_window
        );
    }

    #[tokio::test]
    async fn window_expired_reopens() {
        let store = test_store(60_000).await;
        store.open_or_extend(&key(), 10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(
            store
                .open_or_extend(&key(), 60_000)
                .await
                .unwrap()
                .is_new_window
        );
    }

    #[tokio::test]
    async fn queue_order_and_idempotent_drain() {
        let store = test_store(60_000).await;
        store.append(&key(), msg("m0", 0)).await.unwrap();
        store.append(&key(), msg("m1", 2000)).await.unwrap();
        store.append(&key(), msg("m2", 4000)).await.unwrap();

        let drained = store.drain_all(&key()).await.unwrap();
        let ids: Vec<&str> = drained
            .iter()
            .map(|m| m.provider_message_id.as_str())
            .collect();
        assert_eq!(ids, ["m0", "m1", "m2"]);
        assert!(store.drain_all(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_requeue_front_order() {
        let store = test_store(60_000).await;
        store.append(&key(), msg("m0", 0)).await.unwrap();
        store.append(&key(), msg("m1", 1000)).await.unwrap();
        let batch = store.drain_all(&key()).await.unwrap();

        store.append(&key(), msg("m2", 2000)).await.unwrap();
        store.requeue_front(&key(), batch).await.unwrap();

        let drained = store.drain_all(&key()).await.unwrap();
        let ids: Vec<&str> = drained
            .iter()
            .map(|m| m.provider_message_id.as_str())
            .collect();
        assert_eq!(ids, ["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn queue_len() {
        let store = test_store(60_000).await;
        assert_eq!(store.len(&key()).await.unwrap(), 0);
        store.append(&key(), msg("m0", 0)).await.unwrap();
        assert_eq!(store.len(&key()).await.unwrap(), 1);
    }
}
