//! Per-conversation coordination primitives for inbound message batching.
//!
//! Four keyed, atomic stores back the ingestion pipeline: a dedup store
//! (idempotent ingestion under at-least-once delivery), a conversation lock
//! (one drain cycle per conversation), a batch window tracker (debounce
//! coalescing), and a pending-message queue (ordered buffer with atomic
//! drain). Each has an in-memory backend and a SQLite backend so several
//! coordinator instances can share one database.

pub mod dedup;
pub mod error;
pub mod lock;
pub mod queue;
pub mod sqlite;
pub mod window;

pub use {
    dedup::{DedupStore, MemoryDedupStore},
    error::{Error, Result},
    lock::{ConversationLock, LockToken, MemoryConversationLock},
    queue::{MemoryPendingQueue, PendingQueue},
    sqlite::SqliteBatchingStore,
    window::{MemoryWindowTracker, WindowDecision, WindowTracker},
};

/// Run database migrations for the batching crate.
///
/// Creates the `dedup_records`, `conversation_locks`, `batch_windows`, and
/// `pending_messages` tables. Call at application startup before
/// constructing a [`SqliteBatchingStore`] from a shared pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
