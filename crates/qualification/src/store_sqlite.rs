//! SQLite-backed conversation store using sqlx.
//!
//! Contacts and messages are plain columns; qualification state is stored
//! as a JSON column on the conversation row so state shape changes do not
//! need schema migrations.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use spinline_common::{ConversationKey, MessageDirection, MessageRecord, now_ms};

use crate::{
    Error, Result,
    machine::QualificationState,
    store::{Contact, Conversation, ConversationStatus, ConversationStore},
};

/// SQLite backend for contacts, conversations, and the message log.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Create a store with its own connection pool and run migrations.
    ///
    /// For shared pools use [`SqliteConversationStore::with_pool`] after
    /// calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation> {
    let key: String = row.get("conversation_key");
    let status: String = row.get("status");
    let state: String = row.get("state");
    Ok(Conversation {
        id: row.get("id"),
        conversation_key: key
            .parse()
            .map_err(|e: spinline_common::Error| Error::message(e.to_string()))?,
        status: if status == "closed" {
            ConversationStatus::Closed
        } else {
            ConversationStatus::Open
        },
        state: serde_json::from_str(&state)?,
        created_at_ms: row.get::<i64, _>("created_at_ms") as u64,
        updated_at_ms: row.get::<i64, _>("updated_at_ms") as u64,
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn find_or_create_contact(
        &self,
        key: &ConversationKey,
        display_name: Option<&str>,
    ) -> Result<Contact> {
        sqlx::query(
            "INSERT INTO contacts (id, org_id, external_id, display_name, created_at_ms)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(org_id, external_id) DO UPDATE SET
               display_name = COALESCE(contacts.display_name, excluded.display_name)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(key.org_id())
        .bind(key.contact_external_id())
        .bind(display_name)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;

        // Read back: handles the race where two deliveries insert at once.
        let row = sqlx::query(
            "SELECT id, org_id, external_id, display_name, created_at_ms
             FROM contacts WHERE org_id = ? AND external_id = ?",
        )
        .bind(key.org_id())
        .bind(key.contact_external_id())
        .fetch_one(&self.pool)
        .await?;
        Ok(Contact {
            id: row.get("id"),
            org_id: row.get("org_id"),
            external_id: row.get("external_id"),
            display_name: row.get("display_name"),
            created_at_ms: row.get::<i64, _>("created_at_ms") as u64,
        })
    }

    async fn find_or_create_conversation(&self, key: &ConversationKey) -> Result<Conversation> {
        let now = now_ms() as i64;
        let state = serde_json::to_string(&QualificationState::new(now as u64))?;
        // The partial unique index on open conversations makes this a
        // create-if-none-open; a concurrent creator loses the conflict and
        // both read back the same row.
        sqlx::query(
            "INSERT INTO conversations (id, conversation_key, status, state, created_at_ms, updated_at_ms)
             VALUES (?, ?, 'open', ?, ?, ?)
             ON CONFLICT(conversation_key) WHERE status = 'open' DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(key.to_string())
        .bind(&state)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, conversation_key, status, state, created_at_ms, updated_at_ms
             FROM conversations WHERE conversation_key = ? AND status = 'open'",
        )
        .bind(key.to_string())
        .fetch_one(&self.pool)
        .await?;
        row_to_conversation(&row)
    }

    async fn get_open_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, conversation_key, status, state, created_at_ms, updated_at_ms
             FROM conversations WHERE conversation_key = ? AND status = 'open'",
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn append_message(&self, key: &ConversationKey, record: MessageRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages
               (conversation_key, direction, provider_message_id, sender_display_name, body, timestamp_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(key.to_string())
        .bind(record.direction.as_str())
        .bind(&record.provider_message_id)
        .bind(&record.sender_display_name)
        .bind(&record.body)
        .bind(record.timestamp_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT direction, provider_message_id, sender_display_name, body, timestamp_ms
             FROM messages WHERE conversation_key = ?
             ORDER BY id DESC LIMIT ?",
        )
        .bind(key.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<MessageRecord> = rows
            .into_iter()
            .map(|row| {
                let direction: String = row.get("direction");
                MessageRecord {
                    direction: if direction == "outbound" {
                        MessageDirection::Outbound
                    } else {
                        MessageDirection::Inbound
                    },
                    provider_message_id: row.get("provider_message_id"),
                    sender_display_name: row.get("sender_display_name"),
                    body: row.get("body"),
                    timestamp_ms: row.get::<i64, _>("timestamp_ms") as u64,
                }
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    async fn update_state(&self, key: &ConversationKey, state: &QualificationState) -> Result<()> {
        let data = serde_json::to_string(state)?;
        let result = sqlx::query(
            "UPDATE conversations SET state = ?, updated_at_ms = ?
             WHERE conversation_key = ? AND status = 'open'",
        )
        .bind(&data)
        .bind(now_ms() as i64)
        .bind(key.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::conversation_not_found(key.to_string()));
        }
        Ok(())
    }

    async fn close_conversation(&self, key: &ConversationKey) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET status = 'closed', updated_at_ms = ?
             WHERE conversation_key = ? AND status = 'open'",
        )
        .bind(now_ms() as i64)
        .bind(key.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::machine::Stage};

    async fn test_store() -> SqliteConversationStore {
        SqliteConversationStore::new("sqlite::memory:").await.unwrap()
    }

    fn key() -> ConversationKey {
        ConversationKey::new("acme", "c1").unwrap()
    }

    #[tokio::test]
    async fn contact_create_is_idempotent() {
        let store = test_store().await;
        let first = store.find_or_create_contact(&key(), None).await.unwrap();
        let second = store
            .find_or_create_contact(&key(), Some("Ada"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn contact_name_is_not_overwritten() {
        let store = test_store().await;
        store
            .find_or_create_contact(&key(), Some("Ada"))
            .await
            .unwrap();
        let again = store
            .find_or_create_contact(&key(), Some("Someone Else"))
            .await
            .unwrap();
        assert_eq!(again.display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn conversation_roundtrip() {
        let store = test_store().await;
        let created = store.find_or_create_conversation(&key()).await.unwrap();
        assert!(created.is_open());
        assert_eq!(created.state.stage(), Stage::Situation);

        let again = store.find_or_create_conversation(&key()).await.unwrap();
        assert_eq!(created.id, again.id);
    }

    #[tokio::test]
    async fn close_then_fresh_conversation() {
        let store = test_store().await;
        let first = store.find_or_create_conversation(&key()).await.unwrap();
        assert!(store.close_conversation(&key()).await.unwrap());
        assert!(store.get_open_conversation(&key()).await.unwrap().is_none());
        assert!(!store.close_conversation(&key()).await.unwrap());

        let next = store.find_or_create_conversation(&key()).await.unwrap();
        assert_ne!(first.id, next.id);
    }

    #[tokio::test]
    async fn state_roundtrips_through_json_column() {
        let store = test_store().await;
        store.find_or_create_conversation(&key()).await.unwrap();

        let mut state = QualificationState::new(0);
        state.record_answer(Stage::Situation, "we sell shoes", 1);
        state.mark_completed(Stage::Situation);
        state.advance(2);
        store.update_state(&key(), &state).await.unwrap();

        let loaded = store.get_open_conversation(&key()).await.unwrap().unwrap();
        assert_eq!(loaded.state, state);
    }

    #[tokio::test]
    async fn update_state_without_open_conversation_fails() {
        let store = test_store().await;
        let state = QualificationState::new(0);
        assert!(matches!(
            store.update_state(&key(), &state).await,
            Err(Error::ConversationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn message_log_roundtrip() {
        let store = test_store().await;
        for i in 0..5u64 {
            store
                .append_message(
                    &key(),
                    MessageRecord {
                        direction: MessageDirection::Inbound,
                        provider_message_id: Some(format!("m{i}")),
                        sender_display_name: None,
                        body: format!("body {i}"),
                        timestamp_ms: i,
                    },
                )
                .await
                .unwrap();
        }
        store
            .append_message(&key(), MessageRecord::outbound("our reply", 10))
            .await
            .unwrap();

        let recent = store.recent_messages(&key(), 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].provider_message_id.as_deref(), Some("m3"));
        assert_eq!(recent[2].direction, MessageDirection::Outbound);
        assert!(recent[2].provider_message_id.is_none());
    }
}
