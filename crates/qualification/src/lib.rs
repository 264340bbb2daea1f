//! Sales-qualification state per conversation.
//!
//! A conversation walks the SPIN ladder (situation → problem → implication
//! → need-payoff → qualified), collecting free-text answers per stage. The
//! machine only records outcomes; judging answer quality is the reply
//! collaborator's job. Stage movement is monotonic: forward on completion,
//! never backward, except for an explicit reset.

pub mod error;
pub mod machine;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;

pub use {
    error::{Error, Result},
    machine::{ConversationSnapshot, QualificationState, Stage, StageAnswer, StageProgress},
    store::{Contact, Conversation, ConversationStatus, ConversationStore},
    store_memory::MemoryConversationStore,
    store_sqlite::SqliteConversationStore,
};

/// Run database migrations for the qualification crate.
///
/// Creates the `contacts`, `conversations`, and `messages` tables. Call at
/// application startup before constructing a [`SqliteConversationStore`]
/// from a shared pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
