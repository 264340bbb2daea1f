//! Persistence trait for contacts, conversations, and their messages.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use spinline_common::{ConversationKey, MessageRecord};

use crate::{Result, machine::QualificationState};

/// A chat contact, resolved from the provider-assigned external identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub org_id: String,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Open,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// One qualification run with a contact.
///
/// Conversations are never deleted. Closing one marks it superseded; the
/// next find-or-create under the same key opens a fresh conversation with a
/// fresh state, so history stays readable forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub conversation_key: ConversationKey,
    pub status: ConversationStatus,
    pub state: QualificationState,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Conversation {
    pub fn is_open(&self) -> bool {
        self.status == ConversationStatus::Open
    }
}

/// Storage for contacts, conversations, and the permanent message log.
///
/// Creates are idempotent: the first message from a new external identity
/// creates the contact and conversation rows, concurrent creators converge
/// on one row.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_or_create_contact(
        &self,
        key: &ConversationKey,
        display_name: Option<&str>,
    ) -> Result<Contact>;

    /// Return the open conversation for `key`, creating one if none exists.
    async fn find_or_create_conversation(&self, key: &ConversationKey) -> Result<Conversation>;

    /// The open conversation for `key`, if any. Never creates.
    async fn get_open_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>>;

    /// Append to the permanent message log.
    async fn append_message(&self, key: &ConversationKey, record: MessageRecord) -> Result<()>;

    /// The most recent `limit` messages for `key`, oldest first.
    async fn recent_messages(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;

    /// Persist the qualification state of the open conversation.
    ///
    /// Fails with [`crate::Error::ConversationNotFound`] if no conversation
    /// is open for `key`.
    async fn update_state(&self, key: &ConversationKey, state: &QualificationState) -> Result<()>;

    /// Mark the open conversation closed. Returns `false` if none was open.
    async fn close_conversation(&self, key: &ConversationKey) -> Result<bool>;
}
