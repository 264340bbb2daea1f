//! In-memory conversation store for tests and single-process runs.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use spinline_common::{ConversationKey, MessageRecord, now_ms};

use crate::{
    Error, Result,
    machine::QualificationState,
    store::{Contact, Conversation, ConversationStatus, ConversationStore},
};

#[derive(Default)]
struct Inner {
    contacts: HashMap<String, Contact>,
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<MessageRecord>>,
}

/// In-memory store backed by `HashMap`. No persistence.
pub struct MemoryConversationStore {
    inner: Mutex<Inner>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_or_create_contact(
        &self,
        key: &ConversationKey,
        display_name: Option<&str>,
    ) -> Result<Contact> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let contact = inner
            .contacts
            .entry(key.to_string())
            .or_insert_with(|| Contact {
                id: uuid::Uuid::new_v4().to_string(),
                org_id: key.org_id().to_string(),
                external_id: key.contact_external_id().to_string(),
                display_name: display_name.map(str::to_string),
                created_at_ms: now_ms(),
            });
        // A later webhook may carry a name the first one lacked.
        if contact.display_name.is_none() {
            contact.display_name = display_name.map(str::to_string);
        }
        Ok(contact.clone())
    }

    async fn find_or_create_conversation(&self, key: &ConversationKey) -> Result<Conversation> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(open) = inner
            .conversations
            .iter()
            .find(|c| c.conversation_key == *key && c.is_open())
        {
            return Ok(open.clone());
        }
        let now = now_ms();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_key: key.clone(),
            status: ConversationStatus::Open,
            state: QualificationState::new(now),
            created_at_ms: now,
            updated_at_ms: now,
        };
        inner.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn get_open_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .conversations
            .iter()
            .find(|c| c.conversation_key == *key && c.is_open())
            .cloned())
    }

    async fn append_message(&self, key: &ConversationKey, record: MessageRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.messages.entry(key.to_string()).or_default().push(record);
        Ok(())
    }

    async fn recent_messages(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let messages = inner
            .messages
            .get(&key.to_string())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn update_state(&self, key: &ConversationKey, state: &QualificationState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(open) = inner
            .conversations
            .iter_mut()
            .find(|c| c.conversation_key == *key && c.is_open())
        else {
            return Err(Error::conversation_not_found(key.to_string()));
        };
        open.state = state.clone();
        open.updated_at_ms = now_ms();
        Ok(())
    }

    async fn close_conversation(&self, key: &ConversationKey) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(open) = inner
            .conversations
            .iter_mut()
            .find(|c| c.conversation_key == *key && c.is_open())
        else {
            return Ok(false);
        };
        open.status = ConversationStatus::Closed;
        open.updated_at_ms = now_ms();
        Ok(true)
    }
}
