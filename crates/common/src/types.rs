//! Canonical inbound event and the identifiers shared by every spinline crate.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Stable identity of a conversation: the owning organization plus the
/// contact identifier assigned by the chat provider.
///
/// Rendered as `org:contact` wherever a flat string key is needed (lock
/// tables, window tables, queue keys). Segments must not contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationKey {
    org_id: String,
    contact_external_id: String,
}

impl ConversationKey {
    pub fn new(org_id: impl Into<String>, contact_external_id: impl Into<String>) -> Result<Self> {
        let org_id = org_id.into();
        let contact_external_id = contact_external_id.into();
        for segment in [&org_id, &contact_external_id] {
            if segment.is_empty() {
                return Err(Error::malformed_key(format!(
                    "{org_id}:{contact_external_id}"
                )));
            }
            if segment.contains(':') {
                return Err(Error::ReservedSeparator {
                    segment: segment.clone(),
                });
            }
        }
        Ok(Self {
            org_id,
            contact_external_id,
        })
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn contact_external_id(&self) -> &str {
        &self.contact_external_id
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.org_id, self.contact_external_id)
    }
}

impl FromStr for ConversationKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (org, contact) = s.split_once(':').ok_or_else(|| Error::malformed_key(s))?;
        Self::new(org, contact)
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ConversationKey> for String {
    fn from(key: ConversationKey) -> Self {
        key.to_string()
    }
}

/// Canonical inbound event, produced by the provider-specific webhook layer.
///
/// Everything downstream of the webhook parser works on this shape only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub org_id: String,
    pub contact_external_id: String,
    /// Provider-assigned message id, used for dedup under at-least-once delivery.
    pub provider_message_id: String,
    pub text: String,
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
}

impl InboundEvent {
    /// Derive the conversation key this event belongs to.
    pub fn conversation_key(&self) -> Result<ConversationKey> {
        ConversationKey::new(&self.org_id, &self.contact_external_id)
    }
}

/// An inbound message while it waits in the pending queue for its batch
/// window to close. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub provider_message_id: String,
    pub text: String,
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
}

impl PendingMessage {
    pub fn from_event(event: &InboundEvent) -> Self {
        Self {
            provider_message_id: event.provider_message_id.clone(),
            text: event.text.clone(),
            timestamp_ms: event.timestamp_ms,
            sender_display_name: event.sender_display_name.clone(),
        }
    }
}

/// Direction of a persisted message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// A message as persisted permanently by the conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub direction: MessageDirection,
    /// Absent for outbound records: the provider assigns ids on delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    pub body: String,
    pub timestamp_ms: u64,
}

impl MessageRecord {
    pub fn inbound(event: &InboundEvent) -> Self {
        Self {
            direction: MessageDirection::Inbound,
            provider_message_id: Some(event.provider_message_id.clone()),
            sender_display_name: event.sender_display_name.clone(),
            body: event.text.clone(),
            timestamp_ms: event.timestamp_ms,
        }
    }

    pub fn outbound(body: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            direction: MessageDirection::Outbound,
            provider_message_id: None,
            sender_display_name: None,
            body: body.into(),
            timestamp_ms,
        }
    }
}
