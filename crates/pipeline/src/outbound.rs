//! Outbound delivery collaborator boundary.

use async_trait::async_trait;

use spinline_common::ConversationKey;

/// What the provider reported back about a delivered message.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Provider-assigned id of the outbound message, when the API returns one.
    pub provider_message_id: Option<String>,
    pub delivered_at_ms: u64,
}

/// Sends reply text to the contact behind a conversation.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, key: &ConversationKey, text: &str) -> anyhow::Result<DeliveryResult>;
}
