//! Reply-generation collaborator boundary.
//!
//! The pipeline hands over an ordered context and receives text plus a
//! structured qualification analysis. What the collaborator does inside
//! (prompting, model choice) is its own business.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use {
    spinline_common::{MessageRecord, PendingMessage},
    spinline_qualification::{ConversationSnapshot, Stage},
};

/// Everything reply generation gets to look at: the drained batch in
/// arrival order plus recent conversation context.
#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub snapshot: ConversationSnapshot,
    /// Recent persisted messages, oldest first. Includes prior replies.
    pub history: Vec<MessageRecord>,
    /// The batch being answered, in arrival order.
    pub batch: Vec<PendingMessage>,
}

/// One answer the collaborator extracted from the batch, attributed to a
/// qualification stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedAnswer {
    pub stage: Stage,
    pub text: String,
}

/// The collaborator's qualification analysis for one reply cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageUpdate {
    #[serde(default)]
    pub answers: Vec<AnalyzedAnswer>,
    /// A stage whose collection criteria this batch satisfied, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<Stage>,
}

/// Result of one reply-generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedReply {
    pub reply_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_update: Option<StageUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_update: Option<u8>,
}

/// Produces the outbound reply for a drained batch.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, context: ReplyContext) -> anyhow::Result<GeneratedReply>;
}
