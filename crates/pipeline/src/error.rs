use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Conversation/message persistence failed. Fail closed: nothing further
    /// is mutated and the provider's redelivery is the retry path.
    #[error(transparent)]
    Store(#[from] spinline_qualification::Error),

    /// A coordination primitive (dedup, lock, window, queue) failed. Same
    /// fail-closed policy as [`Error::Store`].
    #[error(transparent)]
    Batching(#[from] spinline_batching::Error),

    #[error(transparent)]
    Key(#[from] spinline_common::Error),

    /// Scheduling the drain kept failing; the window was cleared so the next
    /// inbound message re-opens it and re-schedules.
    #[error("drain scheduling failed after {attempts} attempts")]
    SchedulerUnavailable {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Reply generation failed; the drained batch was requeued at the front.
    #[error("reply generation failed")]
    ReplyGenerationFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The reply was generated but not delivered; the batch was requeued.
    #[error("outbound send failed")]
    SendFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid pipeline config: {message}")]
    InvalidConfig { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn scheduler_unavailable(attempts: u32, source: anyhow::Error) -> Self {
        Self::SchedulerUnavailable {
            attempts,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn reply_generation_failed(source: anyhow::Error) -> Self {
        Self::ReplyGenerationFailed {
            source: source.into(),
        }
    }

    #[must_use]
    pub fn send_failed(source: anyhow::Error) -> Self {
        Self::SendFailed {
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
