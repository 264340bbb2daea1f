//! The canonical event shape and identifiers every spinline crate works on.

pub mod error;
pub mod types;

pub use {
    error::{Error, Result, SpinlineError},
    types::{
        ConversationKey, InboundEvent, MessageDirection, MessageRecord, PendingMessage, now_ms,
    },
};
