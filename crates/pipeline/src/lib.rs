//! Inbound message processing pipeline, from webhook event to delivered reply.
//!
//! Flow: canonical webhook event → dedup → persist message → append to
//! pending queue → open or join the debounce window → scheduled drain →
//! lock the conversation → drain the batch → generate reply → advance the
//! qualification machine → send → release.

pub mod config;
pub mod error;
pub mod generate;
pub mod outbound;
pub mod scheduler;
pub mod service;

pub use {
    config::PipelineConfig,
    error::{Error, Result},
    generate::{AnalyzedAnswer, GeneratedReply, ReplyContext, ReplyGenerator, StageUpdate},
    outbound::{DeliveryResult, OutboundSender},
    scheduler::{DrainJob, DrainScheduler, TokioDrainScheduler},
    service::{Collaborators, DrainOutcome, IngestOutcome, IngestService, IngestStatus},
};
