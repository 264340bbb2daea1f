//! The ingestion coordinator and the lock-serialized drain-and-reply cycle.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, error, info, warn},
};

use {
    spinline_batching::{ConversationLock, DedupStore, PendingQueue, WindowTracker},
    spinline_common::{ConversationKey, InboundEvent, MessageRecord, PendingMessage, now_ms},
    spinline_qualification::{ConversationSnapshot, ConversationStore},
};

use crate::{
    Error, Result,
    config::PipelineConfig,
    generate::{ReplyContext, ReplyGenerator},
    outbound::OutboundSender,
    scheduler::{DrainJob, DrainScheduler},
};

/// How an inbound event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IngestStatus {
    /// Redelivery of an already-processed message; dropped before any mutation.
    Duplicate,
    /// First message of a burst; a drain was scheduled at the window expiry.
    Scheduled,
    /// Joined an already-open window; the existing drain will pick it up.
    Coalesced,
}

/// Result of [`IngestService::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub status: IngestStatus,
    /// Expiry of the batch window the message landed in, when one is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

/// Result of one drain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another cycle holds the conversation; nothing to do here.
    Contended,
    /// Queue was already empty (duplicate trigger, or handled by the holder).
    Empty,
    /// Conversation was closed externally; the batch was dropped unreplied.
    Dropped,
    Replied {
        message_count: usize,
    },
}

/// Everything the coordinator delegates to.
pub struct Collaborators {
    pub dedup: Arc<dyn DedupStore>,
    pub locks: Arc<dyn ConversationLock>,
    pub windows: Arc<dyn WindowTracker>,
    pub queue: Arc<dyn PendingQueue>,
    pub store: Arc<dyn ConversationStore>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub sender: Arc<dyn OutboundSender>,
    pub scheduler: Arc<dyn DrainScheduler>,
}

/// Coordinates inbound events into batched, lock-serialized reply cycles.
///
/// `ingest` may run concurrently for the same conversation, since it only
/// appends and coalesces. Only the drain cycle mutates qualification state
/// and sends, and the conversation lock keeps that to one cycle at a time.
pub struct IngestService {
    config: PipelineConfig,
    dedup: Arc<dyn DedupStore>,
    locks: Arc<dyn ConversationLock>,
    windows: Arc<dyn WindowTracker>,
    queue: Arc<dyn PendingQueue>,
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn ReplyGenerator>,
    sender: Arc<dyn OutboundSender>,
    scheduler: Arc<dyn DrainScheduler>,
}

impl IngestService {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            dedup: collaborators.dedup,
            locks: collaborators.locks,
            windows: collaborators.windows,
            queue: collaborators.queue,
            store: collaborators.store,
            generator: collaborators.generator,
            sender: collaborators.sender,
            scheduler: collaborators.scheduler,
        }))
    }

    /// Handle one canonical inbound event.
    pub async fn ingest(self: &Arc<Self>, event: InboundEvent) -> Result<IngestOutcome> {
        let key = event.conversation_key()?;

        if self.dedup.seen(&event.provider_message_id).await? {
            debug!(
                %key,
                provider_message_id = %event.provider_message_id,
                "duplicate delivery dropped"
            );
            return Ok(IngestOutcome {
                status: IngestStatus::Duplicate,
                expires_at_ms: None,
            });
        }

        // First message from a new identity creates contact and conversation.
        self.store
            .find_or_create_contact(&key, event.sender_display_name.as_deref())
            .await?;
        self.store.find_or_create_conversation(&key).await?;

        self.store
            .append_message(&key, MessageRecord::inbound(&event))
            .await?;
        self.queue
            .append(&key, PendingMessage::from_event(&event))
            .await?;

        let decision = self
            .windows
            .open_or_extend(&key, self.config.debounce_ms)
            .await?;
        if !decision.is_new_window {
            debug!(%key, expires_at_ms = decision.expires_at_ms, "coalesced into open window");
            return Ok(IngestOutcome {
                status: IngestStatus::Coalesced,
                expires_at_ms: Some(decision.expires_at_ms),
            });
        }

        info!(%key, expires_at_ms = decision.expires_at_ms, "window opened, scheduling drain");
        if let Err(err) = self.schedule_drain(decision.expires_at_ms, &key).await {
            // Clear the window so the next message reopens and reschedules
            // instead of coalescing into a window nobody will ever drain.
            if let Err(clear_err) = self.windows.clear(&key).await {
                warn!(%key, error = %clear_err, "window clear after scheduling failure failed");
            }
            return Err(err);
        }
        Ok(IngestOutcome {
            status: IngestStatus::Scheduled,
            expires_at_ms: Some(decision.expires_at_ms),
        })
    }

    /// Read-only qualification snapshot of the open conversation.
    pub async fn snapshot(&self, key: &ConversationKey) -> Result<Option<ConversationSnapshot>> {
        Ok(self
            .store
            .get_open_conversation(key)
            .await?
            .map(|conversation| conversation.state.snapshot()))
    }

    /// Run one drain-and-reply cycle. Invoked by the scheduler at window
    /// expiry; safe to invoke again on a duplicate trigger.
    pub async fn run_drain(self: &Arc<Self>, key: &ConversationKey) -> Result<DrainOutcome> {
        let Some(token) = self.locks.acquire(key, self.config.lock_ttl_ms).await? else {
            debug!(%key, "drain skipped, another cycle holds the conversation");
            return Ok(DrainOutcome::Contended);
        };
        let result = self.drain_locked(key).await;
        if let Err(err) = self.locks.release(key, &token).await {
            warn!(%key, error = %err, "lock release failed, TTL will reap it");
        }
        result
    }

    async fn drain_locked(self: &Arc<Self>, key: &ConversationKey) -> Result<DrainOutcome> {
        let batch = self.queue.drain_all(key).await?;
        if batch.is_empty() {
            self.windows.clear(key).await?;
            debug!(%key, "drain found nothing, batch already handled");
            return Ok(DrainOutcome::Empty);
        }

        match self.reply_cycle(key, &batch).await {
            Ok(outcome) => {
                self.windows.clear(key).await?;
                self.reschedule_late_arrivals(key).await?;
                Ok(outcome)
            },
            Err(err) => {
                // Never drop a drained batch without a delivered reply: put
                // it back ahead of anything that arrived mid-cycle, so the
                // next cycle re-delivers in the original order.
                if let Err(requeue_err) = self.queue.requeue_front(key, batch).await {
                    error!(%key, error = %requeue_err, "requeue after failed cycle also failed");
                }
                if let Err(clear_err) = self.windows.clear(key).await {
                    warn!(%key, error = %clear_err, "window clear after failed cycle failed");
                }
                Err(err)
            },
        }
    }

    async fn reply_cycle(
        &self,
        key: &ConversationKey,
        batch: &[PendingMessage],
    ) -> Result<DrainOutcome> {
        // The conversation may have been closed or superseded while the
        // batch was waiting; never reply into a closed conversation.
        let Some(conversation) = self.store.get_open_conversation(key).await? else {
            info!(%key, dropped = batch.len(), "conversation closed, dropping batch");
            return Ok(DrainOutcome::Dropped);
        };

        let history = self
            .store
            .recent_messages(key, self.config.history_limit)
            .await?;
        let context = ReplyContext {
            snapshot: conversation.state.snapshot(),
            history,
            batch: batch.to_vec(),
        };
        let reply = self
            .generator
            .generate(context)
            .await
            .map_err(Error::reply_generation_failed)?;

        let now = now_ms();
        let mut state = conversation.state;
        if let Some(update) = &reply.stage_update {
            for answer in &update.answers {
                state.record_answer(answer.stage, answer.text.clone(), now);
            }
            if let Some(stage) = update.completed {
                state.mark_completed(stage);
                state.advance(now);
            }
        }
        if let Some(score) = reply.score_update {
            state.set_score(score);
        }
        self.store.update_state(key, &state).await?;

        let delivery = self
            .sender
            .send(key, &reply.reply_text)
            .await
            .map_err(Error::send_failed)?;
        self.store
            .append_message(
                key,
                MessageRecord::outbound(reply.reply_text, delivery.delivered_at_ms),
            )
            .await?;

        info!(
            %key,
            batch = batch.len(),
            stage = state.stage().as_str(),
            "reply cycle complete"
        );
        Ok(DrainOutcome::Replied {
            message_count: batch.len(),
        })
    }

    /// Holder-side re-check: messages that arrived while this cycle ran
    /// found the lock taken and did not reschedule, so the holder opens a
    /// fresh window for them before letting go.
    async fn reschedule_late_arrivals(self: &Arc<Self>, key: &ConversationKey) -> Result<()> {
        let pending = self.queue.len(key).await?;
        if pending == 0 {
            return Ok(());
        }
        let decision = self
            .windows
            .open_or_extend(key, self.config.debounce_ms)
            .await?;
        if decision.is_new_window {
            info!(%key, pending, "late arrivals during cycle, follow-up drain scheduled");
            self.schedule_drain(decision.expires_at_ms, key).await?;
        }
        Ok(())
    }

    fn schedule_drain<'a>(
        self: &'a Arc<Self>,
        run_at_ms: u64,
        key: &'a ConversationKey,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                let service = Arc::clone(self);
                let job_key = key.clone();
                let job: DrainJob = Box::pin(async move {
                    if let Err(err) = service.run_drain(&job_key).await {
                        error!(key = %job_key, error = %err, "drain cycle failed");
                    }
                });
                match self.scheduler.schedule_at(run_at_ms, job).await {
                    Ok(()) => return Ok(()),
                    Err(err) if attempts <= self.config.scheduler_retries => {
                        warn!(%key, attempts, error = %err, "drain scheduling failed, retrying");
                        tokio::time::sleep(Duration::from_millis(
                            self.config.scheduler_retry_delay_ms,
                        ))
                        .await;
                    },
                    Err(err) => return Err(Error::scheduler_unavailable(attempts, err)),
                }
            }
        })
    }
}
