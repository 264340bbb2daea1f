//! Ordered per-conversation buffer of not-yet-processed inbound messages.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use {async_trait::async_trait, tracing::debug};

use spinline_common::{ConversationKey, PendingMessage};

use crate::Result;

/// Per-conversation FIFO with atomic drain.
///
/// `drain_all` empties the queue and returns its contents in arrival order;
/// a second drain finds nothing, so a duplicate scheduled trigger cannot
/// produce a second reply cycle. `requeue_front` puts a failed batch back
/// ahead of anything that arrived mid-cycle.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn append(&self, key: &ConversationKey, message: PendingMessage) -> Result<()>;

    /// Atomically empty the queue, returning messages in arrival order.
    async fn drain_all(&self, key: &ConversationKey) -> Result<Vec<PendingMessage>>;

    /// Put a drained batch back at the head of the queue, preserving its
    /// internal order ahead of later arrivals.
    async fn requeue_front(
        &self,
        key: &ConversationKey,
        messages: Vec<PendingMessage>,
    ) -> Result<()>;

    async fn len(&self, key: &ConversationKey) -> Result<usize>;
}

/// In-memory queue backend. Single-process deployments and tests.
///
/// A single mutex over the whole map keeps drain-vs-append atomic without
/// per-key lock juggling; the queues only ever hold one debounce window's
/// worth of messages.
pub struct MemoryPendingQueue {
    queues: Mutex<HashMap<String, VecDeque<PendingMessage>>>,
}

impl MemoryPendingQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryPendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PendingQueue for MemoryPendingQueue {
    async fn append(&self, key: &ConversationKey, message: PendingMessage) -> Result<()> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(key.to_string()).or_default().push_back(message);
        Ok(())
    }

    async fn drain_all(&self, key: &ConversationKey) -> Result<Vec<PendingMessage>> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let drained = queues
            .remove(&key.to_string())
            .map(Vec::from)
            .unwrap_or_default();
        debug!(%key, count = drained.len(), "queue drained");
        Ok(drained)
    }

    async fn requeue_front(
        &self,
        key: &ConversationKey,
        messages: Vec<PendingMessage>,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let queue = queues.entry(key.to_string()).or_default();
        for message in messages.into_iter().rev() {
            queue.push_front(message);
        }
        Ok(())
    }

    async fn len(&self, key: &ConversationKey) -> Result<usize> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues.get(&key.to_string()).map_or(0, VecDeque::len))
    }
}
