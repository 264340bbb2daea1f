//! Debounce window tracking: one reply cycle per burst of messages.

use {async_trait::async_trait, dashmap::DashMap, tracing::debug};

use spinline_common::{ConversationKey, now_ms};

use crate::Result;

/// Outcome of [`WindowTracker::open_or_extend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    /// True when this call opened a fresh window (caller must schedule a drain).
    pub is_new_window: bool,
    /// When the window closes and the drain should fire.
    pub expires_at_ms: u64,
}

/// Holds, per conversation, the expiry of the current debounce window.
///
/// The first message of a burst opens a window; messages arriving while it
/// is open share its expiry unchanged, so a burst produces one reply cycle
/// instead of one per message. At most one live window per conversation.
#[async_trait]
pub trait WindowTracker: Send + Sync {
    async fn open_or_extend(
        &self,
        key: &ConversationKey,
        delay_ms: u64,
    ) -> Result<WindowDecision>;

    /// Remove the window once its batch has been drained.
    async fn clear(&self, key: &ConversationKey) -> Result<()>;
}

/// In-memory window backend. Single-process deployments and tests.
pub struct MemoryWindowTracker {
    windows: DashMap<String, u64>,
}

impl MemoryWindowTracker {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }
}

impl Default for MemoryWindowTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowTracker for MemoryWindowTracker {
    async fn open_or_extend(
        &self,
        key: &ConversationKey,
        delay_ms: u64,
    ) -> Result<WindowDecision> {
        let now = now_ms();
        let mut entry = self.windows.entry(key.to_string()).or_insert(0);
        if *entry > now {
            debug!(%key, expires_at_ms = *entry, "window open, coalescing");
            return Ok(WindowDecision {
                is_new_window: false,
                expires_at_ms: *entry,
            });
        }
        let expires_at_ms = now + delay_ms;
        *entry = expires_at_ms;
        debug!(%key, expires_at_ms, "window opened");
        Ok(WindowDecision {
            is_new_window: true,
            expires_at_ms,
        })
    }

    async fn clear(&self, key: &ConversationKey) -> Result<()> {
        self.windows.remove(&key.to_string());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    fn key() -> ConversationKey {
        ConversationKey::new("acme", "c1").unwrap()
    }

    #[tokio::test]
    async fn burst_shares_one_window() {
        let tracker = MemoryWindowTracker::new();
        let first = tracker.open_or_extend(&key(), 60_000).await.unwrap();
        assert!(first.is_new_window);
        let second = tracker.open_or_extend(&key(), 60_000).await.unwrap();
        assert!(!second.is_new_window);
        assert_eq!(second.expires_at_ms, first.expires_at_ms);
    }

    #[tokio::test]
    async fn clear_then_reopen_is_new() {
        let tracker = MemoryWindowTracker::new();
        tracker.open_or_extend(&key(), 60_000).await.unwrap();
        tracker.clear(&key()).await.unwrap();
        let reopened = tracker.open_or_extend(&key(), 60_000).await.unwrap();
        assert!(reopened.is_new_window);
    }

    #[tokio::test]
    async fn expired_window_starts_fresh() {
        let tracker = MemoryWindowTracker::new();
        let first = tracker.open_or_extend(&key(), 10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = tracker.open_or_extend(&key(), 60_000).await.unwrap();
        assert!(second.is_new_window);
        assert!(second.expires_at_ms > first.expires_at_ms);
    }

    #[tokio::test]
    async fn windows_are_per_conversation() {
        let tracker = MemoryWindowTracker::new();
        let other = ConversationKey::new("acme", "c2").unwrap();
        assert!(
            tracker
                .open_or_extend(&key(), 60_000)
                .await
                .unwrap()
                .is_new_window
        );
        assert!(
            tracker
                .open_or_extend(&other, 60_000)
                .await
                .unwrap()
                .is_new_window
        );
    }

    #[tokio::test]
    async fn concurrent_opens_create_one_window() {
        let tracker = std::sync::Arc::new(MemoryWindowTracker::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = std::sync::Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                tracker.open_or_extend(&key(), 60_000).await.unwrap()
            }));
        }
        let mut opened = 0;
        for handle in handles {
            if handle.await.unwrap().is_new_window {
                opened += 1;
            }
        }
        assert_eq!(opened, 1);
    }
}
