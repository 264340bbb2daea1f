//! Per-conversation mutual exclusion for the drain-and-reply cycle.

use {async_trait::async_trait, dashmap::DashMap, tracing::debug};

use spinline_common::{ConversationKey, now_ms};

use crate::Result;

/// Opaque holder token returned by a successful acquire.
///
/// Release requires the token back, so a stale release from a crashed and
/// restarted holder cannot free a lock someone else now owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub(crate) fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Atomic set-if-absent lock with a TTL backstop.
///
/// The TTL guards against crashed holders; callers must still release on
/// every exit path. Contention is not an error: `acquire` returns `None`
/// and the caller skips its cycle, trusting the current holder.
#[async_trait]
pub trait ConversationLock: Send + Sync {
    /// Try to take the lock. `None` means another holder owns it.
    async fn acquire(&self, key: &ConversationKey, ttl_ms: u64) -> Result<Option<LockToken>>;

    /// Release the lock if `token` still matches the current holder.
    async fn release(&self, key: &ConversationKey, token: &LockToken) -> Result<()>;
}

struct Holder {
    token: String,
    expires_at_ms: u64,
}

/// In-memory lock backend. Single-process deployments and tests.
pub struct MemoryConversationLock {
    holders: DashMap<String, Holder>,
}

impl MemoryConversationLock {
    pub fn new() -> Self {
        Self {
            holders: DashMap::new(),
        }
    }
}

impl Default for MemoryConversationLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationLock for MemoryConversationLock {
    async fn acquire(&self, key: &ConversationKey, ttl_ms: u64) -> Result<Option<LockToken>> {
        let now = now_ms();
        let mut entry = self.holders.entry(key.to_string()).or_insert(Holder {
            token: String::new(),
            expires_at_ms: 0,
        });
        if !entry.token.is_empty() && entry.expires_at_ms > now {
            debug!(%key, "lock contended");
            return Ok(None);
        }
        let token = LockToken::fresh();
        entry.token = token.as_str().to_string();
        entry.expires_at_ms = now + ttl_ms;
        Ok(Some(token))
    }

    async fn release(&self, key: &ConversationKey, token: &LockToken) -> Result<()> {
        self.holders
            .remove_if(&key.to_string(), |_, holder| holder.token == token.as_str());
        Ok(())
    }
}
