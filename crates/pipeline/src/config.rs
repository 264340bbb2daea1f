//! Tuning knobs for the ingestion pipeline.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pipeline timing and retry configuration.
///
/// The lock TTL must sit well below the debounce delay: a crashed drain
/// holder then expires before the next window closes, so a late message is
/// never stranded behind a dead lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Debounce window: messages arriving within this interval share one
    /// reply cycle.
    pub debounce_ms: u64,
    /// Retention for dedup records. Minutes, not hours: bounded staleness
    /// is accepted in exchange for bounded storage.
    pub dedup_ttl_ms: u64,
    /// TTL backstop on the per-conversation drain lock.
    pub lock_ttl_ms: u64,
    /// How many recent messages accompany a batch into reply generation.
    pub history_limit: usize,
    /// Additional scheduling attempts after the first fails.
    pub scheduler_retries: u32,
    pub scheduler_retry_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            dedup_ttl_ms: 120_000,
            lock_ttl_ms: 2_000,
            history_limit: 20,
            scheduler_retries: 2,
            scheduler_retry_delay_ms: 250,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 {
            return Err(Error::invalid_config("debounceMs must be positive"));
        }
        if self.lock_ttl_ms == 0 {
            return Err(Error::invalid_config("lockTtlMs must be positive"));
        }
        if self.lock_ttl_ms >= self.debounce_ms {
            return Err(Error::invalid_config(format!(
                "lockTtlMs ({}) must be below debounceMs ({}): a crashed holder has to \
                 expire before the next window closes",
                self.lock_ttl_ms, self.debounce_ms
            )));
        }
        if self.dedup_ttl_ms < self.debounce_ms {
            return Err(Error::invalid_config(format!(
                "dedupTtlMs ({}) must cover at least one debounce window ({})",
                self.dedup_ttl_ms, self.debounce_ms
            )));
        }
        Ok(())
    }
}
