//! Deferred execution of drain jobs.
//!
//! The pipeline only decides *when* a drain should fire; running it later
//! is a capability it consumes. Tests inject a recording scheduler and
//! fire jobs by hand; production uses the tokio timer.

use std::{future::Future, pin::Pin, time::Duration};

use {async_trait::async_trait, tracing::debug};

use spinline_common::now_ms;

/// A deferred drain invocation. Errors are handled inside the job.
pub type DrainJob = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs a job at (or as soon as possible after) a wall-clock deadline.
#[async_trait]
pub trait DrainScheduler: Send + Sync {
    async fn schedule_at(&self, run_at_ms: u64, job: DrainJob) -> anyhow::Result<()>;
}

/// Tokio-timer scheduler: one spawned task per scheduled drain.
///
/// Fire-and-forget is fine here: a lost job (process restart) is covered
/// by the next inbound message reopening the window.
pub struct TokioDrainScheduler;

#[async_trait]
impl DrainScheduler for TokioDrainScheduler {
    async fn schedule_at(&self, run_at_ms: u64, job: DrainJob) -> anyhow::Result<()> {
        let delay_ms = run_at_ms.saturating_sub(now_ms());
        debug!(run_at_ms, delay_ms, "drain scheduled");
        tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            job.await;
        });
        Ok(())
    }
}
