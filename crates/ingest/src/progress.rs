use async_trait::async_trait;

/// Receives live counters from a running pipeline.
///
/// Progress is advisory: implementations log their own write failures
/// instead of failing the pipeline.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Row-count estimate (export pre-pass).
    async fn set_total(&self, total: u64);

    /// Cumulative processed / failed counters.
    async fn update(&self, processed: u64, failed: u64);
}

/// Sink for callers with no job record to update.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn set_total(&self, _total: u64) {}

    async fn update(&self, _processed: u64, _failed: u64) {}
}
