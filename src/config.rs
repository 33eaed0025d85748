//! Driver tuning knobs.

/// Mirrors the ambient `DataFlowConfig` shape this crate's solver lineage uses: a small,
/// `Clone`-able bag of driver knobs passed once at construction and read thereafter.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// When a dependee becomes final: append (`true`) or prepend (`false`) the resulting
    /// continuation task.
    pub delay_final_dependee_updates: bool,
    /// Same, for a dependee whose `(lb, ub)` changed but did not become final.
    pub delay_non_final_dependee_updates: bool,
    /// Same, for the general "a slot's bounds changed" notification path.
    pub delay_depender_notification: bool,
    /// Worker count for the parallel driver. Ignored by the sequential driver.
    pub parallel_workers: usize,
    /// SCCs larger than this are logged as a truncated descriptor rather than the full member
    /// list.
    pub scc_log_truncation_threshold: usize,
}

impl Default for StoreConfig {
    /// All delay flags default to `true` (append): applying a batch of updates in the order they
    /// arrived minimises notification churn compared to always jumping the queue.
    fn default() -> Self {
        Self {
            delay_final_dependee_updates: true,
            delay_non_final_dependee_updates: true,
            delay_depender_notification: true,
            parallel_workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            scc_log_truncation_threshold: 10,
        }
    }
}
