use crate::dlq::DeadLetterQueue;
use crate::job::JobStatus;
use crate::store::JobStore;
use serde::{Deserialize, Serialize};

/// Counts of jobs by lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStatistics {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub processing_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    /// Size of the dead letter queue, which may lag the store after eviction
    pub dead_letter_jobs: usize,
    pub cancelled_jobs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl RetryStatistics {
    /// Aggregate over the store and the DLQ without mutating either.
    pub fn collect(store: &dyn JobStore, dlq: &DeadLetterQueue) -> Self {
        let mut stats = RetryStatistics::default();
        for job in store.scan() {
            stats.total_jobs += 1;
            match job.status {
                JobStatus::Pending => stats.pending_jobs += 1,
                JobStatus::Processing => stats.processing_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
                JobStatus::Cancelled => stats.cancelled_jobs += 1,
                JobStatus::DeadLetter => {}
            }
        }
        stats.dead_letter_jobs = dlq.len();
        stats
    }

    /// Percentage of finished deliveries that succeeded, if any finished
    pub fn success_rate(&self) -> Option<f64> {
        let finished = self.completed_jobs + self.dead_letter_jobs;
        if finished == 0 {
            return None;
        }
        Some(self.completed_jobs as f64 * 100.0 / finished as f64)
    }

    pub fn health(&self) -> DeliveryHealth {
        match self.success_rate() {
            Some(rate) if rate < 70.0 => DeliveryHealth::Unhealthy,
            Some(rate) if rate < 90.0 => DeliveryHealth::Degraded,
            _ => DeliveryHealth::Healthy,
        }
    }
}
