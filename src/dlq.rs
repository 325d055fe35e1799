use crate::job::WebhookJob;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

pub const DEFAULT_DLQ_CAPACITY: usize = 1000;

/// Bounded store of jobs that ran out of attempts.
///
/// Entries are snapshots taken when the job was dead-lettered; when full, the
/// oldest entry is evicted to make room.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<WebhookJob>>,
    capacity: usize,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DLQ_CAPACITY)
    }
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_DLQ_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a job, returning the entry evicted to make room, if any.
    pub fn push(&self, job: WebhookJob) -> Option<WebhookJob> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(job);

        if let Some(ref old) = evicted {
            warn!(
                job_id = %old.id,
                capacity = self.capacity,
                "Dead letter queue full, evicted oldest entry"
            );
        }
        evicted
    }

    /// Copy of the queue, oldest first
    pub fn snapshot(&self) -> Vec<WebhookJob> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn get(&self, job_id: &str) -> Option<WebhookJob> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().find(|job| job.id == job_id).cloned()
    }

    /// Remove an entry for replay.
    pub fn take(&self, job_id: &str) -> Option<WebhookJob> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let index = entries.iter().position(|job| job.id == job_id)?;
        entries.remove(index)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let count = entries.len();
        entries.clear();
        count
    }
}
