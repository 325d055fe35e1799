//! Job storage behind a small persistence interface.
//!
//! The dispatcher only needs to read, write and scan jobs, plus an atomic
//! read-modify-write for status changes that may race with cancellation.
//! [`InMemoryJobStore`] is the only backend shipped; jobs do not survive a
//! restart.

use crate::job::WebhookJob;
use std::collections::HashMap;
use std::sync::RwLock;

pub trait JobStore: Send + Sync {
    fn get(&self, id: &str) -> Option<WebhookJob>;

    /// Insert or replace a job.
    fn put(&self, job: WebhookJob);

    /// Snapshot of every stored job, in no particular order.
    fn scan(&self) -> Vec<WebhookJob>;

    /// Apply `apply` to the stored job atomically and return the updated copy.
    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut WebhookJob)) -> Option<WebhookJob>;

    fn remove(&self, id: &str) -> Option<WebhookJob>;

    /// Remove every job matching `predicate`, returning how many were removed.
    fn remove_where(&self, predicate: &dyn Fn(&WebhookJob) -> bool) -> usize {
        let mut removed = 0;
        for job in self.scan() {
            if predicate(&job) && self.remove(&job.id).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, WebhookJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Poisoned locks are recovered; updates never leave the map half-written.
impl JobStore for InMemoryJobStore {
    fn get(&self, id: &str) -> Option<WebhookJob> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(id).cloned()
    }

    fn put(&self, job: WebhookJob) {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.insert(job.id.clone(), job);
    }

    fn scan(&self) -> Vec<WebhookJob> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.values().cloned().collect()
    }

    fn update(&self, id: &str, apply: &mut dyn FnMut(&mut WebhookJob)) -> Option<WebhookJob> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let job = jobs.get_mut(id)?;
        apply(job);
        Some(job.clone())
    }

    fn remove(&self, id: &str) -> Option<WebhookJob> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.remove(id)
    }

    fn remove_where(&self, predicate: &dyn Fn(&WebhookJob) -> bool) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, job| !predicate(job));
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn job(id: &str) -> WebhookJob {
        WebhookJob::new(
            id.to_string(),
            "https://hooks.example.com".to_string(),
            json!({}),
            Default::default(),
            "DEFAULT".to_string(),
            RetryConfig::default(),
        )
    }

    #[test]
    fn test_put_get_remove() {
        let store = InMemoryJobStore::new();
        assert!(store.is_empty());

        store.put(job("a"));
        assert_eq!(store.get("a").map(|j| j.id), Some("a".to_string()));
        assert!(store.get("missing").is_none());

        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_returns_modified_copy() {
        let store = InMemoryJobStore::new();
        store.put(job("a"));

        let updated = store
            .update("a", &mut |job| {
                job.transition(JobStatus::Processing);
            })
            .unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(store.get("a").unwrap().status, JobStatus::Processing);
        assert!(store.update("missing", &mut |_| {}).is_none());
    }

    #[test]
    fn test_remove_where() {
        let store = InMemoryJobStore::new();
        for id in ["a", "b", "c"] {
            store.put(job(id));
        }
        let removed = store.remove_where(&|job| job.id != "b");
        assert_eq!(removed, 2);
        assert_eq!(store.scan().len(), 1);
    }

    #[test]
    fn test_len_survives_poisoned_lock() {
        let store = Arc::new(InMemoryJobStore::new());
        store.put(job("a"));
        store.put(job("b"));

        let poisoner = store.clone();
        let result = std::thread::spawn(move || {
            let _guard = poisoner.jobs.write().unwrap();
            panic!("poison the job store lock");
        })
        .join();
        assert!(result.is_err());
        assert!(store.jobs.is_poisoned());

        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
        assert_eq!(store.get("a").map(|j| j.id), Some("a".to_string()));
    }

    #[test]
    fn test_concurrent_inserts() {
        let store = Arc::new(InMemoryJobStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.put(job(&format!("{}-{}", t, i)));
                        let _ = store.scan().len();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 800);
    }
}
