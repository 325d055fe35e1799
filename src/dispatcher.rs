//! Scheduling and retry orchestration.
//!
//! A [`Dispatcher`] owns one scheduler task holding a min-heap of due
//! attempts. Every due attempt runs on its own task so a slow endpoint never
//! holds up another job; at most `max_concurrent_deliveries` of those tasks
//! deliver at once. Attempts of a single job stay strictly sequential:
//! the job is claimed (`pending` to `processing`) before its attempt runs and
//! only returns to `pending` once the outcome has been recorded.

use crate::circuit_breaker::{
    endpoint_host, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerSnapshot,
};
use crate::config::{Config, DispatcherSettings};
use crate::delivery::{AttemptOutcome, DeliveryExecutor, HttpTransport, ReqwestTransport};
use crate::dlq::DeadLetterQueue;
use crate::error::{WebhookError, WebhookResult};
use crate::job::{JobStatus, WebhookJob};
use crate::providers::{ProviderRegistry, DEFAULT_PROVIDER};
use crate::retry::{calculate_retry_delay, should_schedule_retry, RetryConfig};
use crate::stats::RetryStatistics;
use crate::store::{InMemoryJobStore, JobStore};
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// Completed jobs older than this are removed by [`Dispatcher::cleanup_old_jobs_default`].
pub const DEFAULT_CLEANUP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const JOB_ID_SUFFIX_LEN: usize = 9;

/// A webhook to schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleOptions {
    pub endpoint: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
    pub provider: String,
    /// Used instead of the provider's retry config when set
    pub config: Option<RetryConfig>,
}

impl ScheduleOptions {
    pub fn new(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload,
            headers: HashMap::new(),
            provider: DEFAULT_PROVIDER.to_string(),
            config: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Debug)]
enum Command {
    Enqueue {
        job_id: String,
        due: Instant,
        preceding_delay: Option<Duration>,
    },
    Stop,
}

/// Heap entry; ordered so the earliest due attempt sits on top.
#[derive(Debug)]
struct DueAttempt {
    due: Instant,
    seq: u64,
    job_id: String,
    preceding_delay: Option<Duration>,
}

impl Ord for DueAttempt {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DueAttempt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DueAttempt {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DueAttempt {}

/// What an attempt did to its job.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Resolution {
    Completed,
    Retry(Duration),
    DeadLettered,
    /// The job left `processing` while the attempt was in flight
    Abandoned,
}

struct Shared {
    store: Arc<dyn JobStore>,
    dlq: DeadLetterQueue,
    breakers: CircuitBreakerRegistry,
    executor: DeliveryExecutor,
    providers: ProviderRegistry,
    settings: DispatcherSettings,
    /// One permit per attempt in flight
    delivery_slots: Semaphore,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shared {
    fn enqueue(&self, job_id: &str, delay: Duration, preceding_delay: Option<Duration>) -> WebhookResult<()> {
        self.commands
            .send(Command::Enqueue {
                job_id: job_id.to_string(),
                due: Instant::now() + delay,
                preceding_delay,
            })
            .map_err(|_| WebhookError::SchedulerStopped)
    }

    /// Move a pending job to processing, returning it if this caller won.
    fn claim(&self, job_id: &str) -> Option<WebhookJob> {
        let mut claimed = false;
        let job = self.store.update(job_id, &mut |job| {
            if job.status == JobStatus::Pending {
                claimed = job.transition(JobStatus::Processing);
            }
        })?;
        claimed.then_some(job)
    }
}

/// Schedules webhook deliveries and retries them with backoff.
///
/// Must be created inside a Tokio runtime: construction spawns the scheduler
/// task. Dropping the dispatcher stops the scheduler; attempts already in
/// flight still record their outcome.
pub struct Dispatcher {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatcherSettings,
        providers: ProviderRegistry,
        circuit_breaker: CircuitBreakerConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self::assemble(
            settings,
            providers,
            circuit_breaker,
            transport,
            Arc::new(InMemoryJobStore::new()),
        )
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Dispatcher delivering over HTTP with settings from `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::builder()
            .settings(config.dispatcher.clone())
            .providers(config.provider_registry()?)
            .circuit_breaker(config.circuit_breaker.to_config())
            .build()
    }

    fn assemble(
        settings: DispatcherSettings,
        providers: ProviderRegistry,
        circuit_breaker: CircuitBreakerConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            store,
            dlq: DeadLetterQueue::new(settings.dlq_capacity),
            breakers: CircuitBreakerRegistry::new(circuit_breaker),
            executor: DeliveryExecutor::new(transport, settings.classification),
            providers,
            delivery_slots: Semaphore::new(settings.max_concurrent_deliveries.max(1)),
            settings,
            commands: cmd_tx,
        });

        let handle = tokio::spawn(run_scheduler(shared.clone(), cmd_rx));
        info!(
            dlq_capacity = shared.dlq.capacity(),
            classification = ?shared.settings.classification,
            max_concurrent_deliveries = shared.settings.max_concurrent_deliveries,
            "Webhook dispatcher started"
        );

        Self {
            shared,
            scheduler: Mutex::new(Some(handle)),
        }
    }

    /// Schedule a webhook for immediate delivery and return its job id.
    ///
    /// Unknown providers fall back to the default retry config.
    pub fn schedule(
        &self,
        endpoint: &str,
        payload: Value,
        headers: HashMap<String, String>,
        provider: &str,
    ) -> WebhookResult<String> {
        let mut options = ScheduleOptions::new(endpoint, payload).provider(provider);
        options.headers = headers;
        self.schedule_with(options)
    }

    pub fn schedule_with(&self, options: ScheduleOptions) -> WebhookResult<String> {
        validate_endpoint(&options.endpoint)?;
        let headers = merge_headers(&self.shared.settings.user_agent, options.headers)?;
        let (provider, provider_config) = self.shared.providers.resolve(&options.provider);
        let config = match options.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => provider_config,
        };

        let job = WebhookJob::new(
            generate_job_id(),
            options.endpoint,
            options.payload,
            headers,
            provider,
            config,
        );
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            endpoint = %job.endpoint,
            provider = %job.provider,
            max_attempts = job.config.max_attempts,
            "Webhook scheduled"
        );

        self.shared.store.put(job);
        if let Err(e) = self.shared.enqueue(&job_id, Duration::ZERO, None) {
            self.shared.store.remove(&job_id);
            return Err(e);
        }
        Ok(job_id)
    }

    /// Current snapshot of a job.
    pub fn get_job_status(&self, job_id: &str) -> Option<WebhookJob> {
        self.shared.store.get(job_id)
    }

    /// Dead-lettered jobs, oldest first.
    pub fn get_dead_letter_queue(&self) -> Vec<WebhookJob> {
        self.shared.dlq.snapshot()
    }

    pub fn clear_dead_letter_queue(&self) -> usize {
        let cleared = self.shared.dlq.clear();
        info!(cleared, "Dead letter queue cleared");
        cleared
    }

    pub fn get_retry_statistics(&self) -> RetryStatistics {
        RetryStatistics::collect(self.shared.store.as_ref(), &self.shared.dlq)
    }

    /// Remove completed jobs created more than `max_age` ago.
    pub fn cleanup_old_jobs(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let removed = self.shared.store.remove_where(&|job| {
            job.status == JobStatus::Completed && job.created_at < cutoff
        });
        if removed > 0 {
            info!(removed, "Cleaned up old completed webhook jobs");
        }
        removed
    }

    pub fn cleanup_old_jobs_default(&self) -> usize {
        self.cleanup_old_jobs(DEFAULT_CLEANUP_AGE)
    }

    /// Cancel a pending or processing job, returning the status it left.
    ///
    /// A cancelled job never gets another attempt. An attempt already in
    /// flight is still recorded but does not change the status.
    pub fn cancel(&self, job_id: &str) -> WebhookResult<JobStatus> {
        let mut result = Err(WebhookError::JobNotFound(job_id.to_string()));
        self.shared.store.update(job_id, &mut |job| {
            let from = job.status;
            result = if job.transition(JobStatus::Cancelled) {
                Ok(from)
            } else {
                Err(WebhookError::InvalidTransition {
                    job_id: job.id.clone(),
                    from,
                    to: JobStatus::Cancelled,
                })
            };
        });

        if let Ok(from) = &result {
            info!(job_id = %job_id, from = %from, "Webhook cancelled");
        }
        result
    }

    /// Schedule a fresh job from a dead-lettered one and drop it from the DLQ.
    ///
    /// The new job reuses the endpoint, payload, headers, provider and retry
    /// config. The dead-lettered job stays in the store as is.
    pub fn replay_dead_letter(&self, job_id: &str) -> WebhookResult<String> {
        let job = self
            .shared
            .dlq
            .take(job_id)
            .ok_or_else(|| WebhookError::NotInDeadLetterQueue(job_id.to_string()))?;

        let options = ScheduleOptions {
            endpoint: job.endpoint.clone(),
            payload: job.payload.clone(),
            headers: job.headers.clone(),
            provider: job.provider.clone(),
            config: Some(job.config.clone()),
        };
        match self.schedule_with(options) {
            Ok(new_id) => {
                info!(job_id = %job_id, replay_id = %new_id, "Dead letter job replayed");
                Ok(new_id)
            }
            Err(e) => {
                self.shared.dlq.push(job);
                Err(e)
            }
        }
    }

    pub fn circuit_breaker_state(&self, host: &str) -> Option<CircuitBreakerSnapshot> {
        self.shared.breakers.snapshot(host)
    }

    pub fn circuit_breakers(&self) -> Vec<CircuitBreakerSnapshot> {
        self.shared.breakers.snapshots()
    }

    pub fn reset_circuit_breaker(&self, host: &str) -> bool {
        let reset = self.shared.breakers.reset(host);
        if reset {
            info!(target: "circuit_breaker", host = %host, "Circuit breaker reset");
        }
        reset
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.shared.providers
    }

    /// Poll until the job reaches a terminal status.
    ///
    /// Returns `None` if the job does not exist or is removed while waiting.
    pub async fn wait_for_terminal(&self, job_id: &str, poll_interval: Duration) -> Option<WebhookJob> {
        loop {
            let job = self.get_job_status(job_id)?;
            if job.is_terminal() {
                return Some(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shared.commands.is_closed()
    }

    /// Stop the scheduler and wait for it to exit.
    ///
    /// Jobs waiting on a retry stay `pending` in the store.
    pub async fn shutdown(&self) {
        let _ = self.shared.commands.send(Command::Stop);
        let handle = match self.scheduler.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Scheduler task failed: {}", e);
            }
            info!("Webhook dispatcher stopped");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shared.commands.send(Command::Stop);
    }
}

/// Builder for a [`Dispatcher`] with a custom transport or store.
#[derive(Default)]
pub struct DispatcherBuilder {
    settings: DispatcherSettings,
    providers: Option<ProviderRegistry>,
    circuit_breaker: CircuitBreakerConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    store: Option<Arc<dyn JobStore>>,
}

impl DispatcherBuilder {
    pub fn settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Falls back to a reqwest transport and an in-memory store.
    pub fn build(self) -> anyhow::Result<Dispatcher> {
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));
        Ok(Dispatcher::assemble(
            self.settings,
            self.providers.unwrap_or_default(),
            self.circuit_breaker,
            transport,
            store,
        ))
    }
}

async fn run_scheduler(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut queue: BinaryHeap<DueAttempt> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let next_due = queue.peek().map(|entry| entry.due);
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Enqueue { job_id, due, preceding_delay }) => {
                    seq += 1;
                    queue.push(DueAttempt { due, seq, job_id, preceding_delay });
                }
                Some(Command::Stop) | None => break,
            },
            _ = wait_until(next_due) => {
                let now = Instant::now();
                while let Some(entry) = pop_due(&mut queue, now) {
                    tokio::spawn(run_attempt(shared.clone(), entry.job_id, entry.preceding_delay));
                }
            }
        }
    }

    debug!(queued = queue.len(), "Scheduler loop exited");
}

async fn wait_until(due: Option<Instant>) {
    match due {
        Some(due) => sleep_until(due).await,
        None => std::future::pending::<()>().await,
    }
}

fn pop_due(queue: &mut BinaryHeap<DueAttempt>, now: Instant) -> Option<DueAttempt> {
    if queue.peek()?.due <= now {
        queue.pop()
    } else {
        None
    }
}

async fn run_attempt(shared: Arc<Shared>, job_id: String, preceding_delay: Option<Duration>) {
    // Waiting jobs stay pending, so they can still be cancelled before a slot frees up
    let Ok(_slot) = shared.delivery_slots.acquire().await else {
        return;
    };
    let Some(job) = shared.claim(&job_id) else {
        debug!(job_id = %job_id, "Skipping attempt, job is no longer pending");
        return;
    };

    let attempt_number = job.next_attempt_number();
    info!(
        job_id = %job_id,
        attempt = attempt_number,
        max_attempts = job.config.max_attempts,
        endpoint = %job.endpoint,
        "Processing webhook attempt"
    );

    let host = endpoint_host(&job.endpoint).unwrap_or_default();
    let (attempt, outcome) = if shared.breakers.try_acquire(&host) {
        let (attempt, outcome) = shared
            .executor
            .execute(&job, attempt_number, preceding_delay)
            .await;
        if outcome.is_success() {
            shared.breakers.record_success(&host);
        } else if outcome.reached_network() {
            shared.breakers.record_failure(&host);
        }
        (attempt, outcome)
    } else {
        warn!(job_id = %job_id, host = %host, "Circuit breaker open, skipping delivery");
        let outcome = AttemptOutcome::ShortCircuited { host };
        let attempt = outcome.to_attempt(attempt_number, Utc::now(), preceding_delay, Duration::ZERO);
        (attempt, outcome)
    };

    let retry_delay = should_schedule_retry(&outcome, attempt_number, &job.config)
        .then(|| calculate_retry_delay(attempt_number, &job.config));

    let mut resolution = Resolution::Abandoned;
    let updated = shared.store.update(&job_id, &mut |stored| {
        stored.attempts.push(attempt.clone());
        resolution = apply_outcome(stored, &outcome, retry_delay);
    });
    let Some(updated) = updated else {
        warn!(job_id = %job_id, "Job removed while its attempt was in flight");
        return;
    };

    match resolution {
        Resolution::Completed => {
            info!(
                job_id = %job_id,
                attempt = attempt_number,
                status_code = ?outcome.status_code(),
                "Webhook delivered successfully"
            );
        }
        Resolution::Retry(delay) => {
            warn!(
                job_id = %job_id,
                attempt = attempt_number,
                delay_ms = delay.as_millis() as u64,
                error = ?outcome.error_message(),
                "Webhook attempt failed, retry scheduled"
            );
            if shared.enqueue(&job_id, delay, Some(delay)).is_err() {
                warn!(job_id = %job_id, "Scheduler stopped, retry left pending");
            }
        }
        Resolution::DeadLettered => {
            error!(
                job_id = %job_id,
                attempts = updated.attempts.len(),
                error = ?updated.last_error(),
                "Webhook permanently failed, moved to dead letter queue"
            );
            shared.dlq.push(updated);
        }
        Resolution::Abandoned => {
            info!(
                job_id = %job_id,
                status = %updated.status,
                "Job changed state during attempt, outcome recorded only"
            );
        }
    }
}

fn apply_outcome(job: &mut WebhookJob, outcome: &AttemptOutcome, retry_delay: Option<Duration>) -> Resolution {
    if job.status != JobStatus::Processing {
        return Resolution::Abandoned;
    }
    if outcome.is_success() {
        job.transition(JobStatus::Completed);
        return Resolution::Completed;
    }
    if let Some(delay) = retry_delay {
        job.transition(JobStatus::Pending);
        job.next_retry_at =
            Utc::now().checked_add_signed(chrono::Duration::milliseconds(delay.as_millis() as i64));
        return Resolution::Retry(delay);
    }
    job.transition(JobStatus::Failed);
    job.transition(JobStatus::DeadLetter);
    Resolution::DeadLettered
}

fn validate_endpoint(endpoint: &str) -> WebhookResult<()> {
    let url = Url::parse(endpoint)
        .map_err(|e| WebhookError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(WebhookError::InvalidEndpoint(format!(
            "{}: unsupported scheme {}",
            endpoint,
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(WebhookError::InvalidEndpoint(format!("{}: missing host", endpoint)));
    }
    Ok(())
}

/// Default headers overlaid with the caller's, which win case-insensitively.
///
/// Caller names that differ only in case are rejected, since either value
/// could end up on the wire.
fn merge_headers(user_agent: &str, headers: HashMap<String, String>) -> WebhookResult<HashMap<String, String>> {
    let mut merged = HashMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), user_agent.to_string()),
    ]);
    let mut seen = HashSet::with_capacity(headers.len());
    for (name, value) in headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| WebhookError::InvalidHeader(format!("invalid name {:?}", name)))?;
        HeaderValue::from_str(&value)
            .map_err(|_| WebhookError::InvalidHeader(format!("invalid value for {}", name)))?;
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(WebhookError::InvalidHeader(format!("duplicate header {}", name)));
        }
        merged.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        merged.insert(name, value);
    }
    Ok(merged)
}

fn generate_job_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(JOB_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("webhook_{}_{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryRequest, TransportError, TransportResponse};
    use async_trait::async_trait;
    use serde_json::json;

    struct StatusTransport(u16);

    #[async_trait]
    impl HttpTransport for StatusTransport {
        async fn send(&self, _request: DeliveryRequest) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse { status: self.0 })
        }
    }

    fn dispatcher(status: u16) -> Dispatcher {
        Dispatcher::new(
            DispatcherSettings::default(),
            ProviderRegistry::new(),
            CircuitBreakerConfig::default(),
            Arc::new(StatusTransport(status)),
        )
    }

    fn processing_job() -> WebhookJob {
        let mut job = WebhookJob::new(
            "webhook_1_abc".to_string(),
            "https://hooks.example.com".to_string(),
            json!({}),
            HashMap::new(),
            DEFAULT_PROVIDER.to_string(),
            RetryConfig::default(),
        );
        job.transition(JobStatus::Processing);
        job
    }

    #[test]
    fn test_job_id_format() {
        let id = generate_job_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "webhook");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), JOB_ID_SUFFIX_LEN);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(generate_job_id(), generate_job_id());
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("https://hooks.example.com/a?b=1").is_ok());
        assert!(validate_endpoint("http://localhost:8080").is_ok());
        for bad in ["not a url", "ftp://files.example.com", "mailto:ops@example.com", ""] {
            assert!(
                matches!(validate_endpoint(bad), Err(WebhookError::InvalidEndpoint(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_merge_headers_caller_wins_case_insensitively() {
        let headers = HashMap::from([
            ("content-type".to_string(), "application/cloudevents+json".to_string()),
            ("X-Signature".to_string(), "abc".to_string()),
        ]);
        let merged = merge_headers("agent/1.0", headers).unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged["content-type"], "application/cloudevents+json");
        assert_eq!(merged["User-Agent"], "agent/1.0");
        assert_eq!(merged["X-Signature"], "abc");
        assert!(!merged.contains_key("Content-Type"));
    }

    #[test]
    fn test_merge_headers_rejects_invalid() {
        let bad_name = HashMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(matches!(merge_headers("a", bad_name), Err(WebhookError::InvalidHeader(_))));

        let bad_value = HashMap::from([("X-Ok".to_string(), "line\nbreak".to_string())]);
        assert!(matches!(merge_headers("a", bad_value), Err(WebhookError::InvalidHeader(_))));
    }

    #[test]
    fn test_merge_headers_rejects_case_insensitive_duplicates() {
        let headers = HashMap::from([
            ("X-Signature".to_string(), "first".to_string()),
            ("x-signature".to_string(), "second".to_string()),
        ]);
        match merge_headers("a", headers) {
            Err(WebhookError::InvalidHeader(message)) => assert!(message.contains("duplicate header")),
            other => panic!("expected duplicate header error, got {:?}", other),
        }

        let distinct = HashMap::from([
            ("X-Signature".to_string(), "first".to_string()),
            ("X-Signature-Version".to_string(), "v1".to_string()),
        ]);
        assert_eq!(merge_headers("a", distinct).unwrap().len(), 4);
    }

    #[test]
    fn test_due_attempts_pop_earliest_first() {
        let now = Instant::now();
        let mut queue = BinaryHeap::new();
        for (seq, offset) in [(1, 300), (2, 100), (3, 200), (4, 100)] {
            queue.push(DueAttempt {
                due: now + Duration::from_millis(offset),
                seq,
                job_id: format!("job{}", seq),
                preceding_delay: None,
            });
        }

        assert!(pop_due(&mut queue, now).is_none());

        let later = now + Duration::from_millis(250);
        let order: Vec<String> = std::iter::from_fn(|| pop_due(&mut queue, later))
            .map(|entry| entry.job_id)
            .collect();
        assert_eq!(order, vec!["job2", "job4", "job3"]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_apply_outcome_transitions() {
        let mut job = processing_job();
        let resolution = apply_outcome(&mut job, &AttemptOutcome::Delivered { status: 200 }, None);
        assert_eq!(resolution, Resolution::Completed);
        assert_eq!(job.status, JobStatus::Completed);

        let mut job = processing_job();
        let failure = AttemptOutcome::Rejected { status: 503, retryable: true };
        let resolution = apply_outcome(&mut job, &failure, Some(Duration::from_secs(1)));
        assert_eq!(resolution, Resolution::Retry(Duration::from_secs(1)));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.next_retry_at.is_some());

        let mut job = processing_job();
        let resolution = apply_outcome(&mut job, &failure, None);
        assert_eq!(resolution, Resolution::DeadLettered);
        assert_eq!(job.status, JobStatus::DeadLetter);
        assert!(job.next_retry_at.is_none());

        let mut job = processing_job();
        job.transition(JobStatus::Cancelled);
        let resolution = apply_outcome(&mut job, &AttemptOutcome::Delivered { status: 200 }, None);
        assert_eq!(resolution, Resolution::Abandoned);
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_schedule_rejects_bad_input_without_storing() {
        let dispatcher = dispatcher(200);
        let err = dispatcher
            .schedule("nope", json!({}), HashMap::new(), "DEFAULT")
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidEndpoint(_)));

        let invalid = RetryConfig { max_attempts: 0, ..RetryConfig::default() };
        let err = dispatcher
            .schedule_with(ScheduleOptions::new("https://hooks.example.com", json!({})).config(invalid))
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidConfig(_)));

        let err = dispatcher
            .schedule_with(
                ScheduleOptions::new("https://hooks.example.com", json!({}))
                    .header("X-Trace", "1")
                    .header("x-trace", "2"),
            )
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidHeader(_)));
        assert_eq!(dispatcher.get_retry_statistics().total_jobs, 0);
    }

    #[tokio::test]
    async fn test_schedule_after_shutdown_fails() {
        let dispatcher = dispatcher(200);
        dispatcher.shutdown().await;
        assert!(!dispatcher.is_running());

        let err = dispatcher
            .schedule("https://hooks.example.com", json!({}), HashMap::new(), "DEFAULT")
            .unwrap_err();
        assert_eq!(err, WebhookError::SchedulerStopped);
        assert_eq!(dispatcher.get_retry_statistics().total_jobs, 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_resolves_to_default() {
        let dispatcher = dispatcher(200);
        let id = dispatcher
            .schedule("https://hooks.example.com", json!({}), HashMap::new(), "nobody")
            .unwrap();
        let job = dispatcher.get_job_status(&id).unwrap();
        assert_eq!(job.provider, DEFAULT_PROVIDER);
        assert_eq!(job.config, RetryConfig::default());
        assert_eq!(job.headers["Content-Type"], "application/json");
    }
}
