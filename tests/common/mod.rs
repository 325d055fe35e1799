#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use webhook_retry_rs::config::DispatcherSettings;
use webhook_retry_rs::delivery::{
    DeliveryRequest, HttpTransport, TransportError, TransportResponse,
};
use webhook_retry_rs::{CircuitBreakerConfig, Dispatcher, ProviderRegistry, WebhookJob};

/// What the scripted endpoint does for one request.
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    Fail(TransportError),
    /// Never answer; the attempt ends on its timeout
    Hang,
    /// Answer with the status after a delay
    Slow(Duration, u16),
}

/// Transport answering from per-URL scripts, falling back to a fixed step.
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fallback: Step,
    seen: Mutex<Vec<(Instant, DeliveryRequest)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts a request as in flight until dropped, even when the caller times out.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    pub fn new(fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            seen: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.seen.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn request_times(&self, url: &str) -> Vec<Instant> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.url == url)
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.request_times(url).len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most requests ever in flight at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: DeliveryRequest) -> Result<TransportResponse, TransportError> {
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.url)
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| self.fallback.clone());
        self.seen.lock().unwrap().push((Instant::now(), request));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        match step {
            Step::Status(status) => Ok(TransportResponse { status }),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
            Step::Slow(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(TransportResponse { status })
            }
        }
    }
}

pub fn dispatcher_with(transport: Arc<ScriptedTransport>) -> Dispatcher {
    Dispatcher::new(
        DispatcherSettings::default(),
        ProviderRegistry::new(),
        CircuitBreakerConfig::default(),
        transport,
    )
}

pub async fn wait_terminal(dispatcher: &Dispatcher, job_id: &str) -> WebhookJob {
    tokio::time::timeout(
        Duration::from_secs(3600),
        dispatcher.wait_for_terminal(job_id, Duration::from_millis(5)),
    )
    .await
    .expect("job did not finish in time")
    .expect("job not found")
}

/// Poll until `predicate` holds for the job.
pub async fn wait_for(dispatcher: &Dispatcher, job_id: &str, predicate: impl Fn(&WebhookJob) -> bool) -> WebhookJob {
    let deadline = Instant::now() + Duration::from_secs(3600);
    loop {
        let job = dispatcher.get_job_status(job_id).expect("job not found");
        if predicate(&job) {
            return job;
        }
        assert!(Instant::now() < deadline, "condition never held for {}", job_id);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
