//! Single-attempt webhook delivery.
//!
//! The executor performs exactly one POST per call through a pluggable
//! [`HttpTransport`] and turns whatever happened into a [`WebhookAttempt`]
//! plus an [`AttemptOutcome`] the dispatcher can act on. Nothing in here
//! returns an error to the caller: failures are data.

use crate::job::{WebhookAttempt, WebhookJob};
use crate::retry::{ClassificationMode, RetryConfig, NETWORK_ERROR_STATUS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{redirect, Client};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Everything a transport needs to perform one POST.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
    pub timeout: Duration,
}

impl DeliveryRequest {
    pub fn from_job(job: &WebhookJob) -> Self {
        Self {
            url: job.endpoint.clone(),
            headers: job.headers.clone(),
            body: job.payload.clone(),
            timeout: job.config.timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// The request produced no HTTP response at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// HTTP client abstraction used by the executor.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: DeliveryRequest) -> Result<TransportResponse, TransportError>;
}

/// Default transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client that does not follow redirects, so 3xx is reported as-is.
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder().redirect(redirect::Policy::none()).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: DeliveryRequest) -> Result<TransportResponse, TransportError> {
        let body = serde_json::to_vec(&request.body)
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;

        let mut builder = self.client.post(&request.url).timeout(request.timeout).body(body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                TransportErrorKind::Timeout
            } else if e.is_connect() {
                TransportErrorKind::Connect
            } else {
                TransportErrorKind::Other
            };
            TransportError::new(kind, e.to_string())
        })?;

        Ok(TransportResponse {
            status: response.status().as_u16(),
        })
    }
}

/// Classified result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx or 3xx response
    Delivered { status: u16 },
    /// No response: timeout, connection or DNS failure
    Transient { error: String },
    /// Response outside the success range
    Rejected { status: u16, retryable: bool },
    /// The host's circuit breaker was open; no request was sent
    ShortCircuited { host: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Delivered { .. } => false,
            Self::Transient { .. } | Self::ShortCircuited { .. } => true,
            Self::Rejected { retryable, .. } => *retryable,
        }
    }

    /// Whether the outcome says something about the endpoint's health
    pub fn reached_network(&self) -> bool {
        !matches!(self, Self::ShortCircuited { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Delivered { status } | Self::Rejected { status, .. } => Some(*status),
            Self::Transient { .. } => Some(NETWORK_ERROR_STATUS),
            Self::ShortCircuited { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Delivered { .. } => None,
            Self::Transient { error } => Some(error.clone()),
            Self::Rejected { status, .. } => {
                let reason = reqwest::StatusCode::from_u16(*status)
                    .ok()
                    .and_then(|s| s.canonical_reason());
                Some(match reason {
                    Some(reason) => format!("HTTP {} {}", status, reason),
                    None => format!("HTTP {}", status),
                })
            }
            Self::ShortCircuited { host } => Some(format!("circuit breaker open for {}", host)),
        }
    }

    /// Record this outcome as a job attempt.
    pub fn to_attempt(
        &self,
        attempt_number: u32,
        timestamp: DateTime<Utc>,
        preceding_delay: Option<Duration>,
        duration: Duration,
    ) -> WebhookAttempt {
        WebhookAttempt {
            attempt_number,
            timestamp,
            delay_ms: preceding_delay.map(|d| d.as_millis() as u64),
            error: self.error_message(),
            status_code: self.status_code(),
            success: self.is_success(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Map an HTTP status to an outcome under the given retry config.
pub fn classify_status(status: u16, config: &RetryConfig, mode: ClassificationMode) -> AttemptOutcome {
    if (200..=399).contains(&status) {
        return AttemptOutcome::Delivered { status };
    }
    let retryable = match mode {
        ClassificationMode::Strict => config.is_retryable_status(status),
        ClassificationMode::Lenient => true,
    };
    AttemptOutcome::Rejected { status, retryable }
}

/// Performs one delivery attempt for a job.
#[derive(Clone)]
pub struct DeliveryExecutor {
    transport: Arc<dyn HttpTransport>,
    mode: ClassificationMode,
}

impl DeliveryExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, mode: ClassificationMode) -> Self {
        Self { transport, mode }
    }

    pub fn mode(&self) -> ClassificationMode {
        self.mode
    }

    /// POST the job's payload once, bounded by the job's timeout.
    pub async fn execute(
        &self,
        job: &WebhookJob,
        attempt_number: u32,
        preceding_delay: Option<Duration>,
    ) -> (WebhookAttempt, AttemptOutcome) {
        let timestamp = Utc::now();
        let started = Instant::now();
        let timeout = job.config.timeout();
        let request = DeliveryRequest::from_job(job);

        let outcome = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(response)) => classify_status(response.status, &job.config, self.mode),
            Ok(Err(e)) => AttemptOutcome::Transient { error: e.message },
            Err(_) => AttemptOutcome::Transient {
                error: format!("request timed out after {}ms", timeout.as_millis()),
            },
        };

        debug!(
            job_id = %job.id,
            attempt = attempt_number,
            outcome = ?outcome,
            "Delivery attempt finished"
        );

        let attempt = outcome.to_attempt(attempt_number, timestamp, preceding_delay, started.elapsed());
        (attempt, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedTransport {
        result: Result<TransportResponse, TransportError>,
        delay: Duration,
        seen: Mutex<Vec<DeliveryRequest>>,
    }

    impl FixedTransport {
        fn status(status: u16) -> Self {
            Self {
                result: Ok(TransportResponse { status }),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn send(&self, request: DeliveryRequest) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn job() -> WebhookJob {
        let mut headers = HashMap::new();
        headers.insert("X-Trace".to_string(), "abc".to_string());
        WebhookJob::new(
            "webhook_1_test".to_string(),
            "https://hooks.example.com/in".to_string(),
            json!({"a": 1}),
            headers,
            "DEFAULT".to_string(),
            RetryConfig::default(),
        )
    }

    #[test]
    fn test_classify_success_range() {
        let config = RetryConfig::default();
        for status in [200, 201, 204, 301, 399] {
            assert!(classify_status(status, &config, ClassificationMode::Strict).is_success());
        }
    }

    #[test]
    fn test_classify_strict_vs_lenient() {
        let config = RetryConfig::default();
        assert_eq!(
            classify_status(503, &config, ClassificationMode::Strict),
            AttemptOutcome::Rejected { status: 503, retryable: true }
        );
        assert_eq!(
            classify_status(404, &config, ClassificationMode::Strict),
            AttemptOutcome::Rejected { status: 404, retryable: false }
        );
        assert_eq!(
            classify_status(404, &config, ClassificationMode::Lenient),
            AttemptOutcome::Rejected { status: 404, retryable: true }
        );
    }

    #[test]
    fn test_outcome_status_codes() {
        let transient = AttemptOutcome::Transient { error: "reset".to_string() };
        assert_eq!(transient.status_code(), Some(0));
        assert!(transient.is_retryable());

        let short = AttemptOutcome::ShortCircuited { host: "x.io".to_string() };
        assert_eq!(short.status_code(), None);
        assert!(!short.reached_network());
        assert_eq!(short.error_message().unwrap(), "circuit breaker open for x.io");

        let rejected = AttemptOutcome::Rejected { status: 503, retryable: true };
        assert_eq!(rejected.error_message().unwrap(), "HTTP 503 Service Unavailable");
    }

    #[tokio::test]
    async fn test_execute_records_success() {
        let transport = Arc::new(FixedTransport::status(200));
        let executor = DeliveryExecutor::new(transport.clone(), ClassificationMode::Strict);

        let (attempt, outcome) = executor.execute(&job(), 1, None).await;
        assert_eq!(outcome, AttemptOutcome::Delivered { status: 200 });
        assert!(attempt.success);
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.status_code, Some(200));
        assert!(attempt.delay_ms.is_none());
        assert!(attempt.error.is_none());

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "https://hooks.example.com/in");
        assert_eq!(seen[0].body, json!({"a": 1}));
        assert_eq!(seen[0].headers.get("X-Trace").map(String::as_str), Some("abc"));
        assert_eq!(seen[0].timeout, Duration::from_millis(15000));
    }

    #[tokio::test]
    async fn test_execute_maps_transport_error_to_status_zero() {
        let transport = Arc::new(FixedTransport {
            result: Err(TransportError::connect("connection refused")),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        });
        let executor = DeliveryExecutor::new(transport, ClassificationMode::Strict);

        let (attempt, outcome) = executor.execute(&job(), 2, Some(Duration::from_millis(1000))).await;
        assert!(outcome.is_retryable());
        assert!(!attempt.success);
        assert_eq!(attempt.status_code, Some(0));
        assert_eq!(attempt.delay_ms, Some(1000));
        assert_eq!(attempt.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_times_out_slow_transport() {
        let transport = Arc::new(FixedTransport {
            result: Ok(TransportResponse { status: 200 }),
            delay: Duration::from_secs(60),
            seen: Mutex::new(Vec::new()),
        });
        let executor = DeliveryExecutor::new(transport, ClassificationMode::Strict);

        let (attempt, outcome) = executor.execute(&job(), 1, None).await;
        assert!(matches!(outcome, AttemptOutcome::Transient { .. }));
        assert_eq!(attempt.status_code, Some(0));
        assert!(attempt.error.unwrap().contains("timed out"));
    }
}
