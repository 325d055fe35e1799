//! # webhook-retry-rs
//!
//! Reliable outbound webhook delivery: each webhook becomes a job that is
//! POSTed to its endpoint and retried with exponential backoff and jitter
//! until it succeeds, fails permanently, or runs out of attempts. Jobs that
//! give up land in a bounded dead letter queue.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::time::Duration;
//! use webhook_retry_rs::{Config, Dispatcher};
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Load config.toml if present, otherwise use defaults
//! let config = Config::load_or_default(None)?;
//! let dispatcher = Dispatcher::from_config(&config)?;
//!
//! let job_id = dispatcher.schedule(
//!     "https://hooks.example.com/payments",
//!     serde_json::json!({ "event": "payment.paid", "amount": 1250 }),
//!     HashMap::new(),
//!     "CONEKTA",
//! )?;
//!
//! // Poll until the job is completed, dead-lettered or cancelled
//! let job = dispatcher.wait_for_terminal(&job_id, Duration::from_millis(250)).await;
//! println!("{:?}", job.map(|j| j.status));
//!
//! let stats = dispatcher.get_retry_statistics();
//! println!("completed={} dead_letter={}", stats.completed_jobs, stats.dead_letter_jobs);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Backoff**: `base * multiplier^(n-1)` plus symmetric jitter, capped at the max delay
//! - **Provider Policies**: built-in retry configs per integration, overridable from config
//! - **Circuit Breaking**: per-host breakers stop hammering endpoints that keep failing
//! - **Dead Letter Queue**: bounded, oldest entries evicted first, replayable
//! - **Cancellation**: pending jobs can be cancelled before their next attempt
//!
//! ## Configuration
//!
//! Every section of `config.toml` is optional:
//!
//! ```toml
//! [dispatcher]
//! dlq_capacity = 1000
//! user_agent = "Conductores-PWA-Webhook/1.0"
//! classification = "strict"   # or "lenient": retry every non-2xx/3xx status
//! max_concurrent_deliveries = 10
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! success_threshold = 3
//! recovery_timeout_ms = 60000
//!
//! [providers.ACME]
//! max_attempts = 4
//! retryable_status_codes = [429, 500, 503, 0]
//! ```
//!
//! ## Custom Transport
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use webhook_retry_rs::delivery::{DeliveryRequest, HttpTransport, TransportError, TransportResponse};
//! use webhook_retry_rs::Dispatcher;
//!
//! struct AlwaysAccepted;
//!
//! #[async_trait]
//! impl HttpTransport for AlwaysAccepted {
//!     async fn send(&self, _request: DeliveryRequest) -> Result<TransportResponse, TransportError> {
//!         Ok(TransportResponse { status: 202 })
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dispatcher = Dispatcher::builder()
//!     .transport(Arc::new(AlwaysAccepted))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod dlq;
pub mod error;
pub mod job;
pub mod providers;
pub mod retry;
pub mod stats;
pub mod store;

// Re-export commonly used types at the crate root
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use config::Config;
pub use delivery::{AttemptOutcome, HttpTransport, ReqwestTransport};
pub use dispatcher::{Dispatcher, DispatcherBuilder, ScheduleOptions};
pub use error::{WebhookError, WebhookResult};
pub use job::{JobStatus, WebhookAttempt, WebhookJob};
pub use providers::{ProviderOverrides, ProviderRegistry};
pub use retry::{calculate_retry_delay, should_retry, ClassificationMode, RetryConfig};
pub use stats::{DeliveryHealth, RetryStatistics};
pub use store::{InMemoryJobStore, JobStore};
