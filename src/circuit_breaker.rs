//! Per-host circuit breaker guarding webhook delivery.
//!
//! Every endpoint hostname gets its own breaker. After `failure_threshold`
//! consecutive failures the breaker opens and deliveries to that host are
//! short-circuited until `recovery_timeout` has elapsed; the next attempt then
//! probes in half-open state, and `success_threshold` consecutive successes
//! close it again. Breakers are independent of any job's retry budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Deliveries proceed normally
    #[default]
    Closed,
    /// Deliveries are rejected without a network call
    Open,
    /// Probing recovery; deliveries are allowed through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing the circuit
    pub success_threshold: u32,
    /// Time an open circuit waits before letting a probe through
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Point-in-time view of a breaker for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub host: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Health gate for a single host.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    host: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(host: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_time: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    /// Whether a delivery may go out now.
    ///
    /// An open circuit whose recovery window has elapsed moves to half-open
    /// and lets the caller through.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = self
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    info!(
                        target: "circuit_breaker",
                        host = %self.host,
                        "Circuit breaker half-open, probing endpoint"
                    );
                }
                recovered
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = self.success_count.saturating_add(1);
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    info!(
                        target: "circuit_breaker",
                        host = %self.host,
                        "Circuit breaker closed after successful probes"
                    );
                }
            }
            CircuitState::Open => {
                // A delivery admitted before the circuit opened finished late
                self.failure_count = 0;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.success_count = 0;
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                self.mark_failure();
                if self.failure_count >= self.config.failure_threshold {
                    self.state = CircuitState::Open;
                    warn!(
                        target: "circuit_breaker",
                        host = %self.host,
                        failure_count = self.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opened due to consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.failure_count += 1;
                self.mark_failure();
                self.state = CircuitState::Open;
                warn!(
                    target: "circuit_breaker",
                    host = %self.host,
                    "Circuit breaker reopened after failed probe"
                );
            }
            CircuitState::Open => {}
        }
    }

    fn mark_failure(&mut self) {
        self.last_failure = Some(Instant::now());
        self.last_failure_time = Some(Utc::now());
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            host: self.host.clone(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_time: self.last_failure_time,
        }
    }
}

/// Breakers for every host seen so far, serialized behind one mutex.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn with_breaker<T>(&self, host: &str, f: impl FnOnce(&mut CircuitBreaker) -> T) -> T {
        let key = host.to_ascii_lowercase();
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let breaker = breakers
            .entry(key.clone())
            .or_insert_with(|| CircuitBreaker::new(key, self.config.clone()));
        f(breaker)
    }

    pub fn try_acquire(&self, host: &str) -> bool {
        self.with_breaker(host, CircuitBreaker::try_acquire)
    }

    pub fn record_success(&self, host: &str) {
        self.with_breaker(host, CircuitBreaker::record_success)
    }

    pub fn record_failure(&self, host: &str) {
        self.with_breaker(host, CircuitBreaker::record_failure)
    }

    pub fn snapshot(&self, host: &str) -> Option<CircuitBreakerSnapshot> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers.get(&host.to_ascii_lowercase()).map(CircuitBreaker::snapshot)
    }

    /// Snapshots of every tracked host, sorted by host
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = breakers.values().map(CircuitBreaker::snapshot).collect();
        all.sort_by(|a, b| a.host.cmp(&b.host));
        all
    }

    /// Forget a host's history; returns whether it was tracked.
    pub fn reset(&self, host: &str) -> bool {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers.remove(&host.to_ascii_lowercase()).is_some()
    }
}

/// Lowercase hostname of an endpoint URL, the key breakers are tracked by.
pub fn endpoint_host(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    url.host_str().map(|h| h.to_ascii_lowercase())
}
