use crate::retry::RetryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state of a webhook job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states are never left once entered
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLetter | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Failed, DeadLetter)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete delivery try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAttempt {
    /// 1-indexed
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    /// Backoff that preceded this attempt, absent for the first one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `Some(0)` for network and timeout failures, `None` when no call was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub success: bool,
    pub duration_ms: u64,
}

/// A single logical webhook delivery and its retry history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookJob {
    pub id: String,
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub headers: HashMap<String, String>,
    pub attempts: Vec<WebhookAttempt>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub config: RetryConfig,
    /// Resolved provider name the config came from
    pub provider: String,
}

impl WebhookJob {
    pub fn new(
        id: String,
        endpoint: String,
        payload: serde_json::Value,
        headers: HashMap<String, String>,
        provider: String,
        config: RetryConfig,
    ) -> Self {
        Self {
            id,
            endpoint,
            payload,
            headers,
            attempts: Vec::new(),
            created_at: Utc::now(),
            next_retry_at: None,
            status: JobStatus::Pending,
            config,
            provider,
        }
    }

    /// Number the next attempt will carry
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn last_attempt(&self) -> Option<&WebhookAttempt> {
        self.attempts.last()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| a.error.as_deref())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` if the edge is legal; returns whether the move happened.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        if next != JobStatus::Pending {
            self.next_retry_at = None;
        }
        self.status = next;
        true
    }
}
