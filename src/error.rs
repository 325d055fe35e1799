//! Error types for webhook scheduling.
//!
//! Delivery failures are not errors: they are recorded as attempts on the
//! job. These variants cover caller mistakes detected at call time.

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// Endpoint is not an absolute http(s) URL with a host
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Retry configuration or settings failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {0} is not in the dead letter queue")]
    NotInDeadLetterQueue(String),

    /// The scheduler loop has shut down and no longer accepts work
    #[error("Scheduler has stopped")]
    SchedulerStopped,
}

/// Result type alias using WebhookError.
pub type WebhookResult<T> = Result<T, WebhookError>;
