//! Error types shared across pipeline subsystems.
//!
//! Each stage owns the errors it can absorb locally; the types here cross
//! stage boundaries:
//! - Acquisition failures emitted by the worker pool
//! - External capability failures (analysis, verification)
//! - Sink write failures surfaced by the dispatcher

use std::time::Duration;
use thiserror::Error;

/// Errors produced while acquiring a raw record for a task.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AcquisitionError {
    /// The source failed in a way that may succeed on another attempt.
    #[error("Transient acquisition failure: {0}")]
    Transient(String),

    /// A single attempt exceeded its deadline.
    #[error("Acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// The source definitively refused the request; retrying will not help.
    #[error("Source rejected request: {0}")]
    Rejected(String),

    /// The task used up its retry budget.
    #[error("Task exhausted {attempts} attempts, last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The run was cancelled before the task reached a result.
    #[error("Task cancelled: {0}")]
    Cancelled(String),
}

impl AcquisitionError {
    /// Whether another attempt at the same task is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Whether the failure should count against the venue that served it.
    pub fn is_venue_fault(&self) -> bool {
        self.is_retryable()
    }
}

/// Errors from external capabilities consumed through a trait
/// (analysis scoring, external verification).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    /// The capability could not be reached or answered with a server error.
    #[error("{capability} unavailable: {message}")]
    Unavailable { capability: String, message: String },

    /// A call exceeded its deadline.
    #[error("{capability} timed out after {timeout:?}")]
    Timeout {
        capability: String,
        timeout: Duration,
    },

    /// The capability answered but the response could not be used.
    #[error("{capability} returned an invalid response: {message}")]
    InvalidResponse { capability: String, message: String },
}

impl CapabilityError {
    /// Create an `Unavailable` error.
    pub fn unavailable(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            capability: capability.into(),
            message: message.into(),
        }
    }

    /// Create an `InvalidResponse` error.
    pub fn invalid_response(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            capability: capability.into(),
            message: message.into(),
        }
    }

    /// Invalid responses are deterministic; everything else is worth a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidResponse { .. })
    }
}

/// Errors raised when writing to a sink.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    /// A single write failed.
    #[error("Sink '{sink}' write failed: {message}")]
    WriteFailed { sink: String, message: String },

    /// A single write exceeded its deadline.
    #[error("Sink '{sink}' timed out after {timeout:?}")]
    Timeout { sink: String, timeout: Duration },

    /// The primary sink failed after its retry budget.
    #[error("Primary sink '{sink}' exhausted {attempts} attempts: {message}")]
    PrimaryExhausted {
        sink: String,
        attempts: u32,
        message: String,
    },

    /// Every configured sink failed after its retry budget.
    #[error("All sinks failed: {0}")]
    AllSinksFailed(String),

    /// The sink could not be opened or configured.
    #[error("Sink '{sink}' is not usable: {message}")]
    Unusable { sink: String, message: String },
}

impl SinkError {
    /// Create a `WriteFailed` error.
    pub fn write_failed(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteFailed {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Whether the dispatcher should give up on the current run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::PrimaryExhausted { .. } | Self::AllSinksFailed(_)
        )
    }
}
