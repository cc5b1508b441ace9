//! Error types for the pipeline coordinator.
//!
//! The taxonomy separates recoverable stage failures (retry/skip applies)
//! from local faults that never halt an otherwise-healthy run: a dropped
//! consumer is a transport fault, a malformed event on the client is a
//! protocol fault, and both are logged rather than propagated.

use crate::stages::StageName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error produced by a stage when its work declines or throws.
///
/// Carried inside `failed` progress events and stage records. The optional
/// `code` is a machine-readable cause (e.g. `"timeout"`, `"unsupported_format"`).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct StageError {
    /// Human-readable failure message.
    pub message: String,
    /// Optional machine-readable cause code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Creates a stage error with a cause code.
    #[must_use]
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// The timeout cause synthesized by the coordinator.
    #[must_use]
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::with_code(
            format!("Stage timed out after {timeout_ms}ms"),
            "timeout",
        )
    }
}

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage's own logic declined or threw. Recoverable via retry/skip.
    #[error("Stage '{stage}' failed: {source}")]
    StageFault {
        /// The stage that failed (wire name).
        stage: StageName,
        /// The underlying stage error.
        source: StageError,
    },

    /// A stage exceeded its bounded execution window. Recoverable.
    #[error("Stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout {
        /// The stage that timed out.
        stage: StageName,
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The event consumer disconnected. Does not fail the run.
    #[error("Transport fault: {0}")]
    Transport(String),

    /// A malformed or out-of-order event was observed by a client.
    #[error("Protocol fault: {0}")]
    Protocol(String),

    /// `start` was called twice for one run id. Rejected synchronously.
    #[error("Run '{0}' is already in flight")]
    DuplicateRun(String),

    /// The run id is unknown to the registry.
    #[error("Run '{0}' not found")]
    RunNotFound(String),

    /// Retry/skip was requested while the run is not halted.
    #[error("Run '{0}' is not halted")]
    NotHalted(String),

    /// Retry/skip named a stage other than the currently-failed one.
    #[error("Stage '{requested}' does not match failed stage '{failed}'")]
    StageMismatch {
        /// The stage named by the caller.
        requested: StageName,
        /// The stage that actually failed.
        failed: StageName,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Returns true if the error halts a run pending retry/skip.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StageFault { .. } | Self::StageTimeout { .. })
    }

    /// The stage-level error behind a recoverable fault.
    ///
    /// This is what lands in the stage record and the `failed` frame.
    /// Non-recoverable variants fold into a plain message.
    #[must_use]
    pub fn stage_error(&self) -> StageError {
        match self {
            Self::StageFault { source, .. } => source.clone(),
            Self::StageTimeout { timeout_ms, .. } => StageError::timeout(*timeout_ms),
            other => StageError::new(other.to_string()),
        }
    }
}
