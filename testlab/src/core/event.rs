//! The wire-level progress event.
//!
//! One event is emitted per stage state transition. Events are
//! self-describing: a consumer that misses no events can reconstruct run
//! state purely by folding the sequence.

use crate::stages::StageName;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};

/// The agent name carried by terminal frames.
pub const PIPELINE_AGENT: &str = "pipeline";

/// Wire status of a progress event.
///
/// Deliberately narrower than [`crate::core::StageStatus`]: `idle` and
/// `skipped` are never emitted, so the wire format cannot express them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The coordinator began the stage.
    Started,
    /// The stage reported sub-progress.
    Processing,
    /// The stage produced output (payload carries it).
    Success,
    /// The stage declined or threw (error carries the message).
    Failed,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Started => "started",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One progress event, tagged with the emitting agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The emitting agent: a stage wire name or [`PIPELINE_AGENT`].
    pub agent: String,

    /// The transition status.
    pub status: EventStatus,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// Stage output or sub-progress data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Failure message (present only on `failed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    fn new(agent: impl Into<String>, status: EventStatus) -> Self {
        Self {
            agent: agent.into(),
            status,
            timestamp: iso_timestamp(),
            payload: None,
            error: None,
        }
    }

    /// Creates a `started` event for a stage.
    #[must_use]
    pub fn started(stage: StageName) -> Self {
        Self::new(stage.wire_name(), EventStatus::Started)
    }

    /// Creates a `processing` event carrying a sub-progress message.
    #[must_use]
    pub fn processing(stage: StageName, payload: serde_json::Value) -> Self {
        let mut event = Self::new(stage.wire_name(), EventStatus::Processing);
        event.payload = Some(payload);
        event
    }

    /// Creates a `success` event carrying the stage's output.
    #[must_use]
    pub fn success(stage: StageName, payload: serde_json::Value) -> Self {
        let mut event = Self::new(stage.wire_name(), EventStatus::Success);
        event.payload = Some(payload);
        event
    }

    /// Creates a `failed` event carrying a human-readable message.
    #[must_use]
    pub fn failed(stage: StageName, error: impl Into<String>) -> Self {
        let mut event = Self::new(stage.wire_name(), EventStatus::Failed);
        event.error = Some(error.into());
        event
    }

    /// Creates the terminal `success` frame carrying the full composite.
    #[must_use]
    pub fn terminal_result(composite: serde_json::Value) -> Self {
        let mut event = Self::new(PIPELINE_AGENT, EventStatus::Success);
        event.payload = Some(composite);
        event
    }

    /// Creates the terminal `failed` frame.
    #[must_use]
    pub fn terminal_failure(error: impl Into<String>) -> Self {
        let mut event = Self::new(PIPELINE_AGENT, EventStatus::Failed);
        event.error = Some(error.into());
        event
    }

    /// Returns the stage this event belongs to, if the agent is a stage.
    #[must_use]
    pub fn stage(&self) -> Option<StageName> {
        StageName::from_wire_name(&self.agent)
    }

    /// Returns true for the terminal frames that close the stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.agent == PIPELINE_AGENT
    }
}
