//! Run and stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet executing.
    Pending,
    /// Stages are executing.
    Running,
    /// A stage failed; awaiting retry or skip.
    Halted,
    /// All stages reached a terminal status and the composite was finalized.
    Completed,
    /// The run was abandoned (halt window expired or terminal failure).
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Halted => write!(f, "halted"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    /// Returns true if the run can make no further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The execution status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet reached by the cursor.
    Idle,
    /// The coordinator has begun the stage.
    Started,
    /// The stage reported sub-progress.
    Processing,
    /// The stage produced output.
    Success,
    /// The stage declined or threw.
    Failed,
    /// The stage was skipped past after a failure.
    Skipped,
}

impl Default for StageStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Started => write!(f, "started"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if no further transition is legal without a retry.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Returns true if the stage is currently executing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::Processing)
    }
}
