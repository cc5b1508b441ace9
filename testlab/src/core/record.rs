//! Per-run, per-stage execution records.
//!
//! One record exists per stage attempt. A record is immutable once it
//! reaches `success` or `failed`; a retry appends a fresh record instead of
//! mutating the old one, preserving the audit trail.

use crate::core::StageStatus;
use crate::errors::StageError;
use crate::stages::StageName;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// The execution record of one stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage this record belongs to.
    pub stage: StageName,
    /// 1-based attempt counter within the run.
    pub attempt: usize,
    /// Current status.
    pub status: StageStatus,
    /// When the coordinator began this attempt.
    pub started_at: Timestamp,
    /// When the attempt reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Stage output, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure detail, present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

impl StageRecord {
    /// Begins a new attempt for `stage`.
    #[must_use]
    pub fn begin(stage: StageName, attempt: usize) -> Self {
        Self {
            stage,
            attempt,
            status: StageStatus::Started,
            started_at: now_utc(),
            finished_at: None,
            output: None,
            error: None,
        }
    }

    /// Begins a retry attempt ordered strictly after the prior one.
    ///
    /// A retry record's `started_at` must land strictly after the failed
    /// record's `finished_at`; when the clock ties at microsecond
    /// resolution, the start is nudged past the prior finish.
    #[must_use]
    pub fn begin_after(stage: StageName, attempt: usize, prior_finish: Timestamp) -> Self {
        let mut record = Self::begin(stage, attempt);
        if record.started_at <= prior_finish {
            record.started_at = prior_finish + chrono::Duration::microseconds(1);
        }
        record
    }

    /// Marks the record as reporting sub-progress.
    ///
    /// No-op once terminal; records never leave a terminal status.
    pub fn mark_processing(&mut self) {
        if !self.status.is_terminal() {
            self.status = StageStatus::Processing;
        }
    }

    /// Completes the record with the stage's output.
    pub fn succeed(&mut self, output: serde_json::Value) {
        if self.status.is_terminal() {
            return;
        }
        self.status = StageStatus::Success;
        self.output = Some(output);
        self.finished_at = Some(now_utc());
    }

    /// Completes the record with a failure.
    pub fn fail(&mut self, error: StageError) {
        if self.status.is_terminal() {
            return;
        }
        self.status = StageStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now_utc());
    }

    /// Returns true once the record reached `success` or `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
