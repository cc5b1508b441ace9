//! Per-run state owned by the coordinator.

use crate::core::{CompositeResult, ExperimentRecord, RunStatus, StageRecord};
use crate::stages::StageName;

/// One pipeline execution.
///
/// Mutated only by the coordinator task that owns it. The `history` is an
/// append-only audit trail: every stage attempt leaves one record, and
/// retries append rather than overwrite.
#[derive(Debug)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: String,
    /// The record as submitted.
    pub record: ExperimentRecord,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Index of the next stage to execute.
    pub cursor: usize,
    /// Output accumulated from successful stages.
    pub composite: CompositeResult,
    /// Every stage attempt, in execution order.
    pub history: Vec<StageRecord>,
}

impl Run {
    /// Creates a pending run.
    #[must_use]
    pub fn new(run_id: impl Into<String>, record: ExperimentRecord) -> Self {
        let run_id = run_id.into();
        Self {
            composite: CompositeResult::new(&run_id),
            run_id,
            record,
            status: RunStatus::Pending,
            cursor: 0,
            history: Vec::new(),
        }
    }

    /// The stage at the cursor, or `None` when all stages are done.
    #[must_use]
    pub fn current_stage(&self) -> Option<StageName> {
        StageName::at_index(self.cursor)
    }

    /// How many attempts a stage has made so far.
    #[must_use]
    pub fn attempts(&self, stage: StageName) -> usize {
        self.history.iter().filter(|r| r.stage == stage).count()
    }

    /// The latest record for a stage, if it ever started.
    #[must_use]
    pub fn latest_record(&self, stage: StageName) -> Option<&StageRecord> {
        self.history.iter().rev().find(|r| r.stage == stage)
    }
}
