//! The composite result: merged output of all successful stages.
//!
//! Built incrementally as stages succeed and finalized exactly once per
//! run. Merging is pure and idempotent so that a retry replaying the same
//! `(stage, output)` pair cannot corrupt the accumulated state.

use crate::core::RunStatus;
use crate::stages::StageName;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Baseline-versus-improved metric summary, populated once Evaluate ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    /// The model under analysis.
    pub model_name: String,
    /// Metrics as submitted.
    pub baseline_metrics: HashMap<String, serde_json::Value>,
    /// Metrics projected after applying the improvements.
    pub improved_metrics: HashMap<String, serde_json::Value>,
    /// One-line pipeline summary.
    pub summary: String,
}

/// The merged output of all successful stages for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeResult {
    /// The run this composite belongs to.
    pub run_id: String,

    /// Overall pipeline status at serialization time.
    pub pipeline_status: RunStatus,

    /// When the run started (ISO 8601).
    pub started_at: String,

    /// When the composite was finalized (ISO 8601). Absent until then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    /// Per-stage outputs keyed by composite key (`ingest`, `diagnosis`, ...).
    /// A stage's entry is present if and only if its latest record succeeded.
    #[serde(flatten)]
    pub stages: BTreeMap<String, serde_json::Value>,

    /// Stages that were skipped past after a failure (wire names).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,

    /// Baseline vs. improved metrics, present once Evaluate ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<Overview>,
}

impl CompositeResult {
    /// Creates an empty composite for a new run.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_status: RunStatus::Pending,
            started_at: iso_timestamp(),
            finished_at: None,
            stages: BTreeMap::new(),
            skipped: Vec::new(),
            overview: None,
        }
    }

    /// Returns a composite with `stage`'s output set.
    ///
    /// Pure and idempotent: merging the same pair twice equals merging once.
    /// Never requires entries from stages that have not succeeded.
    #[must_use]
    pub fn merge(&self, stage: StageName, output: &serde_json::Value) -> Self {
        let mut next = self.clone();
        next.stages
            .insert(stage.composite_key().to_string(), output.clone());
        next
    }

    /// Returns a composite with `stage` recorded as skipped.
    ///
    /// The stage's output entry stays absent; downstream merges must treat
    /// the missing key as unavailable.
    #[must_use]
    pub fn mark_skipped(&self, stage: StageName) -> Self {
        let mut next = self.clone();
        let name = stage.wire_name().to_string();
        if !next.skipped.contains(&name) {
            next.skipped.push(name);
        }
        next
    }

    /// Returns a composite with the overview set.
    #[must_use]
    pub fn with_overview(&self, overview: Overview) -> Self {
        let mut next = self.clone();
        next.overview = Some(overview);
        next
    }

    /// Stamps the terminal status and finish time. Applied at most once:
    /// a composite that is already finalized is returned unchanged.
    #[must_use]
    pub fn finalize(&self, status: RunStatus) -> Self {
        if self.finished_at.is_some() {
            return self.clone();
        }
        let mut next = self.clone();
        next.pipeline_status = status;
        next.finished_at = Some(iso_timestamp());
        next
    }

    /// Returns a stage's merged output, if it succeeded.
    #[must_use]
    pub fn stage_output(&self, stage: StageName) -> Option<&serde_json::Value> {
        self.stages.get(stage.composite_key())
    }

    /// Returns true if the stage's output is present.
    #[must_use]
    pub fn has_stage(&self, stage: StageName) -> bool {
        self.stages.contains_key(stage.composite_key())
    }
}
