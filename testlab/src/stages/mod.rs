//! Stage trait and the five pipeline stages.
//!
//! The pipeline order is fixed: Ingest, Diagnose, Improve, Evaluate, Plan.
//! Each stage is a unit of work that consumes the submitted record plus the
//! composite accumulated so far and returns a structured JSON output or a
//! [`StageError`].

mod diagnose;
mod evaluate;
mod improve;
mod ingest;
mod plan;

pub use diagnose::DiagnoseStage;
pub use evaluate::EvaluateStage;
pub use improve::{Advisor, ImproveStage, RuleBasedAdvisor};
pub use ingest::IngestStage;
pub use plan::PlanStage;

use crate::core::{CompositeResult, ExperimentRecord, ProgressEvent};
use crate::errors::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The five stages in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Normalizes the submitted record.
    Ingest,
    /// Analyzes metrics and raises flags.
    Diagnose,
    /// Generates improvement recommendations and artifacts.
    Improve,
    /// Grades the current state and projects improved metrics.
    Evaluate,
    /// Produces a prioritized action plan.
    Plan,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [Self; 5] = [
        Self::Ingest,
        Self::Diagnose,
        Self::Improve,
        Self::Evaluate,
        Self::Plan,
    ];

    /// Position of the stage in the fixed order.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Ingest => 0,
            Self::Diagnose => 1,
            Self::Improve => 2,
            Self::Evaluate => 3,
            Self::Plan => 4,
        }
    }

    /// The stage at a cursor position, if any.
    #[must_use]
    pub fn at_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The agent name carried on the wire.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest_agent",
            Self::Diagnose => "diagnosis_agent",
            Self::Improve => "ml_improvement_agent",
            Self::Evaluate => "eval_agent",
            Self::Plan => "planner_agent",
        }
    }

    /// The key under which this stage's output lands in the composite.
    #[must_use]
    pub fn composite_key(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Diagnose => "diagnosis",
            Self::Improve => "ml_improvement",
            Self::Evaluate => "evaluation",
            Self::Plan => "planner",
        }
    }

    /// Resolves a wire agent name back to a stage.
    #[must_use]
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.wire_name() == name)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Handle stages use to report sub-progress.
///
/// Reports become `processing` frames on the run's event stream. Reporting
/// is best-effort: a closed or full channel drops the frame silently.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    stage: StageName,
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressHandle {
    /// Creates a handle bound to a run's event channel.
    #[must_use]
    pub fn new(stage: StageName, tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { stage, tx }
    }

    /// Creates a handle whose reports go nowhere. For standalone stage tests.
    #[must_use]
    pub fn disconnected(stage: StageName) -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { stage, tx }
    }

    /// Reports a sub-progress message.
    pub fn message(&self, text: &str) {
        let event = ProgressEvent::processing(
            self.stage,
            serde_json::json!({ "message": text }),
        );
        if self.tx.try_send(event).is_err() {
            tracing::debug!(stage = %self.stage, "Dropped sub-progress report");
        }
    }
}

/// Input handed to each stage by the coordinator.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// The run being executed.
    pub run_id: String,
    /// The record as submitted.
    pub record: ExperimentRecord,
    /// The composite accumulated from prior stages. Entries may be absent
    /// when an upstream stage was skipped; stages treat that as unavailable.
    pub upstream: CompositeResult,
    /// Sub-progress reporting handle.
    pub progress: ProgressHandle,
}

impl StageInput {
    /// Returns an upstream stage's output, if that stage succeeded.
    #[must_use]
    pub fn upstream_output(&self, stage: StageName) -> Option<&serde_json::Value> {
        self.upstream.stage_output(stage)
    }
}

/// Trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Which of the five fixed stages this is.
    fn name(&self) -> StageName;

    /// Executes the stage.
    async fn run(&self, input: &StageInput) -> Result<serde_json::Value, StageError>;
}

/// The default production stage set, in execution order.
#[must_use]
pub fn default_stages() -> [Arc<dyn Stage>; 5] {
    [
        Arc::new(IngestStage::new()),
        Arc::new(DiagnoseStage::new()),
        Arc::new(ImproveStage::new(Arc::new(RuleBasedAdvisor))),
        Arc::new(EvaluateStage::new()),
        Arc::new(PlanStage::new()),
    ]
}
