//! Tracking of in-flight runs and the retry/skip entry points.

use crate::config::CoordinatorConfig;
use crate::coordinator::driver::{drive_run, RunCommand, RunShared};
use crate::coordinator::Run;
use crate::core::{ExperimentRecord, RunStatus};
use crate::errors::PipelineError;
use crate::events::{event_channel, EventStream};
use crate::stages::{default_stages, Stage, StageName};
use crate::utils::generate_run_id;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Room for one decision plus a little slack for racy resubmissions.
const COMMAND_BUFFER: usize = 4;

/// Per-run handle kept while the run's task is alive.
#[derive(Debug, Clone)]
struct RunHandle {
    cmd_tx: mpsc::Sender<RunCommand>,
    shared: Arc<RunShared>,
}

/// Owns all in-flight runs.
///
/// Each started run gets its own coordinator task; the registry keeps just
/// enough shared state to validate retry/skip calls synchronously. Entries
/// are removed when the run reaches a terminal status, so terminal runs are
/// indistinguishable from unknown ones.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    runs: Arc<DashMap<String, RunHandle>>,
    config: CoordinatorConfig,
    stages: [Arc<dyn Stage>; 5],
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}

impl RunRegistry {
    /// Creates a registry with the production stage set.
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_stages(config, default_stages())
    }

    /// Creates a registry with a custom stage set.
    #[must_use]
    pub fn with_stages(config: CoordinatorConfig, stages: [Arc<dyn Stage>; 5]) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            config,
            stages,
        }
    }

    /// Starts a new run and returns its id with the one event stream.
    ///
    /// The stream handle is the only subscription to the run's events;
    /// dropping it discards subsequent events without affecting execution.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateRun`] when a run with the record's
    /// id is already in flight.
    pub fn start(
        &self,
        mut record: ExperimentRecord,
    ) -> Result<(String, EventStream), PipelineError> {
        let run_id = record
            .run_id
            .clone()
            .unwrap_or_else(|| {
                let id = generate_run_id();
                record.run_id = Some(id.clone());
                id
            });

        let entry = match self.runs.entry(run_id.clone()) {
            Entry::Occupied(_) => return Err(PipelineError::DuplicateRun(run_id)),
            Entry::Vacant(v) => v,
        };

        let (events, stream) = event_channel(self.config.event_buffer);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let shared = Arc::new(RunShared::default());
        entry.insert(RunHandle {
            cmd_tx,
            shared: Arc::clone(&shared),
        });

        let run = Run::new(&run_id, record);
        let stages = self.stages.clone();
        let config = self.config.clone();
        let runs = Arc::clone(&self.runs);
        let task_id = run_id.clone();
        tokio::spawn(async move {
            drive_run(run, stages, config, events, cmd_rx, shared).await;
            runs.remove(&task_id);
            debug!(run_id = %task_id, "Run task finished");
        });

        Ok((run_id, stream))
    }

    /// Requests a retry of the failed stage of a halted run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunNotFound`] for unknown or terminal runs,
    /// [`PipelineError::NotHalted`] when the run is not waiting on a
    /// decision, and [`PipelineError::StageMismatch`] when `stage` is not
    /// the stage that failed.
    pub fn retry(&self, run_id: &str, stage: StageName) -> Result<(), PipelineError> {
        self.dispatch(run_id, stage, RunCommand::Retry(stage))
    }

    /// Requests skipping the failed stage of a halted run.
    ///
    /// # Errors
    ///
    /// Same conditions as [`RunRegistry::retry`].
    pub fn skip(&self, run_id: &str, stage: StageName) -> Result<(), PipelineError> {
        self.dispatch(run_id, stage, RunCommand::Skip(stage))
    }

    /// Current status of an in-flight run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunNotFound`] for unknown or terminal runs.
    pub fn status(&self, run_id: &str) -> Result<RunStatus, PipelineError> {
        self.runs
            .get(run_id)
            .map(|h| h.shared.status())
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))
    }

    /// Number of in-flight runs.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    fn dispatch(
        &self,
        run_id: &str,
        stage: StageName,
        command: RunCommand,
    ) -> Result<(), PipelineError> {
        let handle = self
            .runs
            .get(run_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))?;

        if handle.shared.status() != RunStatus::Halted {
            return Err(PipelineError::NotHalted(run_id.to_string()));
        }
        match handle.shared.failed_stage() {
            Some(failed) if failed == stage => {}
            Some(failed) => {
                return Err(PipelineError::StageMismatch {
                    requested: stage,
                    failed,
                });
            }
            // The task flipped to a non-halted state between the two reads.
            None => return Err(PipelineError::NotHalted(run_id.to_string())),
        }

        handle
            .cmd_tx
            .try_send(command)
            .map_err(|e| PipelineError::Transport(format!("Command delivery failed: {e}")))
    }
}
