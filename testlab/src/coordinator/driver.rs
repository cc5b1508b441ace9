//! The coordinator's run loop.
//!
//! One task per run drives the five stages strictly in order. Every state
//! transition of every stage becomes exactly one progress event; a failure
//! halts the loop until an external retry/skip decision arrives or the
//! bounded halt window expires.

use crate::config::CoordinatorConfig;
use crate::coordinator::Run;
use crate::core::{Overview, ProgressEvent, RunStatus, StageRecord};
use crate::errors::PipelineError;
use crate::events::EventSender;
use crate::stages::{ProgressHandle, Stage, StageInput, StageName};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{info, warn};

/// External decision for a halted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    /// Re-run the failed stage with the same inputs.
    Retry(StageName),
    /// Advance past the failed stage without output.
    Skip(StageName),
}

impl RunCommand {
    fn stage(self) -> StageName {
        match self {
            Self::Retry(stage) | Self::Skip(stage) => stage,
        }
    }
}

/// Run state observable from outside the coordinator task.
///
/// The registry validates retry/skip against this before sending the
/// command, so misdirected calls are rejected synchronously.
#[derive(Debug, Default)]
pub struct RunShared {
    status: RwLock<RunStatus>,
    failed_stage: RwLock<Option<StageName>>,
}

impl RunShared {
    /// Current run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        *self.status.read()
    }

    /// The currently-failed stage while halted.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageName> {
        *self.failed_stage.read()
    }

    fn set_running(&self) {
        *self.status.write() = RunStatus::Running;
        *self.failed_stage.write() = None;
    }

    fn set_halted(&self, stage: StageName) {
        *self.status.write() = RunStatus::Halted;
        *self.failed_stage.write() = Some(stage);
    }

    fn set_terminal(&self, status: RunStatus) {
        *self.status.write() = status;
        *self.failed_stage.write() = None;
    }
}

/// Outcome of waiting for a retry/skip decision.
enum HaltDecision {
    Retry,
    Skip,
    Expired,
}

/// Drives one run to a terminal status, emitting events along the way.
///
/// Returns the final run state (used by tests; the registry discards it).
pub(crate) async fn drive_run(
    mut run: Run,
    stages: [Arc<dyn Stage>; 5],
    config: CoordinatorConfig,
    events: EventSender,
    mut commands: mpsc::Receiver<RunCommand>,
    shared: Arc<RunShared>,
) -> Run {
    info!(run_id = %run.run_id, "Pipeline started");
    run.status = RunStatus::Running;
    shared.set_running();

    while let Some(stage_name) = run.current_stage() {
        let stage = &stages[stage_name.index()];
        let attempt = run.attempts(stage_name) + 1;
        // Retries anchor past the prior attempt so record timestamps
        // stay strictly ordered even on coarse clocks.
        let mut record = match run.latest_record(stage_name).and_then(|r| r.finished_at) {
            Some(prior) => StageRecord::begin_after(stage_name, attempt, prior),
            None => StageRecord::begin(stage_name, attempt),
        };

        events.send(ProgressEvent::started(stage_name)).await;

        let input = StageInput {
            run_id: run.run_id.clone(),
            record: run.record.clone(),
            upstream: run.composite.clone(),
            progress: ProgressHandle::new(stage_name, events.raw()),
        };

        let outcome = match timeout(config.stage_timeout(), stage.run(&input)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(PipelineError::StageFault {
                stage: stage_name,
                source,
            }),
            Err(_) => Err(PipelineError::StageTimeout {
                stage: stage_name,
                timeout_ms: config.stage_timeout_ms,
            }),
        };

        match outcome {
            Ok(output) => {
                info!(run_id = %run.run_id, stage = %stage_name, attempt, "Stage succeeded");
                record.succeed(output.clone());
                run.history.push(record);

                events
                    .send(ProgressEvent::success(stage_name, output.clone()))
                    .await;

                run.composite = run.composite.merge(stage_name, &output);
                if stage_name == StageName::Evaluate {
                    run.composite = run.composite.with_overview(build_overview(&run, &output));
                }
                run.cursor += 1;
            }
            Err(fault) => {
                warn!(run_id = %run.run_id, attempt, error = %fault, "Stage failed");
                let error = fault.stage_error();
                record.fail(error.clone());
                run.history.push(record);

                // Exactly one failed event per failure, before the halt.
                events
                    .send(ProgressEvent::failed(stage_name, error.message))
                    .await;

                run.status = RunStatus::Halted;
                shared.set_halted(stage_name);

                match await_decision(&mut commands, stage_name, &config).await {
                    HaltDecision::Retry => {
                        // The first attempt is not a retry.
                        let retries_used = run.attempts(stage_name).saturating_sub(1);
                        if !config.retry_allowed(retries_used) {
                            return fail_run(
                                run,
                                &events,
                                &shared,
                                format!("Retry budget exhausted for stage '{stage_name}'"),
                            )
                            .await;
                        }
                        info!(run_id = %run.run_id, stage = %stage_name, "Retrying failed stage");
                        run.status = RunStatus::Running;
                        shared.set_running();
                        // Cursor untouched: the same stage re-executes with
                        // a fresh record.
                    }
                    HaltDecision::Skip => {
                        info!(run_id = %run.run_id, stage = %stage_name, "Skipping failed stage");
                        run.composite = run.composite.mark_skipped(stage_name);
                        run.cursor += 1;
                        run.status = RunStatus::Running;
                        shared.set_running();
                    }
                    HaltDecision::Expired => {
                        return fail_run(
                            run,
                            &events,
                            &shared,
                            format!(
                                "Run halted on stage '{stage_name}' and received no retry or skip within {}ms",
                                config.halt_timeout_ms
                            ),
                        )
                        .await;
                    }
                }
            }
        }
    }

    run.status = RunStatus::Completed;
    run.composite = run.composite.finalize(RunStatus::Completed);
    shared.set_terminal(RunStatus::Completed);

    match serde_json::to_value(&run.composite) {
        Ok(payload) => events.send(ProgressEvent::terminal_result(payload)).await,
        Err(e) => {
            // Composite serialization cannot fail for JSON-built outputs,
            // but a broken terminal frame must still close the stream.
            warn!(run_id = %run.run_id, error = %e, "Failed to serialize composite");
            events
                .send(ProgressEvent::terminal_failure(format!(
                    "Composite serialization failed: {e}"
                )))
                .await;
        }
    }

    info!(run_id = %run.run_id, "Pipeline completed");
    run
}

/// Waits for a decision on the currently-failed stage.
///
/// Commands targeting any other stage are stale leftovers from an earlier
/// halt; they are logged and ignored without resetting the idle window.
async fn await_decision(
    commands: &mut mpsc::Receiver<RunCommand>,
    failed: StageName,
    config: &CoordinatorConfig,
) -> HaltDecision {
    let deadline = Instant::now() + config.halt_timeout();
    loop {
        match timeout_at(deadline, commands.recv()).await {
            Err(_) | Ok(None) => return HaltDecision::Expired,
            Ok(Some(cmd)) if cmd.stage() == failed => {
                return match cmd {
                    RunCommand::Retry(_) => HaltDecision::Retry,
                    RunCommand::Skip(_) => HaltDecision::Skip,
                };
            }
            Ok(Some(cmd)) => {
                warn!(stage = %cmd.stage(), failed = %failed, "Ignoring stale command");
            }
        }
    }
}

async fn fail_run(
    mut run: Run,
    events: &EventSender,
    shared: &RunShared,
    message: String,
) -> Run {
    warn!(run_id = %run.run_id, %message, "Pipeline failed");
    run.status = RunStatus::Failed;
    run.composite = run.composite.finalize(RunStatus::Failed);
    shared.set_terminal(RunStatus::Failed);
    events.send(ProgressEvent::terminal_failure(message)).await;
    run
}

/// Lifts the Evaluate output into the composite overview.
fn build_overview(run: &Run, evaluation: &serde_json::Value) -> Overview {
    let metrics_map = |key: &str| -> HashMap<String, serde_json::Value> {
        evaluation
            .get(key)
            .and_then(serde_json::Value::as_object)
            .map(|m| m.clone().into_iter().collect())
            .unwrap_or_default()
    };

    let severity_label = run
        .composite
        .stage_output(StageName::Diagnose)
        .and_then(|d| d.get("severity_label"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("LOW")
        .to_string();

    Overview {
        model_name: run
            .record
            .model
            .clone()
            .unwrap_or_else(|| "Unknown Model".to_string()),
        baseline_metrics: metrics_map("baseline_metrics"),
        improved_metrics: metrics_map("improved_metrics"),
        summary: format!("Pipeline completed. {severity_label} severity issues detected."),
    }
}
