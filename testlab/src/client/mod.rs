//! Client-side event folding.
//!
//! [`ClientState`] reconstructs run state purely by folding the event
//! sequence in receipt order. It has no transport dependency: feed it from
//! a channel, a parsed SSE stream, or a recorded fixture. Malformed or
//! out-of-order events are protocol faults, logged and discarded without
//! ever crashing the fold.

use crate::core::{CompositeResult, EventStatus, ProgressEvent, RunStatus, StageStatus};
use crate::stages::StageName;
use tracing::warn;

/// What one applied event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    /// A stage moved to a new non-failed status.
    StageUpdated {
        /// The stage concerned.
        stage: StageName,
        /// Its new status.
        status: StageStatus,
    },
    /// A stage failed; retry/skip affordances should be shown.
    StageFailed {
        /// The stage that failed.
        stage: StageName,
        /// Human-readable failure message.
        message: String,
    },
    /// The run completed; the composite is now authoritative.
    Completed,
    /// The run failed terminally.
    RunFailed {
        /// Failure message from the terminal frame.
        message: String,
    },
    /// The event was malformed or out of order and was discarded.
    ProtocolFault {
        /// Why the event was rejected.
        reason: String,
    },
}

/// Folded view of one run, keyed by `run_id`.
#[derive(Debug, Clone)]
pub struct ClientState {
    run_id: String,
    stage_status: [StageStatus; 5],
    step_cursor: usize,
    composite: CompositeResult,
    failed_stage: Option<StageName>,
    overall: RunStatus,
}

impl ClientState {
    /// Creates the initial state for a run.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            composite: CompositeResult::new(&run_id),
            run_id,
            stage_status: [StageStatus::Idle; 5],
            step_cursor: 0,
            failed_stage: None,
            overall: RunStatus::Pending,
        }
    }

    /// The run this state tracks.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// A stage's folded status.
    #[must_use]
    pub fn stage_status(&self, stage: StageName) -> StageStatus {
        self.stage_status[stage.index()]
    }

    /// Index of the next stage expected to run.
    #[must_use]
    pub fn step_cursor(&self) -> usize {
        self.step_cursor
    }

    /// Overall run status as folded so far.
    #[must_use]
    pub fn overall(&self) -> RunStatus {
        self.overall
    }

    /// The currently-failed stage, when halted.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageName> {
        self.failed_stage
    }

    /// The composite as folded (authoritative after the terminal frame).
    #[must_use]
    pub fn composite(&self) -> &CompositeResult {
        &self.composite
    }

    /// Folds one event into the state.
    ///
    /// Events must be applied in receipt order; the transport delivers them
    /// in-order so no reordering happens here. Protocol faults are logged
    /// and reported in the delta without mutating the state.
    pub fn apply(&mut self, event: &ProgressEvent) -> StateDelta {
        if event.is_terminal() {
            return self.apply_terminal(event);
        }

        let Some(stage) = event.stage() else {
            return self.fault(format!("Unknown agent '{}'", event.agent));
        };

        match event.status {
            EventStatus::Started => {
                self.stage_status[stage.index()] = StageStatus::Started;
                if self.failed_stage == Some(stage) {
                    self.failed_stage = None;
                }
                self.overall = RunStatus::Running;
                StateDelta::StageUpdated {
                    stage,
                    status: StageStatus::Started,
                }
            }
            EventStatus::Processing => {
                // Only a stage between started and its outcome may report
                // sub-progress; anything else is out of order.
                if !self.stage_status[stage.index()].is_active() {
                    return self.fault(format!(
                        "Processing frame for '{}' while {}",
                        event.agent,
                        self.stage_status[stage.index()]
                    ));
                }
                self.stage_status[stage.index()] = StageStatus::Processing;
                StateDelta::StageUpdated {
                    stage,
                    status: StageStatus::Processing,
                }
            }
            EventStatus::Success => {
                self.stage_status[stage.index()] = StageStatus::Success;
                if let Some(payload) = &event.payload {
                    self.composite = self.composite.merge(stage, payload);
                }
                self.step_cursor = stage.index() + 1;
                if self.failed_stage == Some(stage) {
                    self.failed_stage = None;
                }
                self.overall = RunStatus::Running;
                StateDelta::StageUpdated {
                    stage,
                    status: StageStatus::Success,
                }
            }
            EventStatus::Failed => {
                self.stage_status[stage.index()] = StageStatus::Failed;
                self.failed_stage = Some(stage);
                self.overall = RunStatus::Halted;
                StateDelta::StageFailed {
                    stage,
                    message: event.error.clone().unwrap_or_default(),
                }
            }
        }
    }

    /// Optimistically records a retry request for the failed stage.
    ///
    /// Returns the stage to pass to the coordinator's retry operation, or
    /// `None` when the run is not halted. The next `started` event
    /// reconciles the optimistic state.
    pub fn retry(&mut self) -> Option<StageName> {
        let stage = self.failed_stage.take()?;
        self.stage_status[stage.index()] = StageStatus::Started;
        self.overall = RunStatus::Running;
        Some(stage)
    }

    /// Optimistically records a skip request for the failed stage.
    ///
    /// Marks the stage skipped locally and advances the cursor past it;
    /// the terminal frame's `skipped` list is the authoritative record.
    pub fn skip(&mut self) -> Option<StageName> {
        let stage = self.failed_stage.take()?;
        self.stage_status[stage.index()] = StageStatus::Skipped;
        self.step_cursor = stage.index() + 1;
        self.overall = RunStatus::Running;
        Some(stage)
    }

    /// The terminal payload always wins over incrementally folded state,
    /// guarding against any event loss. Replaying it is a no-op.
    fn apply_terminal(&mut self, event: &ProgressEvent) -> StateDelta {
        match event.status {
            EventStatus::Success => {
                let Some(payload) = &event.payload else {
                    return self.fault("Terminal frame without payload".to_string());
                };
                let composite: CompositeResult = match serde_json::from_value(payload.clone()) {
                    Ok(c) => c,
                    Err(e) => {
                        return self.fault(format!("Malformed terminal composite: {e}"));
                    }
                };
                for stage in StageName::ALL {
                    if composite.has_stage(stage) {
                        self.stage_status[stage.index()] = StageStatus::Success;
                    } else if composite.skipped.contains(&stage.wire_name().to_string()) {
                        self.stage_status[stage.index()] = StageStatus::Skipped;
                    }
                }
                self.composite = composite;
                self.step_cursor = StageName::ALL.len();
                self.failed_stage = None;
                self.overall = RunStatus::Completed;
                StateDelta::Completed
            }
            EventStatus::Failed => {
                self.overall = RunStatus::Failed;
                StateDelta::RunFailed {
                    message: event.error.clone().unwrap_or_default(),
                }
            }
            EventStatus::Started | EventStatus::Processing => {
                self.fault(format!("Unexpected pipeline frame '{}'", event.status))
            }
        }
    }

    fn fault(&self, reason: String) -> StateDelta {
        warn!(run_id = %self.run_id, %reason, "Discarding protocol fault");
        StateDelta::ProtocolFault { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn success_sequence() -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        for stage in StageName::ALL {
            events.push(ProgressEvent::started(stage));
            events.push(ProgressEvent::success(stage, json!({ "ok": true })));
        }
        events
    }

    fn terminal_composite(run_id: &str) -> serde_json::Value {
        json!({
            "run_id": run_id,
            "pipeline_status": "completed",
            "started_at": "2026-08-28T10:00:00.000000+00:00",
            "finished_at": "2026-08-28T10:00:05.000000+00:00",
            "skipped": [],
            "ingest": { "ok": true },
            "diagnosis": { "severity_score": 0 },
            "evaluation": { "grade": "GOOD" },
        })
    }

    #[test]
    fn test_fold_success_sequence() {
        let mut state = ClientState::new("r1");
        assert_eq!(state.overall(), RunStatus::Pending);

        for event in success_sequence() {
            let delta = state.apply(&event);
            assert!(!matches!(delta, StateDelta::ProtocolFault { .. }));
        }

        assert_eq!(state.step_cursor(), 5);
        assert_eq!(state.overall(), RunStatus::Running);
        for stage in StageName::ALL {
            assert_eq!(state.stage_status(stage), StageStatus::Success);
        }
        assert!(state.composite().has_stage(StageName::Plan));
    }

    #[test]
    fn test_terminal_frame_is_authoritative_and_idempotent() {
        let mut state = ClientState::new("r1");
        let terminal = ProgressEvent::terminal_result(terminal_composite("r1"));

        assert_eq!(state.apply(&terminal), StateDelta::Completed);
        let first = serde_json::to_value(state.composite()).unwrap();
        assert_eq!(state.overall(), RunStatus::Completed);
        assert_eq!(state.stage_status(StageName::Ingest), StageStatus::Success);

        // Replaying the terminal frame changes nothing.
        assert_eq!(state.apply(&terminal), StateDelta::Completed);
        let second = serde_json::to_value(state.composite()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_processing_before_started_is_protocol_fault() {
        let mut state = ClientState::new("r1");
        let event = ProgressEvent::processing(StageName::Diagnose, json!({ "message": "hi" }));

        let delta = state.apply(&event);
        assert!(matches!(delta, StateDelta::ProtocolFault { .. }));
        assert_eq!(state.stage_status(StageName::Diagnose), StageStatus::Idle);
        assert_eq!(state.step_cursor(), 0);
    }

    #[test]
    fn test_processing_after_terminal_status_is_protocol_fault() {
        let mut state = ClientState::new("r1");
        state.apply(&ProgressEvent::started(StageName::Ingest));
        state.apply(&ProgressEvent::success(StageName::Ingest, json!({})));

        let late = ProgressEvent::processing(StageName::Ingest, json!({ "message": "late" }));
        let delta = state.apply(&late);
        assert!(matches!(delta, StateDelta::ProtocolFault { .. }));
        assert_eq!(state.stage_status(StageName::Ingest), StageStatus::Success);

        state.apply(&ProgressEvent::started(StageName::Diagnose));
        state.apply(&ProgressEvent::failed(StageName::Diagnose, "boom"));
        let delta = state.apply(&ProgressEvent::processing(
            StageName::Diagnose,
            json!({ "message": "late" }),
        ));
        assert!(matches!(delta, StateDelta::ProtocolFault { .. }));
        assert_eq!(state.stage_status(StageName::Diagnose), StageStatus::Failed);
        assert_eq!(state.failed_stage(), Some(StageName::Diagnose));
    }

    #[test]
    fn test_unknown_agent_is_protocol_fault() {
        let mut state = ClientState::new("r1");
        let mut event = ProgressEvent::started(StageName::Ingest);
        event.agent = "mystery_agent".to_string();

        let delta = state.apply(&event);
        assert!(matches!(delta, StateDelta::ProtocolFault { .. }));
        assert_eq!(state.stage_status(StageName::Ingest), StageStatus::Idle);
    }

    #[test]
    fn test_failed_event_halts_and_records_stage() {
        let mut state = ClientState::new("r1");
        state.apply(&ProgressEvent::started(StageName::Ingest));
        state.apply(&ProgressEvent::success(StageName::Ingest, json!({})));
        state.apply(&ProgressEvent::started(StageName::Diagnose));
        state.apply(&ProgressEvent::success(StageName::Diagnose, json!({})));
        state.apply(&ProgressEvent::started(StageName::Improve));

        let delta = state.apply(&ProgressEvent::failed(
            StageName::Improve,
            "Model unavailable",
        ));
        assert_eq!(
            delta,
            StateDelta::StageFailed {
                stage: StageName::Improve,
                message: "Model unavailable".to_string(),
            }
        );
        assert_eq!(state.failed_stage(), Some(StageName::Improve));
        assert_eq!(state.overall(), RunStatus::Halted);
        // The cursor stays where the last success left it.
        assert_eq!(state.step_cursor(), 2);
    }

    #[test]
    fn test_retry_is_optimistic_and_reconciled_by_started() {
        let mut state = ClientState::new("r1");
        state.apply(&ProgressEvent::started(StageName::Improve));
        state.apply(&ProgressEvent::failed(StageName::Improve, "boom"));

        assert_eq!(state.retry(), Some(StageName::Improve));
        assert_eq!(state.failed_stage(), None);
        assert_eq!(state.stage_status(StageName::Improve), StageStatus::Started);
        assert_eq!(state.overall(), RunStatus::Running);

        // Second call with nothing failed is a no-op.
        assert_eq!(state.retry(), None);

        state.apply(&ProgressEvent::started(StageName::Improve));
        state.apply(&ProgressEvent::success(StageName::Improve, json!({})));
        assert_eq!(state.stage_status(StageName::Improve), StageStatus::Success);
    }

    #[test]
    fn test_skip_marks_stage_and_advances_cursor() {
        let mut state = ClientState::new("r1");
        state.apply(&ProgressEvent::started(StageName::Improve));
        state.apply(&ProgressEvent::failed(StageName::Improve, "boom"));

        assert_eq!(state.skip(), Some(StageName::Improve));
        assert_eq!(state.stage_status(StageName::Improve), StageStatus::Skipped);
        assert_eq!(state.step_cursor(), StageName::Improve.index() + 1);
        assert_eq!(state.failed_stage(), None);

        // The next stage's events apply normally.
        state.apply(&ProgressEvent::started(StageName::Evaluate));
        state.apply(&ProgressEvent::success(StageName::Evaluate, json!({})));
        assert_eq!(state.step_cursor(), StageName::Evaluate.index() + 1);
    }

    #[test]
    fn test_terminal_skipped_list_marks_stages() {
        let mut state = ClientState::new("r1");
        let mut composite = terminal_composite("r1");
        composite["skipped"] = json!(["ml_improvement_agent"]);

        state.apply(&ProgressEvent::terminal_result(composite));
        assert_eq!(
            state.stage_status(StageName::Improve),
            StageStatus::Skipped
        );
        assert_eq!(state.stage_status(StageName::Diagnose), StageStatus::Success);
    }

    #[test]
    fn test_terminal_failure() {
        let mut state = ClientState::new("r1");
        let delta = state.apply(&ProgressEvent::terminal_failure("halt window expired"));
        assert_eq!(
            delta,
            StateDelta::RunFailed {
                message: "halt window expired".to_string(),
            }
        );
        assert_eq!(state.overall(), RunStatus::Failed);
    }
}
