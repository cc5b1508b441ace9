//! Plan stage: prioritized action plan from the diagnosis.

use super::{Stage, StageInput, StageName};
use crate::errors::StageError;
use async_trait::async_trait;

/// Builds a rule-based, severity-ordered action plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanStage;

impl PlanStage {
    /// Creates the plan stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Searchable text of a flag, whether it was a dict or a bare string.
    fn flag_text(flag: &serde_json::Value) -> String {
        if let Some(obj) = flag.as_object() {
            let code = obj.get("code").and_then(serde_json::Value::as_str).unwrap_or("");
            let message = obj
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            format!("{code} {message}").to_lowercase()
        } else {
            flag.to_string().to_lowercase()
        }
    }

    fn suggestions(flags: &[serde_json::Value]) -> Vec<&'static str> {
        let mut suggestions = Vec::new();
        let mut push = |s: &'static str, out: &mut Vec<&'static str>| {
            if !out.contains(&s) {
                out.push(s);
            }
        };

        for flag in flags {
            let text = Self::flag_text(flag);
            if text.contains("missing_artifact") || text.contains("checkpoint") {
                push("Configure model checkpointing in your training pipeline", &mut suggestions);
            }
            if text.contains("fail_rate") || text.contains("test") || text.contains("success_rate")
            {
                push("Review failing test cases and fix underlying issues", &mut suggestions);
            }
            if text.contains("overfit") {
                push(
                    "Add regularization (dropout, L2) or reduce model complexity",
                    &mut suggestions,
                );
            }
            if text.contains("variance") || text.contains("unstable") {
                push(
                    "Increase training stability with learning rate scheduling",
                    &mut suggestions,
                );
            }
            if text.contains("spike") || text.contains("anomaly") {
                push(
                    "Investigate training logs for data or infrastructure issues",
                    &mut suggestions,
                );
            }
        }

        if suggestions.is_empty() {
            suggestions.push("No specific issues detected - continue monitoring");
        }
        suggestions
    }
}

#[async_trait]
impl Stage for PlanStage {
    fn name(&self) -> StageName {
        StageName::Plan
    }

    async fn run(&self, input: &StageInput) -> Result<serde_json::Value, StageError> {
        input.progress.message("Creating action plan");

        // Diagnosis may be absent on the skip path.
        let diagnosis = input
            .upstream_output(StageName::Diagnose)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let severity = diagnosis
            .get("severity_score")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let flags = diagnosis
            .get("flags")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();

        let suggestions = Self::suggestions(&flags);
        let plan: Vec<serde_json::Value> = suggestions
            .iter()
            .enumerate()
            .map(|(i, action)| {
                serde_json::json!({
                    "priority": i + 1,
                    "action": action,
                })
            })
            .collect();

        let urgency = if severity >= 60 {
            "Act before the next scheduled run"
        } else if severity >= 30 {
            "Address within the current iteration"
        } else {
            "Routine follow-up"
        };

        Ok(serde_json::json!({
            "run_id": input.run_id,
            "severity_score": severity,
            "suggestions": suggestions,
            "plan": plan,
            "summary": format!(
                "{} action(s) planned at severity {severity}. {urgency}.",
                plan.len()
            ),
        }))
    }
}
