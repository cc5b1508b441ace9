//! Evaluate stage: grades the current state of the experiment.
//!
//! Test-suite submissions are graded on success rate, ML submissions on
//! accuracy. The output also carries baseline and projected improved
//! metrics, which the coordinator lifts into the composite overview.

use super::{Stage, StageInput, StageName};
use crate::errors::StageError;
use async_trait::async_trait;
use std::collections::HashMap;

const SUCCESS_RATE_GOOD: f64 = 0.90;
const SUCCESS_RATE_WARNING: f64 = 0.70;
const ACCURACY_GOOD: f64 = 0.85;
const ACCURACY_WARNING: f64 = 0.70;

/// Projected accuracy uplift once the suggested improvements are applied.
const PROJECTED_ACCURACY_UPLIFT: f64 = 0.05;

/// Grades metrics and projects improved values.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluateStage;

impl EvaluateStage {
    /// Creates the evaluate stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_test_metrics(metrics: &HashMap<String, serde_json::Value>) -> bool {
        metrics.contains_key("success_rate")
            || (metrics.contains_key("passed")
                && metrics.contains_key("failed")
                && metrics.contains_key("total_tests"))
    }

    fn grade_success_rate(input: &StageInput) -> (&'static str, Option<f64>) {
        let sr = input.record.metric(&["success_rate"]).or_else(|| {
            let passed = input.record.metric(&["passed"])?;
            let total = input.record.metric(&["total_tests"])?;
            (total > 0.0).then(|| passed / total)
        });

        match sr {
            None => ("UNKNOWN", None),
            Some(v) if v >= SUCCESS_RATE_GOOD => ("GOOD", Some(v)),
            Some(v) if v >= SUCCESS_RATE_WARNING => ("WARNING", Some(v)),
            Some(v) => ("FAIL", Some(v)),
        }
    }

    fn grade_accuracy(accuracy: Option<f64>) -> &'static str {
        match accuracy {
            None => "UNKNOWN",
            Some(v) if v >= ACCURACY_GOOD => "GOOD",
            Some(v) if v >= ACCURACY_WARNING => "WARNING",
            Some(_) => "FAIL",
        }
    }

    /// Baseline metrics plus the projected uplift on accuracy.
    fn improved_metrics(
        metrics: &HashMap<String, serde_json::Value>,
    ) -> HashMap<String, serde_json::Value> {
        let mut improved = metrics.clone();
        if let Some(accuracy) = metrics.get("accuracy").and_then(serde_json::Value::as_f64) {
            improved.insert(
                "accuracy".to_string(),
                serde_json::json!((accuracy + PROJECTED_ACCURACY_UPLIFT).min(1.0)),
            );
        }
        improved
    }
}

#[async_trait]
impl Stage for EvaluateStage {
    fn name(&self) -> StageName {
        StageName::Evaluate
    }

    async fn run(&self, input: &StageInput) -> Result<serde_json::Value, StageError> {
        input.progress.message("Evaluating improvements");

        let metrics = &input.record.metrics;
        let baseline = metrics.clone();
        let improved = Self::improved_metrics(metrics);

        if Self::is_test_metrics(metrics) {
            let (grade, sr) = Self::grade_success_rate(input);
            let note = match grade {
                "GOOD" => "High success rate. System performing well.",
                "WARNING" => "Moderate success rate. Needs inspection.",
                "FAIL" => "Low success rate. System failing tests.",
                _ => "Success rate unavailable.",
            };
            return Ok(serde_json::json!({
                "run_id": input.run_id,
                "metric_type": "test_based",
                "grade": grade,
                "success_rate": sr,
                "baseline_metrics": baseline,
                "improved_metrics": improved,
                "notes": [note],
            }));
        }

        let accuracy = input.record.metric(&["accuracy", "acc"]);
        let grade = Self::grade_accuracy(accuracy);
        Ok(serde_json::json!({
            "run_id": input.run_id,
            "metric_type": "ml_based",
            "grade": grade,
            "accuracy": accuracy,
            "train_loss": input.record.metric(&["train_loss"]),
            "val_loss": input.record.metric(&["val_loss", "validation_loss"]),
            "baseline_metrics": baseline,
            "improved_metrics": improved,
            "notes": [format!("ML metric evaluation applied. Grade={grade}")],
        }))
    }
}
