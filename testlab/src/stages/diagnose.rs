//! Diagnose stage: threshold-driven metric analysis.
//!
//! Runs a fixed set of checks over the normalized record, raises flags with
//! a severity weight each, and maps flags to recommended actions.

use super::{Stage, StageInput, StageName};
use crate::core::ExperimentRecord;
use crate::errors::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// Check thresholds.
const VAL_OVER_TRAIN_WARN: f64 = 0.10;
const VAL_OVER_TRAIN_FAIL: f64 = 0.30;
const VARIANCE_REL_THRESHOLD: f64 = 0.08;
const SUCCESS_RATE_WARNING: f64 = 0.75;
const FAIL_RATE_SEVERE: f64 = 0.20;
const FAIL_RATE_MODERATE: f64 = 0.05;
const SPIKE_REL_CHANGE: f64 = 0.50;

/// A raised diagnosis flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisFlag {
    /// Machine-readable flag code.
    pub code: String,
    /// HIGH, MEDIUM, or INFO.
    pub level: String,
    /// Human-readable explanation.
    pub message: String,
}

impl DiagnosisFlag {
    fn new(code: &str, level: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            level: level.to_string(),
            message: message.into(),
        }
    }

    fn weight(&self) -> u32 {
        match self.code.as_str() {
            "high_fail_rate" | "low_success_rate" => 30,
            "overfit_fail" => 35,
            "missing_artifact" | "drift_hint" => 25,
            "high_variance" | "metric_spike" => 20,
            "overfit_warn" => 15,
            _ => 10,
        }
    }
}

/// Analyzes metrics, raises flags, and scores severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnoseStage;

impl DiagnoseStage {
    /// Creates the diagnose stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Relative standard deviation of a metric history.
    fn rel_std(values: &[f64]) -> f64 {
        if values.len() <= 1 {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        if mean == 0.0 {
            return if values.iter().any(|v| *v != 0.0) {
                f64::INFINITY
            } else {
                0.0
            };
        }
        let n = values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        var.sqrt() / mean.abs()
    }

    fn history(value: &serde_json::Value) -> Option<Vec<f64>> {
        let items = value.as_array()?;
        if items.len() < 3 {
            return None;
        }
        items.iter().map(serde_json::Value::as_f64).collect()
    }

    fn check_missing_artifacts(record: &ExperimentRecord, flags: &mut Vec<DiagnosisFlag>) {
        let has_any = record.artifacts.values().any(|v| !v.is_null());
        if !has_any {
            flags.push(DiagnosisFlag::new(
                "missing_artifact",
                "MEDIUM",
                "No artifacts (checkpoint) found",
            ));
        }
    }

    fn check_test_failures(record: &ExperimentRecord, flags: &mut Vec<DiagnosisFlag>) {
        if let (Some(failed), Some(total)) =
            (record.metric(&["failed"]), record.metric(&["total_tests"]))
        {
            if total > 0.0 {
                let fail_rate = failed / total;
                if fail_rate > FAIL_RATE_SEVERE {
                    flags.push(DiagnosisFlag::new(
                        "high_fail_rate",
                        "HIGH",
                        format!("High fail rate: {failed}/{total} ({:.1}%)", fail_rate * 100.0),
                    ));
                    return;
                }
                if fail_rate > FAIL_RATE_MODERATE {
                    flags.push(DiagnosisFlag::new(
                        "high_fail_rate",
                        "MEDIUM",
                        format!(
                            "Moderate fail rate: {failed}/{total} ({:.1}%)",
                            fail_rate * 100.0
                        ),
                    ));
                    return;
                }
            }
        }
        if let Some(sr) = record.metric(&["success_rate"]) {
            if sr < SUCCESS_RATE_WARNING {
                flags.push(DiagnosisFlag::new(
                    "low_success_rate",
                    "HIGH",
                    format!("Low success rate: {sr:.2}"),
                ));
            }
        }
    }

    fn check_overfit(record: &ExperimentRecord, flags: &mut Vec<DiagnosisFlag>) {
        let train = record.metric(&["train_loss"]);
        let val = record.metric(&["val_loss", "validation_loss"]);
        if let (Some(train_loss), Some(val_loss)) = (train, val) {
            if train_loss > 0.0 {
                let pct = (val_loss - train_loss) / train_loss.max(1e-9);
                if pct > VAL_OVER_TRAIN_FAIL {
                    flags.push(DiagnosisFlag::new(
                        "overfit_fail",
                        "HIGH",
                        format!(
                            "Validation loss is {:.1}% higher than training loss (severe overfit)",
                            pct * 100.0
                        ),
                    ));
                } else if pct > VAL_OVER_TRAIN_WARN {
                    flags.push(DiagnosisFlag::new(
                        "overfit_warn",
                        "MEDIUM",
                        format!(
                            "Validation loss is {:.1}% higher than training loss (possible overfit)",
                            pct * 100.0
                        ),
                    ));
                }
            }
        }
    }

    fn check_metric_spikes(record: &ExperimentRecord, flags: &mut Vec<DiagnosisFlag>) {
        for (name, value) in &record.metrics {
            let Some(history) = Self::history(value) else {
                continue;
            };
            let prev = history[history.len() - 2];
            let last = history[history.len() - 1];
            if prev != 0.0 && ((last - prev) / prev.abs().max(1e-9)).abs() > SPIKE_REL_CHANGE {
                flags.push(DiagnosisFlag::new(
                    "metric_spike",
                    "MEDIUM",
                    format!("Large spike in '{name}' from {prev} -> {last}"),
                ));
            }
        }
    }

    fn check_variance(record: &ExperimentRecord, flags: &mut Vec<DiagnosisFlag>) {
        for (name, value) in &record.metrics {
            let Some(history) = Self::history(value) else {
                continue;
            };
            let rs = Self::rel_std(&history);
            if rs > VARIANCE_REL_THRESHOLD {
                flags.push(DiagnosisFlag::new(
                    "high_variance",
                    "MEDIUM",
                    format!("High relative variability in '{name}' (rel_std={rs:.2})"),
                ));
            }
        }
    }

    fn severity_label(score: u32) -> &'static str {
        match score {
            0..=29 => "LOW",
            30..=59 => "MEDIUM",
            _ => "HIGH",
        }
    }

    fn recommended_actions(flags: &[DiagnosisFlag]) -> Vec<&'static str> {
        let mut actions = Vec::new();
        for flag in flags {
            let action = match flag.code.as_str() {
                "missing_artifact" => {
                    "Ensure model checkpoints/artifacts are being saved to the configured storage"
                }
                "high_fail_rate" | "low_success_rate" => {
                    "Investigate failing tests and logs; rerun failed cases locally"
                }
                "overfit_warn" | "overfit_fail" => {
                    "Consider regularization (dropout), reduce model complexity, or get more data"
                }
                "metric_spike" => {
                    "Inspect recent training logs for instability or preemption incidents"
                }
                "high_variance" => {
                    "Run additional runs to confirm variability, consider averaging or smoothing metrics"
                }
                _ => continue,
            };
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        actions
    }

    /// The record to diagnose: the Ingest stage's normalized output when
    /// available, the raw submission otherwise.
    fn effective_record(input: &StageInput) -> ExperimentRecord {
        input
            .upstream_output(StageName::Ingest)
            .and_then(|out| out.get("normalized"))
            .and_then(|normalized| serde_json::from_value(normalized.clone()).ok())
            .unwrap_or_else(|| input.record.clone())
    }
}

#[async_trait]
impl Stage for DiagnoseStage {
    fn name(&self) -> StageName {
        StageName::Diagnose
    }

    async fn run(&self, input: &StageInput) -> Result<serde_json::Value, StageError> {
        input.progress.message("Analyzing metrics and detecting issues");

        let record = Self::effective_record(input);
        let mut flags = Vec::new();
        Self::check_missing_artifacts(&record, &mut flags);
        Self::check_test_failures(&record, &mut flags);
        Self::check_overfit(&record, &mut flags);
        Self::check_metric_spikes(&record, &mut flags);
        Self::check_variance(&record, &mut flags);

        let severity: u32 = flags.iter().map(DiagnosisFlag::weight).sum::<u32>().min(100);

        Ok(serde_json::json!({
            "run_id": input.run_id,
            "flags": flags,
            "severity_score": severity,
            "severity_label": Self::severity_label(severity),
            "recommended_actions": Self::recommended_actions(&flags),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompositeResult;
    use crate::stages::ProgressHandle;

    fn input_for(metrics: serde_json::Value) -> StageInput {
        StageInput {
            run_id: "r1".to_string(),
            record: serde_json::from_value(serde_json::json!({
                "run_id": "r1",
                "model": "resnet",
                "hyperparameters": {"lr": 0.01},
                "metrics": metrics,
                "timestamp": "2024-01-01T00:00:00Z",
                "artifacts": {"checkpoint": "gs://bucket/ckpt"}
            }))
            .unwrap(),
            upstream: CompositeResult::new("r1"),
            progress: ProgressHandle::disconnected(StageName::Diagnose),
        }
    }

    fn flags_of(output: &serde_json::Value) -> Vec<String> {
        output["flags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["code"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_healthy_run_is_low_severity() {
        let input = input_for(serde_json::json!({
            "accuracy": 0.95, "train_loss": 0.2, "val_loss": 0.21
        }));
        let output = DiagnoseStage::new().run(&input).await.unwrap();

        assert!(flags_of(&output).is_empty());
        assert_eq!(output["severity_score"], 0);
        assert_eq!(output["severity_label"], "LOW");
    }

    #[tokio::test]
    async fn test_severe_overfit_flagged() {
        let input = input_for(serde_json::json!({
            "train_loss": 0.10, "val_loss": 0.25
        }));
        let output = DiagnoseStage::new().run(&input).await.unwrap();

        assert!(flags_of(&output).contains(&"overfit_fail".to_string()));
        assert_eq!(output["severity_score"], 35);
        assert_eq!(output["severity_label"], "MEDIUM");
    }

    #[tokio::test]
    async fn test_moderate_overfit_flagged() {
        let input = input_for(serde_json::json!({
            "train_loss": 0.10, "val_loss": 0.112
        }));
        let output = DiagnoseStage::new().run(&input).await.unwrap();
        assert!(flags_of(&output).contains(&"overfit_warn".to_string()));
    }

    #[tokio::test]
    async fn test_missing_artifacts_flagged() {
        let mut input = input_for(serde_json::json!({"accuracy": 0.9}));
        input.record.artifacts.clear();
        let output = DiagnoseStage::new().run(&input).await.unwrap();

        assert!(flags_of(&output).contains(&"missing_artifact".to_string()));
        let actions = output["recommended_actions"].as_array().unwrap();
        assert!(actions[0].as_str().unwrap().contains("checkpoints"));
    }

    #[tokio::test]
    async fn test_high_fail_rate_flagged() {
        let input = input_for(serde_json::json!({
            "passed": 60.0, "failed": 40.0, "total_tests": 100.0
        }));
        let output = DiagnoseStage::new().run(&input).await.unwrap();

        let flags = output["flags"].as_array().unwrap();
        let fail_flag = flags
            .iter()
            .find(|f| f["code"] == "high_fail_rate")
            .unwrap();
        assert_eq!(fail_flag["level"], "HIGH");
    }

    #[tokio::test]
    async fn test_spike_and_variance_on_history() {
        let input = input_for(serde_json::json!({
            "loss": [0.5, 0.4, 1.2]
        }));
        let output = DiagnoseStage::new().run(&input).await.unwrap();

        let codes = flags_of(&output);
        assert!(codes.contains(&"metric_spike".to_string()));
        assert!(codes.contains(&"high_variance".to_string()));
    }

    #[tokio::test]
    async fn test_severity_is_capped() {
        let mut input = input_for(serde_json::json!({
            "train_loss": 0.10, "val_loss": 0.30,
            "failed": 40.0, "total_tests": 100.0,
            "loss": [0.5, 0.4, 1.2]
        }));
        input.record.artifacts.clear();
        let output = DiagnoseStage::new().run(&input).await.unwrap();

        assert_eq!(output["severity_score"], 100);
        assert_eq!(output["severity_label"], "HIGH");
    }

    #[tokio::test]
    async fn test_prefers_normalized_upstream_record() {
        let mut input = input_for(serde_json::json!({"accuracy": 0.9}));
        // Upstream ingest normalized a custom record with a failing test suite.
        input.upstream = input.upstream.merge(
            StageName::Ingest,
            &serde_json::json!({
                "format": "custom",
                "normalized": {
                    "run_id": "r1",
                    "model": "m",
                    "hyperparameters": {"description": "x"},
                    "metrics": {"failed": 30.0, "total_tests": 100.0},
                    "timestamp": "2024-01-01T00:00:00Z",
                    "artifacts": {"checkpoint": "present"}
                }
            }),
        );

        let output = DiagnoseStage::new().run(&input).await.unwrap();
        assert!(flags_of(&output).contains(&"high_fail_rate".to_string()));
    }

    #[test]
    fn test_rel_std() {
        assert_eq!(DiagnoseStage::rel_std(&[1.0]), 0.0);
        assert_eq!(DiagnoseStage::rel_std(&[2.0, 2.0, 2.0]), 0.0);
        assert!(DiagnoseStage::rel_std(&[1.0, 2.0, 3.0]) > 0.3);
    }
}
