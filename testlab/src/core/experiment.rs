//! The submitted experiment record.
//!
//! Submissions arrive in one of two shapes: the native ML format
//! (`run_id`/`model`/`hyperparameters`/`metrics`/`timestamp`) or a custom
//! export format (`experiment_id`/`results`/`status`). Both deserialize
//! into this one permissive struct; the Ingest stage decides which shape it
//! is and normalizes the custom one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One submitted input record, accepting both supported formats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Caller-supplied run id. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Hyperparameter mapping.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub hyperparameters: HashMap<String, serde_json::Value>,

    /// Metric mapping. Values may be scalars or history arrays.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, serde_json::Value>,

    /// Submission timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Saved artifacts (checkpoints etc.), keyed by artifact name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub artifacts: HashMap<String, serde_json::Value>,

    // Custom export format fields.
    /// Experiment id (custom format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,

    /// Result mapping (custom format).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub results: HashMap<String, serde_json::Value>,

    /// Export status (custom format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Creation timestamp (custom format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Experiment name (custom format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Experiment description (custom format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExperimentRecord {
    /// Returns true if all native ML format fields are present.
    #[must_use]
    pub fn is_ml_format(&self) -> bool {
        self.run_id.is_some()
            && self.model.is_some()
            && !self.hyperparameters.is_empty()
            && !self.metrics.is_empty()
            && self.timestamp.is_some()
    }

    /// Returns true if the custom export format fields are present.
    #[must_use]
    pub fn is_custom_format(&self) -> bool {
        self.experiment_id.is_some() && !self.results.is_empty() && self.status.is_some()
    }

    /// Returns a numeric metric by the first matching name.
    #[must_use]
    pub fn metric(&self, names: &[&str]) -> Option<f64> {
        names
            .iter()
            .find_map(|name| self.metrics.get(*name))
            .and_then(serde_json::Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ml_record() -> ExperimentRecord {
        serde_json::from_value(serde_json::json!({
            "run_id": "r1",
            "model": "resnet",
            "hyperparameters": {"lr": 0.01},
            "metrics": {"accuracy": 0.65},
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_ml_format_detection() {
        assert!(ml_record().is_ml_format());

        let partial: ExperimentRecord =
            serde_json::from_value(serde_json::json!({"run_id": "r1"})).unwrap();
        assert!(!partial.is_ml_format());
    }

    #[test]
    fn test_custom_format_detection() {
        let record: ExperimentRecord = serde_json::from_value(serde_json::json!({
            "experiment_id": "exp-9",
            "results": {"accuracy": 0.8},
            "status": "finished",
            "name": "sweep",
        }))
        .unwrap();
        assert!(record.is_custom_format());
        assert!(!record.is_ml_format());
    }

    #[test]
    fn test_metric_lookup_with_aliases() {
        let record = ml_record();
        assert_eq!(record.metric(&["accuracy", "acc"]), Some(0.65));
        assert_eq!(record.metric(&["acc", "accuracy"]), Some(0.65));
        assert_eq!(record.metric(&["val_loss"]), None);
    }

    #[test]
    fn test_unknown_shape_is_neither() {
        let record: ExperimentRecord =
            serde_json::from_value(serde_json::json!({"foo": "bar"})).unwrap();
        assert!(!record.is_ml_format());
        assert!(!record.is_custom_format());
    }
}
