//! Ingest stage: validates and normalizes the submitted record.

use super::{Stage, StageInput, StageName};
use crate::core::ExperimentRecord;
use crate::errors::StageError;
use async_trait::async_trait;

/// Normalizes the two supported submission formats into one shape.
///
/// Native ML submissions pass through; custom exports are remapped
/// (`experiment_id` becomes `run_id`, `results` become `metrics`). Anything
/// else is rejected with an `unsupported_format` cause.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStage;

impl IngestStage {
    /// Creates the ingest stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn normalize_custom(record: &ExperimentRecord) -> serde_json::Value {
        serde_json::json!({
            "run_id": record.experiment_id,
            "model": record.name.clone().unwrap_or_else(|| "unknown_model".to_string()),
            "hyperparameters": {
                "description": record.description.clone().unwrap_or_else(|| "N/A".to_string()),
            },
            "metrics": record.results,
            "timestamp": record.created_at.clone().unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string()),
        })
    }
}

#[async_trait]
impl Stage for IngestStage {
    fn name(&self) -> StageName {
        StageName::Ingest
    }

    async fn run(&self, input: &StageInput) -> Result<serde_json::Value, StageError> {
        input.progress.message("Normalizing experiment data");

        let record = &input.record;
        if record.is_ml_format() {
            tracing::info!(run_id = %input.run_id, "Detected ML format");
            return Ok(serde_json::json!({
                "format": "ml",
                "normalized": record,
                "message": "ML experiment validated and ingested",
            }));
        }

        if record.is_custom_format() {
            tracing::info!(run_id = %input.run_id, "Detected custom format");
            return Ok(serde_json::json!({
                "format": "custom",
                "normalized": Self::normalize_custom(record),
                "message": "Custom format normalized",
            }));
        }

        Err(StageError::with_code(
            "Unsupported experiment format",
            "unsupported_format",
        ))
    }
}
