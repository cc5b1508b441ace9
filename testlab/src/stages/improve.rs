//! Improve stage: categorized improvement suggestions and code artifacts.
//!
//! Flag-driven rules produce quick fixes, medium-term changes, and
//! long-term work. Free-form recommendations come from an [`Advisor`], the
//! seam where the original system called an external model; an unavailable
//! advisor surfaces as a recoverable stage failure.

use super::{Stage, StageInput, StageName};
use crate::core::{Annotation, AnnotationKind, ImprovedFile};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Source of free-form improvement recommendations.
#[async_trait]
pub trait Advisor: Send + Sync + Debug {
    /// Produces recommendations from the diagnosis output.
    async fn recommend(&self, diagnosis: &serde_json::Value) -> Result<Vec<String>, StageError>;
}

/// Deterministic advisor used when no external model is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedAdvisor;

#[async_trait]
impl Advisor for RuleBasedAdvisor {
    async fn recommend(&self, diagnosis: &serde_json::Value) -> Result<Vec<String>, StageError> {
        let severity = diagnosis
            .get("severity_score")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let mut recs = vec![
            "Review the flagged metrics before the next training run".to_string(),
            "Track experiment artifacts alongside metrics".to_string(),
        ];
        if severity >= 60 {
            recs.push("Pause further sweeps until the high-severity issues are resolved".to_string());
        }
        Ok(recs)
    }
}

/// Generates improvements and per-file code artifacts from the diagnosis.
#[derive(Debug)]
pub struct ImproveStage {
    advisor: Arc<dyn Advisor>,
}

/// Categorized improvement buckets.
#[derive(Debug, Default)]
struct Improvements {
    quick_fixes: Vec<&'static str>,
    medium_changes: Vec<&'static str>,
    long_term: Vec<&'static str>,
}

impl Improvements {
    fn push_unique(bucket: &mut Vec<&'static str>, items: &[&'static str]) {
        for item in items {
            if !bucket.contains(item) {
                bucket.push(item);
            }
        }
    }
}

impl ImproveStage {
    /// Creates the improve stage with the given advisor.
    #[must_use]
    pub fn new(advisor: Arc<dyn Advisor>) -> Self {
        Self { advisor }
    }

    fn flag_codes(diagnosis: &serde_json::Value) -> Vec<(String, String)> {
        diagnosis
            .get("flags")
            .and_then(serde_json::Value::as_array)
            .map(|flags| {
                flags
                    .iter()
                    .map(|f| {
                        (
                            f.get("code")
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            f.get("level")
                                .and_then(serde_json::Value::as_str)
                                .unwrap_or("INFO")
                                .to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn categorize(flags: &[(String, String)]) -> Improvements {
        let mut imp = Improvements::default();
        for (code, level) in flags {
            match code.as_str() {
                code if code.starts_with("overfit") => {
                    if level == "HIGH" {
                        Improvements::push_unique(
                            &mut imp.quick_fixes,
                            &[
                                "Add dropout layers (0.2-0.5)",
                                "Implement early stopping with patience=5",
                                "Reduce learning rate by 50%",
                            ],
                        );
                        Improvements::push_unique(
                            &mut imp.medium_changes,
                            &[
                                "Implement data augmentation",
                                "Add L2 regularization (weight_decay=0.01)",
                                "Use cross-validation for model selection",
                            ],
                        );
                    } else {
                        Improvements::push_unique(
                            &mut imp.medium_changes,
                            &["Monitor validation curves more closely"],
                        );
                    }
                }
                "high_variance" | "metric_spike" => {
                    Improvements::push_unique(
                        &mut imp.quick_fixes,
                        &[
                            "Reduce learning rate",
                            "Increase batch size",
                            "Add gradient clipping (max_norm=1.0)",
                        ],
                    );
                    Improvements::push_unique(
                        &mut imp.medium_changes,
                        &["Implement learning rate scheduling"],
                    );
                }
                "high_fail_rate" | "low_success_rate" => {
                    Improvements::push_unique(
                        &mut imp.quick_fixes,
                        &[
                            "Review failing test cases",
                            "Add more validation checks",
                            "Implement better error handling",
                        ],
                    );
                    Improvements::push_unique(
                        &mut imp.long_term,
                        &["Comprehensive test suite redesign"],
                    );
                }
                "missing_artifact" => {
                    Improvements::push_unique(
                        &mut imp.quick_fixes,
                        &[
                            "Configure model checkpointing",
                            "Set up artifact storage",
                            "Add model versioning",
                        ],
                    );
                }
                _ => {}
            }
        }
        imp
    }

    fn improved_file(
        run_id: &str,
        model_name: &str,
        flags: &[(String, String)],
    ) -> ImprovedFile {
        let file_path = format!(
            "models/{}_improved.py",
            model_name.to_lowercase().replace(' ', "_")
        );

        let original = "\
model.compile(optimizer='sgd', loss='categorical_crossentropy')\n\
model.fit(x_train, y_train, epochs=50)\n";

        let mut improved = String::from(
            "model.compile(optimizer=Adam(weight_decay=0.01), loss='categorical_crossentropy')\n",
        );
        let mut annotations = vec![Annotation::new(
            1,
            AnnotationKind::Change,
            "Changed from SGD to Adam optimizer with weight decay",
        )];

        let mut line = 2;
        for (code, _) in flags {
            match code.as_str() {
                code if code.starts_with("overfit") => {
                    improved.push_str("model.add(Dropout(0.3))\n");
                    annotations.push(Annotation::new(
                        line,
                        AnnotationKind::Add,
                        "Added dropout (rate=0.3) to prevent overfitting",
                    ));
                    line += 1;
                }
                "missing_artifact" => {
                    improved.push_str("callbacks.append(ModelCheckpoint('ckpt/{epoch}.h5'))\n");
                    annotations.push(Annotation::new(
                        line,
                        AnnotationKind::Add,
                        "Added automatic model checkpointing",
                    ));
                    line += 1;
                }
                "high_variance" | "metric_spike" => {
                    improved.push_str("callbacks.append(ReduceLROnPlateau(patience=3))\n");
                    annotations.push(Annotation::new(
                        line,
                        AnnotationKind::Change,
                        "Implemented ReduceLROnPlateau scheduler",
                    ));
                    line += 1;
                }
                _ => {}
            }
        }
        improved.push_str("model.fit(x_train, y_train, epochs=50, callbacks=callbacks)\n");

        ImprovedFile::with_diff(
            run_id,
            file_path,
            original,
            improved,
            annotations,
            format!("Improvements addressing {} flagged issue(s)", flags.len()),
        )
    }
}

#[async_trait]
impl Stage for ImproveStage {
    fn name(&self) -> StageName {
        StageName::Improve
    }

    async fn run(&self, input: &StageInput) -> Result<serde_json::Value, StageError> {
        input.progress.message("Generating code improvements");

        // Diagnosis may be absent when that stage was skipped; treat as no flags.
        let diagnosis = input
            .upstream_output(StageName::Diagnose)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));

        let flags = Self::flag_codes(&diagnosis);
        let improvements = Self::categorize(&flags);
        let recommendations = self.advisor.recommend(&diagnosis).await?;

        let model_name = input
            .record
            .model
            .clone()
            .unwrap_or_else(|| "unknown_model".to_string());
        let improved_files = if flags.is_empty() {
            Vec::new()
        } else {
            vec![Self::improved_file(&input.run_id, &model_name, &flags)]
        };

        Ok(serde_json::json!({
            "run_id": input.run_id,
            "improvements": {
                "quick_fixes": improvements.quick_fixes,
                "medium_changes": improvements.medium_changes,
                "long_term": improvements.long_term,
            },
            "recommendations": recommendations,
            "improved_files": improved_files,
            "code_summary": format!(
                "Generated {} improved file(s) addressing {} issue(s)",
                improved_files.len(),
                flags.len()
            ),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompositeResult;
    use crate::stages::ProgressHandle;

    /// Advisor standing in for an unreachable external model.
    #[derive(Debug)]
    struct UnavailableAdvisor;

    #[async_trait]
    impl Advisor for UnavailableAdvisor {
        async fn recommend(
            &self,
            _diagnosis: &serde_json::Value,
        ) -> Result<Vec<String>, StageError> {
            Err(StageError::with_code("model unavailable", "model_unavailable"))
        }
    }

    fn input_with_diagnosis(diagnosis: serde_json::Value) -> StageInput {
        let upstream = CompositeResult::new("r1").merge(StageName::Diagnose, &diagnosis);
        StageInput {
            run_id: "r1".to_string(),
            record: serde_json::from_value(serde_json::json!({
                "run_id": "r1",
                "model": "Wide ResNet",
                "hyperparameters": {"lr": 0.01},
                "metrics": {"accuracy": 0.65},
                "timestamp": "2024-01-01T00:00:00Z"
            }))
            .unwrap(),
            upstream,
            progress: ProgressHandle::disconnected(StageName::Improve),
        }
    }

    fn overfit_diagnosis() -> serde_json::Value {
        serde_json::json!({
            "flags": [
                {"code": "overfit_fail", "level": "HIGH", "message": "severe overfit"},
                {"code": "missing_artifact", "level": "MEDIUM", "message": "no checkpoint"}
            ],
            "severity_score": 60,
            "severity_label": "HIGH"
        })
    }

    #[tokio::test]
    async fn test_flags_drive_categorized_improvements() {
        let stage = ImproveStage::new(Arc::new(RuleBasedAdvisor));
        let output = stage.run(&input_with_diagnosis(overfit_diagnosis())).await.unwrap();

        let quick = output["improvements"]["quick_fixes"].as_array().unwrap();
        assert!(quick.iter().any(|q| q.as_str().unwrap().contains("dropout")));
        assert!(quick.iter().any(|q| q.as_str().unwrap().contains("checkpointing")));
        let medium = output["improvements"]["medium_changes"].as_array().unwrap();
        assert!(medium.iter().any(|m| m.as_str().unwrap().contains("L2 regularization")));
    }

    #[tokio::test]
    async fn test_improved_file_artifact() {
        let stage = ImproveStage::new(Arc::new(RuleBasedAdvisor));
        let output = stage.run(&input_with_diagnosis(overfit_diagnosis())).await.unwrap();

        let files = output["improved_files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file["pipeline_id"], "r1");
        assert_eq!(file["file_path"], "models/wide_resnet_improved.py");
        assert!(file["improved_code"].as_str().unwrap().contains("Dropout(0.3)"));
        assert!(file["diff"].as_str().unwrap().contains("+model.add(Dropout(0.3))"));

        let annotations = file["annotations"].as_array().unwrap();
        assert!(annotations.iter().any(|a| a["type"] == "add"));
    }

    #[tokio::test]
    async fn test_clean_diagnosis_produces_no_artifacts() {
        let stage = ImproveStage::new(Arc::new(RuleBasedAdvisor));
        let diagnosis = serde_json::json!({
            "flags": [], "severity_score": 0, "severity_label": "LOW"
        });
        let output = stage.run(&input_with_diagnosis(diagnosis)).await.unwrap();

        assert!(output["improved_files"].as_array().unwrap().is_empty());
        assert!(output["improvements"]["quick_fixes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_diagnosis_is_tolerated() {
        // Skip path: diagnose never populated the composite.
        let stage = ImproveStage::new(Arc::new(RuleBasedAdvisor));
        let mut input = input_with_diagnosis(serde_json::json!({}));
        input.upstream = CompositeResult::new("r1");

        let output = stage.run(&input).await.unwrap();
        assert_eq!(output["code_summary"].as_str().unwrap(), "Generated 0 improved file(s) addressing 0 issue(s)");
    }

    #[tokio::test]
    async fn test_unavailable_advisor_fails_stage() {
        let stage = ImproveStage::new(Arc::new(UnavailableAdvisor));
        let err = stage
            .run(&input_with_diagnosis(overfit_diagnosis()))
            .await
            .unwrap_err();

        assert_eq!(err.message, "model unavailable");
        assert_eq!(err.code.as_deref(), Some("model_unavailable"));
    }

    #[tokio::test]
    async fn test_high_severity_advisor_recommendation() {
        let recs = RuleBasedAdvisor
            .recommend(&serde_json::json!({"severity_score": 75}))
            .await
            .unwrap();
        assert!(recs.iter().any(|r| r.contains("Pause further sweeps")));
    }
}
