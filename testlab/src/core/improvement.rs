//! Improvement artifacts emitted by the Improve stage.
//!
//! Two wire shapes coexist: the structured `{improved_files: [...]}` array
//! and a legacy single-file `{improved_code, original_code}` scalar pair.
//! Both are variants of one sum type, normalized at the boundary so that
//! downstream consumers only ever see the array form.

use serde::{Deserialize, Serialize};

/// The kind of change an annotation marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// A line was added.
    Add,
    /// A line was changed.
    Change,
    /// A line was removed.
    Remove,
}

/// A line-level annotation on an improved file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// 1-based line number in the improved file.
    pub line: u32,
    /// What kind of change this is.
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    /// Human-readable explanation.
    pub comment: String,
}

impl Annotation {
    /// Creates a new annotation.
    #[must_use]
    pub fn new(line: u32, kind: AnnotationKind, comment: impl Into<String>) -> Self {
        Self {
            line,
            kind,
            comment: comment.into(),
        }
    }
}

/// One improved file, keyed by `(run_id, file_path)` within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovedFile {
    /// The run that produced this artifact.
    pub pipeline_id: String,
    /// Path of the improved file.
    pub file_path: String,
    /// Content before improvement.
    pub original_code: String,
    /// Content after improvement.
    pub improved_code: String,
    /// Unified diff between the two.
    pub diff: String,
    /// Line annotations explaining the changes.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// One-line summary of the improvements.
    pub summary: String,
}

impl ImprovedFile {
    /// Builds an improved file, synthesizing the unified diff.
    #[must_use]
    pub fn with_diff(
        pipeline_id: impl Into<String>,
        file_path: impl Into<String>,
        original_code: impl Into<String>,
        improved_code: impl Into<String>,
        annotations: Vec<Annotation>,
        summary: impl Into<String>,
    ) -> Self {
        let original_code = original_code.into();
        let improved_code = improved_code.into();
        let diff = diffy::create_patch(&original_code, &improved_code).to_string();
        Self {
            pipeline_id: pipeline_id.into(),
            file_path: file_path.into(),
            original_code,
            improved_code,
            diff,
            annotations,
            summary: summary.into(),
        }
    }
}

/// The two accepted wire shapes of an Improve-stage payload.
///
/// Deserialization tries the structured array first, then falls back to the
/// legacy scalar pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImprovementPayload {
    /// The authoritative multi-file form.
    Structured {
        /// Per-file improvements.
        improved_files: Vec<ImprovedFile>,
    },
    /// The legacy single-file form.
    Legacy {
        /// The improved content.
        improved_code: String,
        /// The original content, when it was carried along.
        #[serde(default)]
        original_code: Option<String>,
    },
}

impl ImprovementPayload {
    /// Normalizes either shape into the array form.
    ///
    /// The legacy shape becomes a one-element array with a synthesized diff
    /// and a placeholder file path, matching how old payloads were reported.
    #[must_use]
    pub fn normalize(self, run_id: &str) -> Vec<ImprovedFile> {
        match self {
            Self::Structured { improved_files } => improved_files,
            Self::Legacy {
                improved_code,
                original_code,
            } => {
                let original = original_code.unwrap_or_default();
                vec![ImprovedFile::with_diff(
                    run_id,
                    "models/legacy_model.py",
                    original,
                    improved_code,
                    vec![Annotation::new(
                        1,
                        AnnotationKind::Change,
                        "Migrated from legacy single-file improvement format",
                    )],
                    "Legacy format improvements",
                )]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_annotation_wire_kind_field() {
        let ann = Annotation::new(15, AnnotationKind::Add, "Added dropout");
        let json = serde_json::to_value(&ann).unwrap();
        assert_eq!(json["type"], "add");
        assert_eq!(json["line"], 15);
    }

    #[test]
    fn test_with_diff_produces_unified_diff() {
        let file = ImprovedFile::with_diff(
            "r1",
            "models/model.py",
            "lr = 0.1\n",
            "lr = 0.05\n",
            vec![],
            "Lowered learning rate",
        );
        assert!(file.diff.contains("-lr = 0.1"));
        assert!(file.diff.contains("+lr = 0.05"));
    }

    #[test]
    fn test_structured_payload_round_trip() {
        let raw = serde_json::json!({
            "improved_files": [{
                "pipeline_id": "r1",
                "file_path": "models/net.py",
                "original_code": "a",
                "improved_code": "b",
                "diff": "",
                "annotations": [{"line": 3, "type": "change", "comment": "x"}],
                "summary": "s"
            }]
        });
        let payload: ImprovementPayload = serde_json::from_value(raw).unwrap();
        let files = payload.normalize("r1");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_path, "models/net.py");
        assert_eq!(files[0].annotations[0].kind, AnnotationKind::Change);
    }

    #[test]
    fn test_legacy_payload_normalizes_to_one_element() {
        let raw = serde_json::json!({
            "improved_code": "print('better')",
            "original_code": "print('worse')"
        });
        let payload: ImprovementPayload = serde_json::from_value(raw).unwrap();
        let files = payload.normalize("r7");

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].pipeline_id, "r7");
        assert_eq!(files[0].improved_code, "print('better')");
        assert!(files[0].diff.contains("+print('better')"));
    }

    #[test]
    fn test_legacy_payload_without_original() {
        let raw = serde_json::json!({"improved_code": "x = 1"});
        let payload: ImprovementPayload = serde_json::from_value(raw).unwrap();
        let files = payload.normalize("r1");
        assert_eq!(files[0].original_code, "");
    }
}
