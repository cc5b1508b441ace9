//! Core data model: statuses, progress events, execution records,
//! improvement artifacts, and the composite result.

mod composite;
mod event;
mod experiment;
mod improvement;
mod record;
mod status;

pub use composite::{CompositeResult, Overview};
pub use event::{EventStatus, ProgressEvent, PIPELINE_AGENT};
pub use experiment::ExperimentRecord;
pub use improvement::{Annotation, AnnotationKind, ImprovedFile, ImprovementPayload};
pub use record::StageRecord;
pub use status::{RunStatus, StageStatus};
