//! Run identifier generation.

use uuid::Uuid;

/// Generates a fresh run identifier.
///
/// Used when a submission omits `run_id`. The `run_` prefix keeps
/// generated identifiers recognizable in logs next to caller-supplied ones.
#[must_use]
pub fn generate_run_id() -> String {
    format!("run_{}", Uuid::new_v4().simple())
}
