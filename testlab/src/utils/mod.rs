//! Utility helpers for run identifiers and wire timestamps.

pub mod ids;
pub mod logging;
pub mod timestamps;

pub use ids::generate_run_id;
pub use logging::init_tracing;
pub use timestamps::{iso_timestamp, now_utc, Timestamp};
