//! Run orchestration.
//!
//! [`RunRegistry`] is the public entry point: it starts runs, hands out the
//! per-run event stream, and routes retry/skip decisions to the coordinator
//! task that owns each run.

mod driver;
mod registry;
mod run;

pub use driver::{RunCommand, RunShared};
pub use registry::RunRegistry;
pub use run::Run;
