//! # TestLab
//!
//! An event-driven pipeline that analyzes ML experiment records through five
//! fixed stages (ingest, diagnose, improve, evaluate, plan) and streams
//! progress to a single consumer per run.
//!
//! - **Fixed-order stages**: each run executes the five stages strictly
//!   sequentially, with per-stage timeouts
//! - **Streaming progress**: one self-describing event per stage transition,
//!   closed by a terminal frame carrying the full composite result
//! - **Halt-and-decide recovery**: a failed stage halts the run until the
//!   caller retries or skips it, bounded by an idle window
//! - **Client-side folding**: a synchronous state machine reconstructs run
//!   state from the event sequence alone
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use testlab::prelude::*;
//!
//! let registry = RunRegistry::new(CoordinatorConfig::default());
//! let (run_id, mut stream) = registry.start(record)?;
//!
//! let mut state = ClientState::new(&run_id);
//! while let Some(event) = stream.next_event().await {
//!     match state.apply(&event) {
//!         StateDelta::StageFailed { stage, .. } => registry.skip(&run_id, stage)?,
//!         StateDelta::Completed => break,
//!         _ => {}
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod client;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod events;
pub mod stages;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::{ClientState, StateDelta};
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::RunRegistry;
    pub use crate::core::{
        CompositeResult, EventStatus, ExperimentRecord, Overview, ProgressEvent,
        RunStatus, StageRecord, StageStatus,
    };
    pub use crate::errors::{PipelineError, StageError};
    pub use crate::events::{event_channel, parse_sse_frame, sse_frame, EventStream};
    pub use crate::stages::{Advisor, Stage, StageInput, StageName};
}
