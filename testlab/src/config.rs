//! Coordinator configuration.
//!
//! All blocking windows are bounded: a stage that outlives `stage_timeout`
//! is failed with a timeout cause, and a halted run that receives neither
//! retry nor skip within `halt_timeout` is auto-failed and released.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a run's coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Per-stage execution timeout in milliseconds.
    pub stage_timeout_ms: u64,
    /// Idle window for a halted run awaiting retry/skip, in milliseconds.
    pub halt_timeout_ms: u64,
    /// Bounded capacity of the progress event channel.
    pub event_buffer: usize,
    /// Maximum retries per stage. `None` means unbounded.
    pub max_retries: Option<usize>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_ms: 30_000,
            halt_timeout_ms: 120_000,
            event_buffer: 64,
            max_retries: None,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, ms: u64) -> Self {
        self.stage_timeout_ms = ms;
        self
    }

    /// Sets the halted-run idle window.
    #[must_use]
    pub fn with_halt_timeout_ms(mut self, ms: u64) -> Self {
        self.halt_timeout_ms = ms;
        self
    }

    /// Sets the event channel capacity.
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Caps retries per stage.
    #[must_use]
    pub fn with_max_retries(mut self, attempts: usize) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    /// Returns the stage timeout as a `Duration`.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Returns the halt idle window as a `Duration`.
    #[must_use]
    pub fn halt_timeout(&self) -> Duration {
        Duration::from_millis(self.halt_timeout_ms)
    }

    /// Returns true if another retry is allowed after `attempts` so far.
    #[must_use]
    pub fn retry_allowed(&self, attempts: usize) -> bool {
        self.max_retries.map_or(true, |max| attempts < max)
    }
}
