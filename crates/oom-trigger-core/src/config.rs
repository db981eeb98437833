//! Sizing of an OOM trigger run.
//!
//! The binary always runs with [`TriggerConfig::default`]; the setters exist so
//! the library can be driven with small values.

use std::time::Duration;

use crate::error::Error;
use crate::Result;

/// Number of worker processes spawned by a run.
pub const DEFAULT_WORKERS: usize = 16;

/// Bytes appended to a worker's buffer per allocation step.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000_000;

/// How long a worker stays alive after its allocation fails.
pub const DEFAULT_IDLE_PERIOD: Duration = Duration::from_secs(60);

/// Configuration shared by the orchestrator and its workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Worker processes to spawn
    pub workers: usize,
    /// Size in bytes of each allocated chunk
    pub chunk_size: usize,
    /// Idle period after allocation failure
    pub idle_period: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_period: DEFAULT_IDLE_PERIOD,
        }
    }
}

impl TriggerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_idle_period(mut self, idle_period: Duration) -> Self {
        self.idle_period = idle_period;
        self
    }

    /// Reject configurations that can never reach allocation failure.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk size must be greater than zero"));
        }
        Ok(())
    }
}
