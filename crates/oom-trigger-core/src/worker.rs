//! Worker allocation routine.
//!
//! A worker moves through `Allocating -> Idle -> Exited`. There is no way back
//! from `Idle` to `Allocating`. The kernel may kill the process in any state,
//! in which case none of the remaining transitions run.

use std::time::Duration;

use tracing::{debug, info};

use crate::alloc::{Allocator, SystemAllocator};
use crate::config::TriggerConfig;

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Allocating,
    Idle,
    Exited,
}

/// Outcome of a worker that ran to completion on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    /// Chunks held when allocation failed
    pub chunks: usize,
    /// Final state, always `Exited` after [`Worker::run`]
    pub state: WorkerState,
}

/// A single worker and the buffer it owns
pub struct Worker<A: Allocator> {
    allocator: A,
    chunk_size: usize,
    idle_period: Duration,
    buffer: Vec<Vec<u8>>,
    state: WorkerState,
}

impl<A: Allocator> Worker<A> {
    /// Create a worker in the `Allocating` state with an empty buffer.
    pub fn new(allocator: A, config: &TriggerConfig) -> Self {
        Self {
            allocator,
            chunk_size: config.chunk_size,
            idle_period: config.idle_period,
            buffer: Vec::new(),
            state: WorkerState::Allocating,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of chunks currently held.
    pub fn chunks(&self) -> usize {
        self.buffer.len()
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Append chunks until allocation fails, then move to `Idle`.
    ///
    /// Does nothing unless the worker is `Allocating`.
    pub fn allocate_until_failure(&mut self) {
        if self.state != WorkerState::Allocating {
            return;
        }

        loop {
            // Growing the buffer itself must not abort the process either.
            if self.buffer.try_reserve(1).is_err() {
                debug!(chunks = self.buffer.len(), "buffer growth failed");
                break;
            }
            match self.allocator.allocate(self.chunk_size) {
                Ok(chunk) => {
                    self.buffer.push(chunk);
                    if self.buffer.len() % 10 == 0 {
                        debug!(chunks = self.buffer.len(), "allocation progress");
                    }
                }
                Err(e) => {
                    debug!(chunks = self.buffer.len(), "{}", e);
                    break;
                }
            }
        }

        self.state = WorkerState::Idle;
    }

    /// Stay alive for the idle period while still holding the buffer, then
    /// move to `Exited`.
    ///
    /// Does nothing unless the worker is `Idle`.
    pub async fn idle(&mut self) {
        if self.state != WorkerState::Idle {
            return;
        }
        tokio::time::sleep(self.idle_period).await;
        self.state = WorkerState::Exited;
    }

    /// Run both phases in order.
    pub async fn run(mut self) -> WorkerReport {
        self.allocate_until_failure();
        info!(
            pid = std::process::id(),
            chunks = self.buffer.len(),
            idle_secs = self.idle_period.as_secs_f64(),
            "allocation failed, idling"
        );
        self.idle().await;
        WorkerReport {
            chunks: self.buffer.len(),
            state: self.state,
        }
    }
}

/// Entry point of the worker role inside a spawned process.
pub async fn run_worker_process(config: &TriggerConfig) -> WorkerReport {
    info!(pid = std::process::id(), "worker allocating memory");
    Worker::new(SystemAllocator, config).run().await
}
