//! Core of the OOM trigger diagnostic.
//!
//! An orchestrator process fans out a fixed number of worker processes. Each
//! worker grows a private buffer in fixed-size chunks until allocation fails
//! (or the kernel kills it), then idles so the exit can be observed. The
//! orchestrator waits for every worker, whatever way it ended.

#![cfg(unix)]

pub mod alloc;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod worker;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for orchestration failures.
pub use error::Error;

/// Allocation capability and its deterministic stand-in.
pub use alloc::{AllocError, Allocator, FailAfter, SystemAllocator};

/// Fixed sizing of a run.
pub use config::{TriggerConfig, DEFAULT_CHUNK_SIZE, DEFAULT_IDLE_PERIOD, DEFAULT_WORKERS};

/// Worker fan-out and join.
pub use orchestrator::{
    wait_all, CommandLauncher, Orchestrator, PartialSpawn, RunSummary, SelfExecLauncher,
    WorkerExit, WorkerHandle, WorkerLauncher, WORKER_SUBCOMMAND,
};

/// Per-worker allocation state machine.
pub use worker::{run_worker_process, Worker, WorkerReport, WorkerState};
