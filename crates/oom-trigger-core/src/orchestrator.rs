//! Worker process fan-out and join.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;

use futures::future::join_all;
use nix::sys::signal::Signal;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::config::TriggerConfig;
use crate::error::Error;
use crate::Result;

/// Hidden subcommand that switches the binary into the worker role.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Builds the command that starts one worker process
pub trait WorkerLauncher {
    fn command(&self, index: usize) -> Command;
}

impl<F> WorkerLauncher for F
where
    F: Fn(usize) -> Command,
{
    fn command(&self, index: usize) -> Command {
        self(index)
    }
}

/// Re-executes the running binary in the worker role
#[derive(Debug, Clone)]
pub struct SelfExecLauncher {
    exe: PathBuf,
    debug: bool,
}

impl SelfExecLauncher {
    pub fn new(exe: impl Into<PathBuf>, debug: bool) -> Self {
        Self {
            exe: exe.into(),
            debug,
        }
    }

    /// Launcher for the executable of the current process.
    pub fn current(debug: bool) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, debug))
    }
}

impl WorkerLauncher for SelfExecLauncher {
    fn command(&self, _index: usize) -> Command {
        let mut cmd = Command::new(&self.exe);
        if self.debug {
            cmd.arg("--debug");
        }
        cmd.arg(WORKER_SUBCOMMAND);
        cmd
    }
}

/// Runs the same external program for every worker
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl WorkerLauncher for CommandLauncher {
    fn command(&self, _index: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// A spawned worker, owned by the orchestrator until it has been waited on
#[derive(Debug)]
pub struct WorkerHandle {
    pub index: usize,
    pub pid: Option<u32>,
    child: Child,
}

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Exited on its own with this status code
    Exited(i32),
    /// Terminated by this signal, e.g. SIGKILL from the OOM killer
    Signaled(i32),
    Unknown,
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            WorkerExit::Exited(code)
        } else if let Some(signal) = status.signal() {
            WorkerExit::Signaled(signal)
        } else {
            WorkerExit::Unknown
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Exited(code) => write!(f, "exit code {}", code),
            WorkerExit::Signaled(signal) => match Signal::try_from(*signal) {
                Ok(sig) => write!(f, "signal {}", sig.as_str()),
                Err(_) => write!(f, "signal {}", signal),
            },
            WorkerExit::Unknown => write!(f, "unknown status"),
        }
    }
}

/// A fan-out that stopped at a spawn failure.
///
/// Carries the workers started before the failure; they still have to be
/// waited on.
#[derive(thiserror::Error, Debug)]
#[error("{error}")]
pub struct PartialSpawn {
    pub handles: Vec<WorkerHandle>,
    #[source]
    pub error: Error,
}

/// Tally of how the workers of a run ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub spawned: usize,
    pub exited: usize,
    pub signaled: usize,
    pub unknown: usize,
}

impl RunSummary {
    fn record(&mut self, exit: WorkerExit) {
        match exit {
            WorkerExit::Exited(_) => self.exited += 1,
            WorkerExit::Signaled(_) => self.signaled += 1,
            WorkerExit::Unknown => self.unknown += 1,
        }
    }

    /// Every spawned worker has a recorded termination.
    pub fn all_accounted(&self) -> bool {
        self.exited + self.signaled + self.unknown == self.spawned
    }
}

/// Spawns workers and waits for all of them
pub struct Orchestrator<L: WorkerLauncher> {
    config: TriggerConfig,
    launcher: L,
}

impl<L: WorkerLauncher> Orchestrator<L> {
    pub fn new(config: TriggerConfig, launcher: L) -> Self {
        Self { config, launcher }
    }

    /// Start `n` worker processes.
    ///
    /// The first spawn failure is fatal and stops the fan-out. The workers
    /// already running are handed back with the error.
    pub fn spawn_workers(
        &self,
        n: usize,
    ) -> std::result::Result<Vec<WorkerHandle>, PartialSpawn> {
        let mut handles = Vec::with_capacity(n);
        for index in 0..n {
            let child = match self.launcher.command(index).spawn() {
                Ok(child) => child,
                Err(source) => {
                    error!(index, "failed to spawn worker: {}", source);
                    return Err(PartialSpawn {
                        handles,
                        error: Error::Spawn { index, source },
                    });
                }
            };
            let pid = child.id();
            debug!(index, pid = ?pid, "spawned worker");
            handles.push(WorkerHandle { index, pid, child });
        }
        Ok(handles)
    }

    /// Spawn the configured number of workers and wait for all of them.
    ///
    /// On a spawn failure the workers already started are still joined
    /// before the error is returned.
    pub async fn run(&self) -> Result<RunSummary> {
        info!(pid = std::process::id(), "starting OOM trigger");
        self.config.validate()?;

        let handles = match self.spawn_workers(self.config.workers) {
            Ok(handles) => handles,
            Err(PartialSpawn { handles, error }) => {
                warn!(
                    workers = handles.len(),
                    "fan-out aborted, waiting for workers already started"
                );
                if let Err(e) = wait_all(handles).await {
                    warn!("{}", e);
                }
                return Err(error);
            }
        };
        info!(workers = handles.len(), "all workers spawned, waiting");

        let summary = wait_all(handles).await?;
        info!(
            spawned = summary.spawned,
            exited = summary.exited,
            signaled = summary.signaled,
            unknown = summary.unknown,
            "all workers finished"
        );
        Ok(summary)
    }
}

/// Block until every handle's process has exited, in any order.
///
/// Normal exits and signal terminations are both satisfied waits. If the
/// OS fails to report a status, the first such error is returned, but only
/// after all other handles have been awaited.
pub async fn wait_all(handles: Vec<WorkerHandle>) -> Result<RunSummary> {
    let mut summary = RunSummary {
        spawned: handles.len(),
        ..RunSummary::default()
    };

    let results = join_all(handles.into_iter().map(|mut handle| async move {
        let status = handle.child.wait().await;
        match &status {
            Ok(status) => match WorkerExit::from(*status) {
                WorkerExit::Exited(code) => {
                    info!(index = handle.index, pid = ?handle.pid, code, "worker exited")
                }
                exit => warn!(
                    index = handle.index,
                    pid = ?handle.pid,
                    "worker terminated by {}",
                    exit
                ),
            },
            Err(e) => warn!(
                index = handle.index,
                pid = ?handle.pid,
                "failed to wait for worker: {}",
                e
            ),
        }
        (handle.index, status)
    }))
    .await;

    let mut first_error = None;
    for (index, status) in results {
        match status {
            Ok(status) => summary.record(WorkerExit::from(status)),
            Err(source) => {
                summary.record(WorkerExit::Unknown);
                first_error.get_or_insert(Error::Wait { index, source });
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
