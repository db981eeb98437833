//! End-to-end runner for OOM handling checks.
//!
//! Launches `oom-trigger` from the same target directory and watches it until
//! it finishes or the time budget runs out. Meant to be run inside a
//! memory-limited cgroup or container, where the kernel's OOM handling is
//! what ends the run.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

const TRIGGER_BINARY: &str = "oom-trigger";

#[derive(Parser)]
#[command(about = "Run oom-trigger under a time budget and report how it ended")]
struct Args {
    /// Seconds to wait before killing the run
    #[arg(long, default_value_t = 180)]
    timeout_secs: u64,

    /// Path to the oom-trigger binary (defaults to the one next to this runner)
    #[arg(long)]
    trigger: Option<PathBuf>,

    /// Forward --debug to oom-trigger
    #[arg(long)]
    debug: bool,
}

#[derive(Debug)]
enum Outcome {
    Finished(ExitStatus),
    TimedOut,
}

fn locate_trigger(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let exe = std::env::current_exe().context("Failed to locate runner executable")?;
    let dir = exe.parent().unwrap_or(Path::new("."));
    Ok(dir.join(TRIGGER_BINARY))
}

fn run_trigger(trigger: &Path, debug: bool, timeout: Duration) -> Result<Outcome> {
    let mut cmd = Command::new(trigger);
    if debug {
        cmd.arg("--debug");
    }
    // Own process group, so the workers can be killed together with it.
    cmd.process_group(0);

    let start_time = Instant::now();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to start {}", trigger.display()))?;
    info!(pid = child.id(), "oom-trigger started");

    let mut last_check = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("Failed to poll oom-trigger")? {
            info!(
                elapsed_secs = start_time.elapsed().as_secs_f64(),
                "oom-trigger finished"
            );
            return Ok(Outcome::Finished(status));
        }

        if start_time.elapsed() > timeout {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "oom-trigger still running, terminating"
            );
            // The group id is the orchestrator's pid.
            if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
                warn!("failed to kill oom-trigger process group: {}", e);
            }
            if let Err(e) = child.wait() {
                warn!("failed to reap oom-trigger: {}", e);
            }
            return Ok(Outcome::TimedOut);
        }

        if last_check.elapsed() > Duration::from_secs(1) {
            info!(
                elapsed_secs = start_time.elapsed().as_secs_f64(),
                "oom-trigger still running"
            );
            last_check = Instant::now();
        }

        thread::sleep(Duration::from_millis(100));
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().init();

    let trigger = locate_trigger(args.trigger)?;
    if !trigger.exists() {
        bail!(
            "{} not found at {}; build it first with `cargo build --bin {}`",
            TRIGGER_BINARY,
            trigger.display(),
            TRIGGER_BINARY
        );
    }
    info!(trigger = %trigger.display(), "found oom-trigger");

    match run_trigger(&trigger, args.debug, Duration::from_secs(args.timeout_secs))? {
        Outcome::Finished(status) if status.success() => {
            info!("PASSED: every worker was reaped and the orchestrator exited cleanly");
            Ok(())
        }
        Outcome::Finished(status) => {
            // The orchestrator itself was killed or failed to spawn workers.
            warn!(status = %status, "UNCLEAR: orchestrator did not exit cleanly");
            std::process::exit(1);
        }
        Outcome::TimedOut => {
            warn!("UNCLEAR: run did not finish in time; memory pressure may not be enforced");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Dead, or a zombie nobody has reaped yet.
    fn is_gone(pid: i32) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[test]
    fn test_timeout_kills_workers_with_the_trigger() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let trigger = dir.path().join("fake-trigger");
        let pid_file = dir.path().join("worker.pid");
        fs::write(
            &trigger,
            format!(
                "#!/bin/sh\nsleep 30 &\necho $! > '{}'\nwait\n",
                pid_file.display()
            ),
        )
        .expect("Failed to write fake trigger");
        fs::set_permissions(&trigger, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod fake trigger");

        let start = Instant::now();
        let outcome =
            run_trigger(&trigger, false, Duration::from_millis(500)).expect("run failed");
        assert!(matches!(outcome, Outcome::TimedOut));
        assert!(start.elapsed() < Duration::from_secs(30));

        let worker: i32 = fs::read_to_string(&pid_file)
            .expect("fake trigger did not record its worker")
            .trim()
            .parse()
            .expect("invalid worker pid");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !is_gone(worker) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(is_gone(worker), "worker {} outlived the timeout", worker);
    }

    #[test]
    fn test_finished_run_reports_status() {
        let outcome = run_trigger(Path::new("/bin/true"), false, Duration::from_secs(10))
            .expect("run failed");
        match outcome {
            Outcome::Finished(status) => assert!(status.success()),
            Outcome::TimedOut => panic!("/bin/true should finish in time"),
        }
    }
}
