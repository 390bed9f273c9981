//! # Worker Processes
//!
//! Native spawning and lifecycle tracking of consumer worker processes. The
//! contract preserved here: background spawn with an argument vector (never a
//! shell string), combined stdout/stderr appended to a log file, PID captured
//! from the child handle, and signal-based shutdown forwarded to every
//! tracked PID.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::CoreError;

/// Sleep slice between reap passes while draining
const DRAIN_SLICE: Duration = Duration::from_millis(200);

/// Spawns worker processes for one monitored consumer
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    base_args: Vec<String>,
    log_path: PathBuf,
}

impl WorkerLauncher {
    pub fn new(
        program: impl Into<PathBuf>,
        base_args: Vec<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            base_args,
            log_path: log_path.into(),
        }
    }

    /// Resolve the launcher from supervisor configuration
    ///
    /// Defaults to a `worker` binary beside the running executable when no
    /// program is configured. Each consumer gets its own combined log file.
    pub fn from_config(
        config: &SupervisorConfig,
        consumer_alias: &str,
    ) -> Result<Self, CoreError> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => default_worker_program()?,
        };
        let log_path = config
            .worker_log_dir
            .join(format!("{consumer_alias}.worker.log"));
        Ok(Self::new(program, config.worker_args.clone(), log_path))
    }

    /// Spawn one worker in the background
    ///
    /// stdout and stderr both append to the launcher's log file; the PID is
    /// taken from the child handle, which the caller keeps for reaping.
    pub fn spawn(&self, extra_args: &[String]) -> Result<WorkerProcess, CoreError> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stdout_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let stderr_log = stdout_log.try_clone()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log));

        let child = command.spawn().map_err(|e| {
            CoreError::worker_spawn(format!("{}: {e}", self.program.display()))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| CoreError::worker_spawn("worker exited before PID capture"))?;

        info!(
            pid = pid,
            program = %self.program.display(),
            log = %self.log_path.display(),
            "worker spawned"
        );

        Ok(WorkerProcess { pid, child })
    }
}

fn default_worker_program() -> Result<PathBuf, CoreError> {
    let exe = std::env::current_exe()?;
    Ok(match exe.parent() {
        Some(dir) => dir.join("worker"),
        None => PathBuf::from("worker"),
    })
}

/// One spawned worker: its PID plus the owned child handle used for reaping
#[derive(Debug)]
pub struct WorkerProcess {
    pid: u32,
    child: Child,
}

impl WorkerProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process is still running; reaps it if it has exited
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send a signal to this worker
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        kill(Pid::from_raw(self.pid as i32), signal)
    }
}

/// Zero-signal liveness probe against the process table
pub fn process_exists(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Convert a captured raw signal number, defaulting to SIGINT
pub fn signal_from_raw(signo: i32) -> Signal {
    Signal::try_from(signo).unwrap_or(Signal::SIGINT)
}

/// The supervisor's tracked worker set
///
/// Touched only from the single supervisor task; no concurrent mutation.
#[derive(Debug, Default)]
pub struct WorkerSet {
    workers: HashMap<u32, WorkerProcess>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, worker: WorkerProcess) {
        self.workers.insert(worker.pid(), worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.workers.keys().copied().collect()
    }

    /// Remove exited workers from the tracked set
    ///
    /// A pass over a set with no dead workers changes nothing; a pass where
    /// all workers have exited empties it. Returns the reaped PIDs.
    pub fn reap(&mut self) -> Vec<u32> {
        let mut exited = Vec::new();
        self.workers.retain(|pid, worker| match worker.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = *pid, status = %status, "worker exited");
                exited.push(*pid);
                false
            }
            Ok(None) => true,
            Err(e) => {
                // Fall back to a zero-signal probe against the process table
                if process_exists(*pid) {
                    warn!(pid = *pid, error = %e, "worker status probe failed");
                    true
                } else {
                    exited.push(*pid);
                    false
                }
            }
        });
        exited
    }

    /// Forward a signal to every tracked worker
    ///
    /// A delivery failure (typically the process is already gone) is a
    /// warning, never a blocker.
    pub fn signal_all(&self, signal: Signal) {
        for (pid, worker) in &self.workers {
            match worker.signal(signal) {
                Ok(()) => debug!(pid = *pid, signal = %signal, "signal forwarded to worker"),
                Err(e) => warn!(pid = *pid, signal = %signal, error = %e, "failed to signal worker"),
            }
        }
    }

    /// Reap in short slices until the set is empty
    ///
    /// Past the deadline any worker still in the process table is
    /// force-killed; SIGKILL cannot be ignored, so the loop converges.
    pub async fn drain(&mut self, deadline: Duration) {
        let started = Instant::now();
        let mut forced = false;

        while !self.workers.is_empty() {
            self.reap();
            if self.workers.is_empty() {
                break;
            }

            if !forced && started.elapsed() >= deadline {
                warn!(
                    remaining = self.workers.len(),
                    "drain deadline exceeded; force-killing remaining workers"
                );
                self.signal_all(Signal::SIGKILL);
                forced = true;
            }

            tokio::time::sleep(DRAIN_SLICE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper(dir: &std::path::Path) -> WorkerLauncher {
        WorkerLauncher::new(
            "sleep",
            vec!["30".to_string()],
            dir.join("worker.log"),
        )
    }

    #[tokio::test]
    async fn spawn_captures_pid_and_creates_log() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = sleeper(dir.path());

        let mut worker = launcher.spawn(&[]).unwrap();
        assert!(worker.pid() > 0);
        assert!(dir.path().join("worker.log").exists());
        assert!(worker.is_alive());
        assert!(process_exists(worker.pid()));

        worker.signal(Signal::SIGKILL).unwrap();
        let _ = worker.child.wait().await;
    }

    #[tokio::test]
    async fn reap_is_a_noop_while_workers_live() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = WorkerSet::new();
        set.insert(sleeper(dir.path()).spawn(&[]).unwrap());
        set.insert(sleeper(dir.path()).spawn(&[]).unwrap());

        assert!(set.reap().is_empty());
        assert_eq!(set.len(), 2);

        set.signal_all(Signal::SIGKILL);
        set.drain(Duration::from_secs(5)).await;
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn reap_empties_set_once_all_workers_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = WorkerSet::new();
        // Workers that exit immediately
        let launcher = WorkerLauncher::new("true", vec![], dir.path().join("worker.log"));
        set.insert(launcher.spawn(&[]).unwrap());
        set.insert(launcher.spawn(&[]).unwrap());

        // Give the short-lived processes a moment to exit
        tokio::time::sleep(Duration::from_millis(200)).await;
        let reaped = set.reap();
        assert_eq!(reaped.len(), 2);
        assert!(set.is_empty());

        // Reaping an empty set stays a no-op
        assert!(set.reap().is_empty());
    }

    #[tokio::test]
    async fn drain_converges_after_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = WorkerSet::new();
        set.insert(sleeper(dir.path()).spawn(&[]).unwrap());
        let pids = set.pids();

        set.signal_all(Signal::SIGTERM);
        set.drain(Duration::from_secs(5)).await;

        assert!(set.is_empty());
        for pid in pids {
            assert!(!process_exists(pid));
        }
    }

    #[test]
    fn unknown_signal_number_defaults_to_sigint() {
        assert_eq!(signal_from_raw(2), Signal::SIGINT);
        assert_eq!(signal_from_raw(15), Signal::SIGTERM);
        assert_eq!(signal_from_raw(0), Signal::SIGINT);
        assert_eq!(signal_from_raw(9999), Signal::SIGINT);
    }

    #[test]
    fn spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = WorkerLauncher::new(
            "/nonexistent/worker-binary",
            vec![],
            dir.path().join("worker.log"),
        );
        assert!(matches!(
            launcher.spawn(&[]),
            Err(CoreError::WorkerSpawn(_))
        ));
    }
}
