//! Worker process lifecycle against real OS processes: spawn with PID
//! capture and log redirection, reap idempotence, and shutdown convergence
//! after signal forwarding.

#![cfg(unix)]

use std::time::Duration;

use relay_core::supervisor::{process_exists, WorkerLauncher, WorkerSet, WorkerSignal};

fn sleeper_launcher(dir: &std::path::Path) -> WorkerLauncher {
    WorkerLauncher::new("sleep", vec!["30".to_string()], dir.join("worker.log"))
}

#[tokio::test]
async fn spawn_redirects_output_and_captures_pid() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = WorkerLauncher::new(
        "sh",
        vec!["-c".to_string(), "echo out; echo err >&2".to_string()],
        dir.path().join("combined.log"),
    );

    let worker = launcher.spawn(&[]).unwrap();
    assert!(worker.pid() > 0);

    // Both streams land in the same file
    tokio::time::sleep(Duration::from_millis(300)).await;
    let contents = std::fs::read_to_string(dir.path().join("combined.log")).unwrap();
    assert!(contents.contains("out"));
    assert!(contents.contains("err"));

    let mut set = WorkerSet::new();
    set.insert(worker);
    set.drain(Duration::from_secs(5)).await;
    assert!(set.is_empty());
}

#[tokio::test]
async fn shutdown_converges_with_no_leaked_pids() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = sleeper_launcher(dir.path());

    let mut set = WorkerSet::new();
    for _ in 0..3 {
        set.insert(launcher.spawn(&[]).unwrap());
    }
    let pids = set.pids();
    assert_eq!(pids.len(), 3);

    // Reap with everyone alive is a no-op
    assert!(set.reap().is_empty());
    assert_eq!(set.len(), 3);

    // Forward the termination signal and wait for clean exit
    set.signal_all(WorkerSignal::SIGTERM);
    set.drain(Duration::from_secs(10)).await;

    assert!(set.is_empty());
    for pid in pids {
        assert!(!process_exists(pid), "pid {pid} leaked past shutdown");
    }
}

#[tokio::test]
async fn drain_deadline_force_kills_stubborn_workers() {
    let dir = tempfile::tempdir().unwrap();
    // A worker that traps and ignores SIGTERM
    let launcher = WorkerLauncher::new(
        "sh",
        vec!["-c".to_string(), "trap '' TERM; sleep 30".to_string()],
        dir.path().join("worker.log"),
    );

    let mut set = WorkerSet::new();
    set.insert(launcher.spawn(&[]).unwrap());
    let pids = set.pids();

    // Let the shell install its trap before signalling
    tokio::time::sleep(Duration::from_millis(300)).await;
    set.signal_all(WorkerSignal::SIGTERM);
    set.drain(Duration::from_secs(1)).await;

    assert!(set.is_empty());
    for pid in pids {
        assert!(!process_exists(pid));
    }
}
