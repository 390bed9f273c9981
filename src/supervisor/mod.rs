//! # Autoscaling Worker Supervisor
//!
//! Long-running loop that watches one consumer's queue, spawns worker
//! processes to match demand, reaps the ones that retire, and shuts the
//! whole worker tree down on a termination signal.
//!
//! One beat: check the operational gates, refresh autoscale parameters from
//! the configuration snapshot, inspect queue depth and consumer count,
//! decide how many workers to spawn, sleep a cycle, reap. The shutdown token
//! is checked once per beat, so shutdown latency is bounded by the cycle
//! time. Scale-down is passive only: workers exit on their own idle timeout
//! and are never killed by a scaling decision.

pub mod gates;
pub mod scaling;
pub mod worker;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::config::ConfigProvider;
use crate::error::{CoreError, Result};
use crate::messaging::{EntityBuilder, ProcessorRegistry, TopologyRegistry};

pub use gates::OperationalGates;
pub use nix::sys::signal::Signal as WorkerSignal;
pub use scaling::{should_alert, workers_to_spawn};
pub use worker::{process_exists, signal_from_raw, WorkerLauncher, WorkerProcess, WorkerSet};

/// Cooperative shutdown token set by the signal handler
///
/// Records which signal arrived so the supervisor can forward the identical
/// signal to its workers. Zero means no signal has been observed.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    signo: Arc<AtomicI32>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received signal; the first one wins
    pub fn trigger(&self, signo: i32) {
        let _ = self
            .signo
            .compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.signo.load(Ordering::SeqCst) != 0
    }

    /// The captured signal, defaulting to SIGINT when triggered programmatically
    pub fn captured_signal(&self) -> Signal {
        signal_from_raw(self.signo.load(Ordering::SeqCst))
    }
}

/// Spawn background listeners that flip the token on SIGINT or SIGTERM
pub fn install_signal_handlers(token: &ShutdownToken) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let int_token = token.clone();
    tokio::spawn(async move {
        if sigint.recv().await.is_some() {
            info!("SIGINT received, shutting down at next beat");
            int_token.trigger(libc_signo(Signal::SIGINT));
        }
    });

    let term_token = token.clone();
    tokio::spawn(async move {
        if sigterm.recv().await.is_some() {
            info!("SIGTERM received, shutting down at next beat");
            term_token.trigger(libc_signo(Signal::SIGTERM));
        }
    });

    Ok(())
}

fn libc_signo(signal: Signal) -> i32 {
    signal as i32
}

/// Why the supervisor loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Termination signal observed
    Signalled,
    /// Monitored queue missing from the enabled-queue allow-list
    QueueDisabled,
    /// A maintenance marker file is present
    Maintenance,
    /// Configuration snapshot or queue inspection failed
    Aborted,
}

/// Supervises the worker pool for one named consumer
pub struct WorkerSupervisor {
    consumer_alias: String,
    provider: ConfigProvider,
    registry: TopologyRegistry,
    launcher: WorkerLauncher,
    shutdown: ShutdownToken,
    workers: WorkerSet,
    drain_deadline: Duration,
}

impl WorkerSupervisor {
    /// Build the supervisor from the initial configuration snapshot
    ///
    /// The topology registry is built once here; only the autoscale
    /// parameters and operational gates are re-read on later beats.
    pub fn new(
        consumer_alias: impl Into<String>,
        provider: ConfigProvider,
        processors: &ProcessorRegistry,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let consumer_alias = consumer_alias.into();
        let config = provider.snapshot()?;

        config.consumers.get(&consumer_alias).ok_or_else(|| {
            CoreError::configuration(format!("unknown consumer alias '{consumer_alias}'"))
        })?;

        let registry = EntityBuilder::new(&config, processors).build()?;
        let launcher = WorkerLauncher::from_config(&config.supervisor, &consumer_alias)?;
        let drain_deadline = Duration::from_secs(config.supervisor.drain_deadline_secs);

        Ok(Self {
            consumer_alias,
            provider,
            registry,
            launcher,
            shutdown,
            workers: WorkerSet::new(),
            drain_deadline,
        })
    }

    /// Run beats until a gate closes, inspection fails, or a signal arrives,
    /// then drain the worker tree
    pub async fn run(&mut self) -> Result<SupervisorExit> {
        info!(consumer = %self.consumer_alias, "supervisor started");

        let exit = loop {
            if self.shutdown.is_triggered() {
                break SupervisorExit::Signalled;
            }

            match self.beat().await {
                Ok(None) => {}
                Ok(Some(exit)) => break exit,
                Err(e) => {
                    error!(consumer = %self.consumer_alias, error = %e, "beat aborted");
                    break SupervisorExit::Aborted;
                }
            }
        };

        self.drain().await;
        info!(consumer = %self.consumer_alias, exit = ?exit, "supervisor exited");
        Ok(exit)
    }

    /// One supervisor beat; `Ok(Some(..))` requests a clean exit
    async fn beat(&mut self) -> Result<Option<SupervisorExit>> {
        let config = self.provider.snapshot()?;
        let gates = OperationalGates::from_config(&config.supervisor);

        let consumer_config = config.consumers.get(&self.consumer_alias).ok_or_else(|| {
            CoreError::configuration(format!(
                "consumer '{}' vanished from configuration",
                self.consumer_alias
            ))
        })?;

        if !gates.queue_enabled(&consumer_config.queue) {
            info!(
                consumer = %self.consumer_alias,
                queue = %consumer_config.queue,
                "queue not in allow-list, stopping"
            );
            return Ok(Some(SupervisorExit::QueueDisabled));
        }

        if gates.maintenance_active() {
            info!(consumer = %self.consumer_alias, "maintenance active, stopping");
            return Ok(Some(SupervisorExit::Maintenance));
        }

        // Parameters take effect without restart; the topology does not
        let params = consumer_config.options.clone();

        let consumer = self.registry.consumer(&self.consumer_alias)?;
        let info = consumer.queue_info().await?;

        let spawn_count = workers_to_spawn(info.message_count, info.consumer_count, &params);

        if should_alert(info.consumer_count, &params) {
            warn!(
                consumer = %self.consumer_alias,
                queue = %info.queue_name,
                consumer_count = info.consumer_count,
                alert_threshold = params.alert_threshold_size,
                max_num_workers = params.max_num_workers,
                "consumer count above alert threshold"
            );
        }

        if spawn_count > 0 {
            info!(
                consumer = %self.consumer_alias,
                queue = %info.queue_name,
                message_count = info.message_count,
                consumer_count = info.consumer_count,
                spawning = spawn_count,
                "scaling up"
            );
        }

        for _ in 0..spawn_count {
            // A failed spawn is not retried this beat; the next beat
            // recomputes from live counts
            match self.launcher.spawn(&[self.consumer_alias.clone()]) {
                Ok(worker) => self.workers.insert(worker),
                Err(e) => {
                    error!(consumer = %self.consumer_alias, error = %e, "worker spawn failed");
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(params.cycle_time)).await;

        let reaped = self.workers.reap();
        if !reaped.is_empty() {
            info!(
                consumer = %self.consumer_alias,
                reaped = reaped.len(),
                tracked = self.workers.len(),
                "reaped exited workers"
            );
        }

        Ok(None)
    }

    /// Forward the captured signal to every worker and wait for clean exit
    async fn drain(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        let signal = self.shutdown.captured_signal();
        info!(
            consumer = %self.consumer_alias,
            workers = self.workers.len(),
            signal = %signal,
            "draining worker tree"
        );

        self.workers.signal_all(signal);
        self.workers.drain(self.drain_deadline).await;
    }

    /// PIDs currently tracked; exposed for shutdown-convergence checks
    pub fn tracked_pids(&self) -> Vec<u32> {
        self.workers.pids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_token_records_first_signal() {
        let token = ShutdownToken::new();
        assert!(!token.is_triggered());
        assert_eq!(token.captured_signal(), Signal::SIGINT);

        token.trigger(15);
        assert!(token.is_triggered());
        assert_eq!(token.captured_signal(), Signal::SIGTERM);

        // A later signal does not overwrite the captured one
        token.trigger(2);
        assert_eq!(token.captured_signal(), Signal::SIGTERM);
    }

    #[test]
    fn untriggered_token_defaults_to_sigint() {
        let token = ShutdownToken::new();
        assert_eq!(token.captured_signal(), Signal::SIGINT);
    }
}
