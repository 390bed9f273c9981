//! Consumer worker entry point.
//!
//! Spawned in the background by the supervisor, one process per worker. Each
//! worker rebuilds its own topology registry from the configuration snapshot
//! and consumes until the queue stays idle for the configured timeout, then
//! exits cleanly; the supervisor respawns workers while backlog remains.

use anyhow::{bail, Result};
use tracing::info;

use relay_core::config::ConfigProvider;
use relay_core::messaging::ProcessorRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    relay_core::logging::init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(consumer_alias) = args.next() else {
        bail!("usage: worker <consumer-alias> [config-path]");
    };
    let config_path = args.next();

    let provider = ConfigProvider::resolve(config_path.as_deref());
    let config = provider.snapshot()?;

    let processors = ProcessorRegistry::with_builtins();
    let registry = relay_core::messaging::EntityBuilder::new(&config, &processors).build()?;
    registry.open_eager().await?;

    let consumer = registry.consumer(&consumer_alias)?;
    info!(consumer = %consumer_alias, "worker started");

    tokio::select! {
        result = consumer.run() => {
            let exit = result?;
            info!(consumer = %consumer_alias, exit = ?exit, "worker finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!(consumer = %consumer_alias, "interrupt received, worker stopping");
        }
        result = wait_for_sigterm() => {
            result?;
            info!(consumer = %consumer_alias, "SIGTERM received, worker stopping");
        }
    }

    Ok(())
}

/// Wait for SIGTERM (forwarded by the supervisor during drain)
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
