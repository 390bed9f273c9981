//! Autoscaling supervisor entry point.
//!
//! Monitors one named consumer's queue and scales its worker pool until a
//! termination signal, a closed operational gate, or a broker fault stops
//! the loop. Intended to run under an external process manager that restarts
//! it after aborts.

use anyhow::{bail, Result};
use tracing::info;

use relay_core::config::ConfigProvider;
use relay_core::messaging::ProcessorRegistry;
use relay_core::supervisor::{install_signal_handlers, ShutdownToken, WorkerSupervisor};

#[tokio::main]
async fn main() -> Result<()> {
    relay_core::logging::init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(consumer_alias) = args.next() else {
        bail!("usage: supervisor <consumer-alias> [config-path]");
    };
    let config_path = args.next();

    let provider = ConfigProvider::resolve(config_path.as_deref());
    info!(
        consumer = %consumer_alias,
        config = %provider.path().display(),
        "starting supervisor"
    );

    let shutdown = ShutdownToken::new();
    install_signal_handlers(&shutdown)?;

    let processors = ProcessorRegistry::with_builtins();
    let mut supervisor =
        WorkerSupervisor::new(&consumer_alias, provider, &processors, shutdown)?;

    let exit = supervisor.run().await?;
    info!(exit = ?exit, "supervisor finished");
    Ok(())
}
