#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Relay Core
//!
//! Message-queue processing core for data-centric backend services: a
//! supervisor process that monitors one logical queue and adaptively scales a
//! pool of OS worker processes, plus the publisher/consumer abstractions that
//! bind logical aliases to broker topology (exchanges, queues, bindings, and
//! retry queues with dead-lettering).
//!
//! ## Architecture
//!
//! The supervisor polls a named consumer's queue statistics, decides how many
//! workers to spawn through a pure scaling function, and spawns each worker
//! as an independent OS process. Every worker rebuilds its own topology
//! registry from configuration, consumes batches bounded by its prefetch
//! count, hands them to a pluggable message processor, and acknowledges or
//! requeues per message. Scale-down is passive: workers exit on their own
//! idle timeout.
//!
//! ## Module Organization
//!
//! - [`config`] - Configuration snapshots and the per-beat provider
//! - [`messaging`] - Connection pool, topology, publishers, consumers,
//!   message processors
//! - [`supervisor`] - Autoscaling worker supervision and operational gates
//! - [`sink`] - Bulk write interface to the external search/index store
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured tracing initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay_core::config::ConfigProvider;
//! use relay_core::messaging::{EntityBuilder, ProcessorRegistry};
//!
//! # fn example() -> relay_core::error::Result<()> {
//! let provider = ConfigProvider::resolve(None);
//! let config = provider.snapshot()?;
//!
//! let processors = ProcessorRegistry::with_builtins();
//! let registry = EntityBuilder::new(&config, &processors).build()?;
//!
//! println!("consumers: {:?}", registry.consumer_aliases().collect::<Vec<_>>());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod sink;
pub mod supervisor;

pub use error::{CoreError, Result};
