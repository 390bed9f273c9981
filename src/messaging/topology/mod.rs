//! # Broker Topology
//!
//! Declarative topology entities (exchanges, queues, retry queues), the
//! immutable registry binding publishers and consumers to them, and the
//! builder that validates configuration into a usable object graph.

pub mod builder;
pub mod entities;
pub mod registry;

pub use builder::EntityBuilder;
pub use entities::{BindTarget, Exchange, Queue, RetryQueue};
pub use registry::TopologyRegistry;
