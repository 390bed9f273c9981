//! # Messaging Subsystem
//!
//! Broker-facing core: connection pooling, declarative topology, publishers,
//! consumers, and pluggable message processors. The supervisor drives
//! consumers from a separate module; storage sinks are external collaborators
//! behind the [`crate::sink`] interface.
//!
//! ## Architecture
//!
//! ```text
//! ConfigProvider ──snapshot──▶ EntityBuilder ──▶ TopologyRegistry
//!                                                  ├── Publisher ──▶ BindTarget (Exchange | Queue)
//!                                                  └── Consumer ──▶ Queue ──▶ MessageProcessor
//! ConnectionPool ◀── channels-by-purpose ── all of the above
//! ```

pub mod consumer;
pub mod errors;
pub mod message;
pub mod pool;
pub mod processor;
pub mod publisher;
pub mod topology;

pub use consumer::{Consumer, ConsumerExit, QueueInfo};
pub use errors::MessagingError;
pub use message::{Outcome, OutboundMessage, ReceivedMessage};
pub use pool::{ChannelPurpose, ConnectionPool};
pub use processor::{LoggingProcessor, MessageProcessor, ProcessorRegistry};
pub use publisher::{Publisher, MAX_PUBLISH_CHUNK};
pub use topology::{BindTarget, EntityBuilder, TopologyRegistry};
