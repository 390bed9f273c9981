//! # Messaging Error Types
//!
//! Structured error handling for the messaging subsystem using thiserror.
//! Build-time topology errors and steady-state broker errors share one
//! taxonomy; callers match on variants to decide whether a failure is fatal
//! (topology construction) or recoverable (broker redelivery).

use thiserror::Error;

/// Messaging subsystem error taxonomy
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Broker unavailable on connection '{connection}': {message}")]
    BrokerUnavailable { connection: String, message: String },

    #[error("Undefined connection alias '{alias}'")]
    UndefinedConnection { alias: String },

    #[error("Undefined bind target '{target}' referenced by '{owner}'")]
    UndefinedBindTarget { owner: String, target: String },

    #[error("Unknown {kind} alias '{alias}'")]
    UnknownAlias { kind: &'static str, alias: String },

    #[error("Unknown message processor '{alias}'")]
    UnknownProcessor { alias: String },

    #[error(
        "Queue '{queue}' dead-letters to '{routing_key}', which is neither itself nor its retry queue"
    )]
    DanglingDeadLetter { queue: String, routing_key: String },

    #[error("Declare failed for {entity} '{name}': {message}")]
    Declare {
        entity: &'static str,
        name: String,
        message: String,
    },

    #[error("Publish to '{target}' failed: {message}")]
    Publish { target: String, message: String },

    #[error("Receive from '{queue}' failed: {message}")]
    Receive { queue: String, message: String },

    #[error("Ack failed on '{queue}' (delivery tag {delivery_tag}): {message}")]
    Ack {
        queue: String,
        delivery_tag: u64,
        message: String,
    },

    #[error("Nack failed on '{queue}' (delivery tag {delivery_tag}): {message}")]
    Nack {
        queue: String,
        delivery_tag: u64,
        message: String,
    },

    #[error("Queue stats query failed for '{queue}': {message}")]
    QueueStats { queue: String, message: String },

    #[error("Message serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },
}

impl MessagingError {
    /// Create a broker unavailable error
    pub fn broker_unavailable(
        connection: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BrokerUnavailable {
            connection: connection.into(),
            message: message.into(),
        }
    }

    /// Create an undefined connection error
    pub fn undefined_connection(alias: impl Into<String>) -> Self {
        Self::UndefinedConnection {
            alias: alias.into(),
        }
    }

    /// Create an undefined bind target error
    pub fn undefined_bind_target(owner: impl Into<String>, target: impl Into<String>) -> Self {
        Self::UndefinedBindTarget {
            owner: owner.into(),
            target: target.into(),
        }
    }

    /// Create an unknown alias error
    pub fn unknown_alias(kind: &'static str, alias: impl Into<String>) -> Self {
        Self::UnknownAlias {
            kind,
            alias: alias.into(),
        }
    }

    /// Create an unknown processor error
    pub fn unknown_processor(alias: impl Into<String>) -> Self {
        Self::UnknownProcessor {
            alias: alias.into(),
        }
    }

    /// Create a dangling dead-letter error
    pub fn dangling_dead_letter(
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self::DanglingDeadLetter {
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Create a declare error
    pub fn declare(
        entity: &'static str,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Declare {
            entity,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a receive error
    pub fn receive(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Receive {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create an ack error
    pub fn ack(queue: impl Into<String>, delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Ack {
            queue: queue.into(),
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a nack error
    pub fn nack(queue: impl Into<String>, delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Nack {
            queue: queue.into(),
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a queue stats error
    pub fn queue_stats(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueStats {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether this error indicates the broker itself is unreachable
    pub fn is_broker_unavailable(&self) -> bool {
        matches!(self, Self::BrokerUnavailable { .. })
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
