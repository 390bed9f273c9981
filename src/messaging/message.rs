//! # Message Types
//!
//! Outbound and inbound message representations shared by publishers,
//! consumers, and message processors.

use serde::Serialize;

use super::MessagingError;

/// A message handed to a publisher
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    /// Raw payload bytes; empty bodies are dropped before publishing
    pub body: Vec<u8>,

    /// Per-message routing key, honored only for exchange-bound publishers
    pub routing_key: Option<String>,

    /// Per-message priority; the publisher's default applies when unset
    pub priority: Option<u8>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            routing_key: None,
            priority: None,
        }
    }

    /// Serialize a value as a JSON payload
    pub fn json<T: Serialize>(value: &T) -> Result<Self, MessagingError> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// A message with an empty body is invalid and never published
    pub fn is_publishable(&self) -> bool {
        !self.body.is_empty()
    }
}

/// A message delivered to a consumer, keyed by broker delivery tag
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Broker-assigned identifier used to ack/nack this delivery
    pub delivery_tag: u64,

    /// Raw payload bytes
    pub body: Vec<u8>,

    /// Whether the broker has delivered this message before
    pub redelivered: bool,

    /// Routing key the message arrived with
    pub routing_key: String,
}

impl ReceivedMessage {
    /// Deserialize the payload as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, MessagingError> {
        serde_json::from_slice(&self.body).map_err(MessagingError::from)
    }
}

/// Per-message processing outcome returned by a message processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// True acknowledges the message; false requeues it for retry
    pub status: bool,
}

impl Outcome {
    pub fn success() -> Self {
        Self { status: true }
    }

    pub fn failure() -> Self {
        Self { status: false }
    }
}
