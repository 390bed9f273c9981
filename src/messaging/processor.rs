//! # Message Processors
//!
//! Pluggable per-queue business logic. A processor receives a batch of raw
//! messages and returns a per-delivery-tag outcome map; expected business
//! failures map to `status: false`, never to an `Err`. Errors are reserved
//! for infrastructure faults (a backing store being down, not a bad message).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::message::{Outcome, ReceivedMessage};
use super::MessagingError;

/// Per-queue business logic invoked by a consumer
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process one message
    async fn process(&self, message: &ReceivedMessage) -> Result<Outcome, MessagingError>;

    /// Process a batch, returning an outcome per delivery tag
    ///
    /// The default bridges to [`process`](Self::process) per message. A
    /// processing error for one message maps that message to a failure
    /// outcome without failing its siblings.
    async fn process_batch(
        &self,
        messages: &[ReceivedMessage],
    ) -> Result<HashMap<u64, Outcome>, MessagingError> {
        let mut outcomes = HashMap::with_capacity(messages.len());
        for message in messages {
            let outcome = match self.process(message).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        delivery_tag = message.delivery_tag,
                        error = %e,
                        "message processing errored; marking for redelivery"
                    );
                    Outcome::failure()
                }
            };
            outcomes.insert(message.delivery_tag, outcome);
        }
        Ok(outcomes)
    }

    /// Whether batch outcomes preserve delivery order
    ///
    /// Order-preserving processors let the consumer collapse a contiguous
    /// run of successes into a single multiple-ack.
    fn preserves_order(&self) -> bool {
        false
    }
}

/// Directory of message processors, keyed by the alias consumer configuration
/// references
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn MessageProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in processors
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("log", Arc::new(LoggingProcessor));
        registry
    }

    pub fn register(&mut self, alias: impl Into<String>, processor: Arc<dyn MessageProcessor>) {
        self.processors.insert(alias.into(), processor);
    }

    pub fn get(&self, alias: &str) -> Result<Arc<dyn MessageProcessor>, MessagingError> {
        self.processors
            .get(alias)
            .cloned()
            .ok_or_else(|| MessagingError::unknown_processor(alias))
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.processors.contains_key(alias)
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("aliases", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Built-in processor that logs each message and acknowledges it
///
/// Useful as a wiring smoke test before real business processors are
/// registered.
pub struct LoggingProcessor;

#[async_trait]
impl MessageProcessor for LoggingProcessor {
    async fn process(&self, message: &ReceivedMessage) -> Result<Outcome, MessagingError> {
        info!(
            delivery_tag = message.delivery_tag,
            routing_key = %message.routing_key,
            bytes = message.body.len(),
            redelivered = message.redelivered,
            "message received"
        );
        Ok(Outcome::success())
    }

    fn preserves_order(&self) -> bool {
        true
    }
}
