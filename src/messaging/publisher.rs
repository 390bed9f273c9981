//! # Publisher
//!
//! Publishes single messages or prioritized batches to a bound exchange or
//! queue. Batches are chunked to bound per-call payload size; publishing is
//! best-effort by contract: errors are logged with the publisher alias and
//! swallowed, and callers needing delivery guarantees rely on
//! processor-level business visibility instead.

use std::sync::Arc;

use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use tracing::{debug, error, warn};

use super::message::OutboundMessage;
use super::pool::{ChannelPurpose, ConnectionPool};
use super::topology::entities::BindTarget;
use super::MessagingError;

/// Upper bound on messages handed to the channel per chunk
pub const MAX_PUBLISH_CHUNK: usize = 500;

/// A publisher bound to exactly one exchange or queue
pub struct Publisher {
    alias: String,
    target: BindTarget,
    default_priority: u8,
    pool: Arc<ConnectionPool>,
}

impl Publisher {
    pub fn new(
        alias: impl Into<String>,
        target: BindTarget,
        default_priority: u8,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            alias: alias.into(),
            target,
            default_priority,
            pool,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn target(&self) -> &BindTarget {
        &self.target
    }

    /// Publish a single message; best-effort, identical contract to
    /// [`publish_batch`](Self::publish_batch)
    pub async fn publish(&self, message: OutboundMessage) {
        self.publish_batch(vec![message]).await;
    }

    /// Publish a batch of prioritized messages
    ///
    /// Empty-body messages are dropped with a warning and never fail the
    /// batch. The valid set is split into chunks of [`MAX_PUBLISH_CHUNK`]
    /// before hitting the channel. Any publish error aborts the remaining
    /// chunks, is logged, and is swallowed: returning normally does NOT mean
    /// every message reached the broker.
    pub async fn publish_batch(&self, messages: Vec<OutboundMessage>) {
        let valid = validate_batch(&self.alias, messages);
        if valid.is_empty() {
            return;
        }

        let total = valid.len();
        for chunk in valid.chunks(MAX_PUBLISH_CHUNK) {
            if let Err(e) = self.publish_chunk(chunk).await {
                // One reconnect-and-retry when the broker dropped us;
                // anything else abandons the rest of the batch
                if e.is_broker_unavailable() {
                    warn!(
                        publisher = %self.alias,
                        error = %e,
                        "publish hit unavailable broker; reconnecting once"
                    );
                    let connection = self.target.connection();
                    if self.pool.reconnect(connection).await.is_ok()
                        && self.publish_chunk(chunk).await.is_ok()
                    {
                        continue;
                    }
                }
                error!(
                    publisher = %self.alias,
                    target = %self.target.alias(),
                    error = %e,
                    "batch publish failed"
                );
                return;
            }
        }

        debug!(publisher = %self.alias, count = total, "batch published");
    }

    async fn publish_chunk(&self, chunk: &[OutboundMessage]) -> Result<(), MessagingError> {
        let channel = self
            .pool
            .get_channel(
                self.target.connection(),
                ChannelPurpose::Publisher(self.alias.clone()),
            )
            .await?;

        let (exchange, fixed_key) = self.target.publish_route();

        for message in chunk {
            // Per-message routing applies only to exchange targets; a queue
            // target's route is its own name
            let routing_key = match fixed_key {
                Some(key) => key,
                None => message.routing_key.as_deref().unwrap_or(""),
            };

            let priority = message.priority.unwrap_or(self.default_priority);
            let properties = BasicProperties::default()
                .with_delivery_mode(2)
                .with_priority(priority)
                .with_content_type("application/json".into());

            let confirm = channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &message.body,
                    properties,
                )
                .await
                .map_err(|e| MessagingError::publish(self.target.alias(), e.to_string()))?;

            confirm.await.map_err(|e| {
                MessagingError::publish(
                    self.target.alias(),
                    format!("confirmation failed: {e}"),
                )
            })?;
        }

        Ok(())
    }
}

/// Drop invalid messages, warning per drop; pure so the chunking invariant is
/// testable without a broker
fn validate_batch(alias: &str, messages: Vec<OutboundMessage>) -> Vec<OutboundMessage> {
    messages
        .into_iter()
        .filter(|m| {
            if m.is_publishable() {
                true
            } else {
                warn!(publisher = %alias, "dropping message with empty body");
                false
            }
        })
        .collect()
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("alias", &self.alias)
            .field("target", &self.target.alias())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(valid: usize, invalid: usize) -> Vec<OutboundMessage> {
        let mut messages: Vec<_> = (0..valid)
            .map(|i| OutboundMessage::new(format!("m{i}").into_bytes()))
            .collect();
        messages.extend((0..invalid).map(|_| OutboundMessage::new(Vec::new())));
        messages
    }

    #[test]
    fn validation_drops_empty_bodies_only() {
        let valid = validate_batch("p", batch(3, 2));
        assert_eq!(valid.len(), 3);
    }

    #[test]
    fn chunk_count_is_ceil_of_valid_messages() {
        for (valid, invalid, expected_chunks) in [
            (0, 4, 0),
            (1, 0, 1),
            (500, 0, 1),
            (501, 0, 2),
            (1000, 7, 2),
            (1200, 0, 3),
        ] {
            let validated = validate_batch("p", batch(valid, invalid));
            let chunks = validated.chunks(MAX_PUBLISH_CHUNK).count();
            assert_eq!(
                chunks, expected_chunks,
                "valid={valid} invalid={invalid}"
            );
        }
    }

    #[test]
    fn chunks_preserve_order_and_size_bound() {
        let validated = validate_batch("p", batch(1100, 0));
        let chunks: Vec<_> = validated.chunks(MAX_PUBLISH_CHUNK).collect();
        assert!(chunks.iter().all(|c| c.len() <= MAX_PUBLISH_CHUNK));
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[2].len(), 100);
        assert_eq!(chunks[0][0].body, b"m0");
        assert_eq!(chunks[2][99].body, b"m1099");
    }
}
