//! # Consumer
//!
//! Drains a bound queue and settles each delivery according to its processing
//! outcome. The loop is a cooperative state machine: Idle until the channel
//! opens, Consuming while waiting for deliveries (bounded by the idle
//! timeout), Processing a batch, then Acking/Nacking before consuming again.
//! Zero messages within the idle timeout is a clean exit, not an error; the
//! supervisor respawns workers while backlog remains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::Channel;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{Outcome, ReceivedMessage};
use super::pool::{ChannelPurpose, ConnectionPool};
use super::processor::MessageProcessor;
use super::topology::entities::Queue;
use super::MessagingError;

/// How long the consumer keeps draining once the first message of a batch has
/// arrived
const DRAIN_WINDOW: Duration = Duration::from_millis(100);

/// Why a consumer run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// No message arrived within the idle timeout
    Idle,
}

/// Queue introspection snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub queue_name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// A consumer bound to exactly one queue
pub struct Consumer {
    alias: String,
    queue: Arc<Queue>,
    prefetch_count: u16,
    idle_timeout: Duration,
    processor: Arc<dyn MessageProcessor>,
    pool: Arc<ConnectionPool>,
}

impl Consumer {
    pub fn new(
        alias: impl Into<String>,
        queue: Arc<Queue>,
        prefetch_count: u16,
        idle_timeout: Duration,
        processor: Arc<dyn MessageProcessor>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            alias: alias.into(),
            queue,
            prefetch_count,
            idle_timeout,
            processor,
            pool,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Current queue depth and consumer count via passive declare
    pub async fn queue_info(&self) -> Result<QueueInfo, MessagingError> {
        let channel = self
            .pool
            .get_channel(&self.queue.connection, ChannelPurpose::Topology)
            .await?;

        let state = channel
            .queue_declare(
                &self.queue.name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_stats(&self.queue.name, e.to_string()))?;

        Ok(QueueInfo {
            queue_name: self.queue.name.clone(),
            message_count: state.message_count(),
            consumer_count: state.consumer_count(),
        })
    }

    /// Consume until the queue stays empty for the idle timeout
    ///
    /// Asserts the queue topology, registers prefetch, then loops batches
    /// through the processor. Returns `Ok(ConsumerExit::Idle)` on a clean
    /// idle exit; errors only for broker-level faults.
    pub async fn run(&self) -> Result<ConsumerExit, MessagingError> {
        let channel = self
            .pool
            .get_channel(
                &self.queue.connection,
                ChannelPurpose::Consumer(self.alias.clone()),
            )
            .await?;

        self.queue.declare(&channel).await?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| {
                MessagingError::receive(&self.queue.name, format!("failed to set QoS: {e}"))
            })?;

        let consumer_tag = format!("{}-{}", self.alias, Uuid::new_v4());
        let mut deliveries = channel
            .basic_consume(
                &self.queue.name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::receive(&self.queue.name, e.to_string()))?;

        info!(
            consumer = %self.alias,
            queue = %self.queue.name,
            prefetch = self.prefetch_count,
            idle_ttl = self.idle_timeout.as_secs(),
            "consuming"
        );

        loop {
            let batch = self.next_batch(&mut deliveries).await?;
            if batch.is_empty() {
                info!(consumer = %self.alias, queue = %self.queue.name, "idle timeout reached, stopping");
                return Ok(ConsumerExit::Idle);
            }
            self.process_and_settle(&channel, batch).await;
        }
    }

    /// Wait up to the idle timeout for the first delivery, then drain the
    /// prefetch window
    async fn next_batch(
        &self,
        deliveries: &mut lapin::Consumer,
    ) -> Result<Vec<ReceivedMessage>, MessagingError> {
        let mut batch = Vec::new();

        let first = match timeout(self.idle_timeout, deliveries.next()).await {
            Err(_) => return Ok(batch),
            Ok(None) => {
                return Err(MessagingError::receive(
                    &self.queue.name,
                    "consume stream closed by broker",
                ))
            }
            Ok(Some(Err(e))) => {
                return Err(MessagingError::receive(&self.queue.name, e.to_string()))
            }
            Ok(Some(Ok(delivery))) => delivery,
        };
        batch.push(convert(first));

        while batch.len() < self.prefetch_count as usize {
            match timeout(DRAIN_WINDOW, deliveries.next()).await {
                Ok(Some(Ok(delivery))) => batch.push(convert(delivery)),
                Ok(Some(Err(e))) => {
                    warn!(queue = %self.queue.name, error = %e, "delivery error while draining batch");
                    break;
                }
                Ok(None) | Err(_) => break,
            }
        }

        debug!(queue = %self.queue.name, batch = batch.len(), "batch received");
        Ok(batch)
    }

    /// Hand the batch to the processor and ack/nack per outcome
    ///
    /// Every delivery tag lands in exactly one of the ack or nack set. An
    /// infrastructure fault from the processor nacks the whole batch for
    /// redelivery. Settlement transport failures are logged and left to
    /// broker-side redelivery after channel loss.
    async fn process_and_settle(&self, channel: &Channel, batch: Vec<ReceivedMessage>) {
        let tags: Vec<u64> = batch.iter().map(|m| m.delivery_tag).collect();

        let outcomes = match self.processor.process_batch(&batch).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(
                    consumer = %self.alias,
                    queue = %self.queue.name,
                    error = %e,
                    "batch processing fault; requeueing entire batch"
                );
                HashMap::new()
            }
        };

        let (acks, nacks) = partition_outcomes(&tags, &outcomes);

        let mut individual_acks: &[u64] = &acks;
        if self.processor.preserves_order() {
            if let Some((highest, consumed)) = contiguous_ack_prefix(&tags, &acks) {
                match channel
                    .basic_ack(highest, BasicAckOptions { multiple: true })
                    .await
                {
                    Ok(()) => individual_acks = &acks[consumed..],
                    Err(e) => {
                        warn!(
                            queue = %self.queue.name,
                            delivery_tag = highest,
                            error = %MessagingError::ack(&self.queue.name, highest, e.to_string()),
                            "multiple-ack failed; messages await redelivery"
                        );
                        individual_acks = &acks[consumed..];
                    }
                }
            }
        }

        for &tag in individual_acks {
            if let Err(e) = channel.basic_ack(tag, BasicAckOptions::default()).await {
                warn!(
                    queue = %self.queue.name,
                    error = %MessagingError::ack(&self.queue.name, tag, e.to_string()),
                    "ack failed; message awaits redelivery"
                );
            }
        }

        for &tag in &nacks {
            if let Err(e) = channel
                .basic_nack(
                    tag,
                    BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    },
                )
                .await
            {
                warn!(
                    queue = %self.queue.name,
                    error = %MessagingError::nack(&self.queue.name, tag, e.to_string()),
                    "nack failed; message awaits redelivery"
                );
            }
        }

        debug!(
            consumer = %self.alias,
            acked = acks.len(),
            nacked = nacks.len(),
            "batch settled"
        );
    }
}

fn convert(delivery: Delivery) -> ReceivedMessage {
    ReceivedMessage {
        delivery_tag: delivery.delivery_tag,
        body: delivery.data,
        redelivered: delivery.redelivered,
        routing_key: delivery.routing_key.to_string(),
    }
}

/// Split a batch into ack and nack sets by outcome
///
/// Tags missing from the outcome map count as failures, so every tag lands in
/// exactly one set. Batch order is preserved in both.
fn partition_outcomes(tags: &[u64], outcomes: &HashMap<u64, Outcome>) -> (Vec<u64>, Vec<u64>) {
    let mut acks = Vec::new();
    let mut nacks = Vec::new();
    for &tag in tags {
        if outcomes.get(&tag).map(|o| o.status).unwrap_or(false) {
            acks.push(tag);
        } else {
            nacks.push(tag);
        }
    }
    (acks, nacks)
}

/// Longest run of leading batch tags that were all acknowledged
///
/// Returns the highest delivery tag of the run and how many acks it covers,
/// for collapsing into one multiple-ack.
fn contiguous_ack_prefix(tags: &[u64], acks: &[u64]) -> Option<(u64, usize)> {
    let mut n = 0;
    while n < acks.len() && n < tags.len() && acks[n] == tags[n] {
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some((acks[n - 1], n))
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("alias", &self.alias)
            .field("queue", &self.queue.name)
            .field("prefetch_count", &self.prefetch_count)
            .finish()
    }
}
