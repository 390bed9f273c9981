//! # Broker Topology Entities
//!
//! In-memory representations of exchanges, queues, and retry queues, plus the
//! declare operations that assert them against the broker. Entities are built
//! once by the [`EntityBuilder`](super::builder::EntityBuilder) and shared by
//! reference afterwards.

use std::sync::Arc;

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::debug;

use crate::config::{ExchangeKindConfig, QueueConfig, RetryQueueConfig};

use super::super::MessagingError;

/// A (queue name, routing key) bind declared on an exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeBind {
    pub queue: String,
    pub routing_key: String,
}

/// Broker exchange entity
#[derive(Debug, Clone)]
pub struct Exchange {
    pub alias: String,
    pub name: String,
    pub kind: ExchangeKindConfig,
    pub durable: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub binds: Vec<ExchangeBind>,
    /// Shared connection alias; the connection itself lives in the pool
    pub connection: String,
}

impl Exchange {
    fn exchange_kind(&self) -> ExchangeKind {
        match self.kind {
            ExchangeKindConfig::Topic => ExchangeKind::Topic,
            ExchangeKindConfig::Direct => ExchangeKind::Direct,
            ExchangeKindConfig::Fanout => ExchangeKind::Fanout,
        }
    }

    /// Declare this exchange and its queue binds on the broker
    pub async fn declare(&self, channel: &Channel) -> Result<(), MessagingError> {
        channel
            .exchange_declare(
                &self.name,
                self.exchange_kind(),
                ExchangeDeclareOptions {
                    durable: self.durable,
                    auto_delete: self.auto_delete,
                    passive: self.passive,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::declare("exchange", &self.name, e.to_string()))?;

        for bind in &self.binds {
            channel
                .queue_bind(
                    &bind.queue,
                    &self.name,
                    &bind.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MessagingError::declare("binding", &bind.queue, e.to_string()))?;
        }

        debug!(exchange = %self.name, binds = self.binds.len(), "exchange declared");
        Ok(())
    }
}

/// An (exchange name, routing key) bind declared on a queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueBind {
    pub exchange: String,
    pub routing_key: String,
}

/// Delayed-retry sub-queue; messages expire back to the primary queue
#[derive(Debug, Clone)]
pub struct RetryQueue {
    pub name: String,
    /// Exchange the expired message dead-letters through; default exchange
    /// routes straight to the primary queue by name
    pub exchange: Option<String>,
    pub ttl_ms: u64,
    pub max_retries: u32,
    /// Routing key pointing back at the primary queue
    pub dead_letter_routing_key: String,
}

impl RetryQueue {
    /// Build the retry queue for a primary queue from its configuration block
    pub fn from_config(primary_name: &str, config: &RetryQueueConfig) -> Self {
        Self {
            name: config
                .name
                .clone()
                .unwrap_or_else(|| format!("{primary_name}.retry")),
            exchange: config.exchange.clone(),
            ttl_ms: config.ttl_ms,
            max_retries: config.max_retries,
            dead_letter_routing_key: primary_name.to_string(),
        }
    }

    fn arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.exchange.clone().unwrap_or_default().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.dead_letter_routing_key.clone().into()),
        );
        args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(self.ttl_ms as i64),
        );
        args
    }
}

/// Broker queue entity, optionally carrying a retry queue
#[derive(Debug, Clone)]
pub struct Queue {
    pub alias: String,
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub binds: Vec<QueueBind>,
    pub max_priority: Option<u8>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    pub retry_queue: Option<RetryQueue>,
    pub connection: String,
}

impl Queue {
    /// Build the queue entity from its configuration block
    pub fn from_config(alias: &str, config: &QueueConfig) -> Self {
        Self {
            alias: alias.to_string(),
            name: config.name.clone(),
            durable: config.durable,
            auto_delete: config.auto_delete,
            binds: config
                .binds
                .iter()
                .map(|b| QueueBind {
                    exchange: b.exchange.clone(),
                    routing_key: b.routing_key.clone(),
                })
                .collect(),
            max_priority: config.max_priority,
            dead_letter_exchange: config.dead_letter_exchange.clone(),
            dead_letter_routing_key: config.dead_letter_routing_key.clone(),
            retry_queue: config
                .retry_queue
                .as_ref()
                .map(|r| RetryQueue::from_config(&config.name, r)),
            connection: config.connection.clone(),
        }
    }

    /// Whether the dead-letter routing key closes the retry loop
    ///
    /// A dead-letter routing key, when set, must name this queue or its retry
    /// queue. Anything else would route rejected messages into an undefined
    /// queue.
    pub fn dead_letter_closed(&self) -> bool {
        match &self.dead_letter_routing_key {
            None => true,
            Some(key) => {
                key == &self.name
                    || self
                        .retry_queue
                        .as_ref()
                        .is_some_and(|r| key == &r.name)
            }
        }
    }

    fn arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(dlx) = &self.dead_letter_exchange {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.clone().into()),
            );
        }
        if let Some(key) = &self.dead_letter_routing_key {
            if self.dead_letter_exchange.is_none() {
                // Routing by name through the default exchange
                args.insert(
                    "x-dead-letter-exchange".into(),
                    AMQPValue::LongString("".into()),
                );
            }
            args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(key.clone().into()),
            );
        }
        if let Some(priority) = self.max_priority {
            args.insert("x-max-priority".into(), AMQPValue::ShortShortUInt(priority));
        }
        args
    }

    /// Declare this queue, its retry queue, and its exchange binds
    pub async fn declare(&self, channel: &Channel) -> Result<(), MessagingError> {
        channel
            .queue_declare(
                &self.name,
                QueueDeclareOptions {
                    durable: self.durable,
                    auto_delete: self.auto_delete,
                    ..Default::default()
                },
                self.arguments(),
            )
            .await
            .map_err(|e| MessagingError::declare("queue", &self.name, e.to_string()))?;

        if let Some(retry) = &self.retry_queue {
            channel
                .queue_declare(
                    &retry.name,
                    QueueDeclareOptions {
                        durable: self.durable,
                        ..Default::default()
                    },
                    retry.arguments(),
                )
                .await
                .map_err(|e| MessagingError::declare("queue", &retry.name, e.to_string()))?;
        }

        for bind in &self.binds {
            channel
                .queue_bind(
                    &self.name,
                    &bind.exchange,
                    &bind.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| MessagingError::declare("binding", &self.name, e.to_string()))?;
        }

        debug!(queue = %self.name, retry = self.retry_queue.is_some(), "queue declared");
        Ok(())
    }
}

/// What a publisher is bound to: exactly one exchange or one queue
///
/// The capability split replaces instanceof-style dispatch. Exchange targets
/// route per message; queue targets carry an implicit route (their own name
/// through the default exchange).
#[derive(Debug, Clone)]
pub enum BindTarget {
    Exchange(Arc<Exchange>),
    Queue(Arc<Queue>),
}

impl BindTarget {
    /// Whether messages published to this target need a per-message routing key
    pub fn requires_routing_key(&self) -> bool {
        matches!(self, Self::Exchange(_))
    }

    /// Alias the target was declared under
    pub fn alias(&self) -> &str {
        match self {
            Self::Exchange(e) => &e.alias,
            Self::Queue(q) => &q.alias,
        }
    }

    /// Connection alias the target publishes through
    pub fn connection(&self) -> &str {
        match self {
            Self::Exchange(e) => &e.connection,
            Self::Queue(q) => &q.connection,
        }
    }

    /// (exchange, fixed routing key) pair for a basic publish
    ///
    /// Exchange targets return no fixed key; the caller supplies one per
    /// message. Queue targets publish through the default exchange with the
    /// queue name as the key.
    pub fn publish_route(&self) -> (&str, Option<&str>) {
        match self {
            Self::Exchange(e) => (e.name.as_str(), None),
            Self::Queue(q) => ("", Some(q.name.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_config(name: &str) -> QueueConfig {
        QueueConfig {
            connection: "default".to_string(),
            name: name.to_string(),
            durable: true,
            auto_delete: false,
            binds: vec![],
            max_priority: None,
            dead_letter_exchange: None,
            dead_letter_routing_key: None,
            retry_queue: None,
        }
    }

    #[test]
    fn retry_queue_name_defaults_to_suffix() {
        let retry = RetryQueue::from_config(
            "orders",
            &RetryQueueConfig {
                name: None,
                exchange: None,
                ttl_ms: 5_000,
                max_retries: 3,
            },
        );
        assert_eq!(retry.name, "orders.retry");
        assert_eq!(retry.dead_letter_routing_key, "orders");
    }

    #[test]
    fn dead_letter_closure_accepts_self_and_retry() {
        let mut config = queue_config("orders");
        config.dead_letter_routing_key = Some("orders".to_string());
        assert!(Queue::from_config("orders", &config).dead_letter_closed());

        config.retry_queue = Some(RetryQueueConfig {
            name: None,
            exchange: None,
            ttl_ms: 1_000,
            max_retries: 1,
        });
        config.dead_letter_routing_key = Some("orders.retry".to_string());
        assert!(Queue::from_config("orders", &config).dead_letter_closed());
    }

    #[test]
    fn dead_letter_closure_rejects_unrelated_queue() {
        let mut config = queue_config("orders");
        config.dead_letter_routing_key = Some("somewhere_else".to_string());
        assert!(!Queue::from_config("orders", &config).dead_letter_closed());
    }

    #[test]
    fn unset_dead_letter_is_closed() {
        let config = queue_config("orders");
        assert!(Queue::from_config("orders", &config).dead_letter_closed());
    }

    #[test]
    fn exchange_target_requires_routing_key() {
        let exchange = Arc::new(Exchange {
            alias: "events".to_string(),
            name: "app.events".to_string(),
            kind: ExchangeKindConfig::Topic,
            durable: true,
            auto_delete: false,
            passive: false,
            binds: vec![],
            connection: "default".to_string(),
        });
        let target = BindTarget::Exchange(exchange);
        assert!(target.requires_routing_key());
        assert_eq!(target.publish_route(), ("app.events", None));
    }

    #[test]
    fn queue_target_has_implicit_route() {
        let queue = Arc::new(Queue::from_config("orders", &queue_config("app.orders")));
        let target = BindTarget::Queue(queue);
        assert!(!target.requires_routing_key());
        assert_eq!(target.publish_route(), ("", Some("app.orders")));
    }
}
