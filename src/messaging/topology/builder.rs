//! # Entity Builder
//!
//! Translates declarative configuration into the topology registry,
//! validating referential integrity as it goes. Construction fails closed:
//! any undefined connection, bind target, or open dead-letter loop yields an
//! error and no registry. No network I/O happens here; eager connections are
//! opened by the caller through [`TopologyRegistry::open_eager`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::EngineConfig;
use crate::messaging::consumer::Consumer;
use crate::messaging::pool::ConnectionPool;
use crate::messaging::processor::ProcessorRegistry;
use crate::messaging::publisher::Publisher;
use crate::messaging::MessagingError;

use super::entities::{BindTarget, Exchange, ExchangeBind, Queue};
use super::registry::TopologyRegistry;

/// Builds a [`TopologyRegistry`] from one configuration snapshot
pub struct EntityBuilder<'a> {
    config: &'a EngineConfig,
    processors: &'a ProcessorRegistry,
}

impl<'a> EntityBuilder<'a> {
    pub fn new(config: &'a EngineConfig, processors: &'a ProcessorRegistry) -> Self {
        Self { config, processors }
    }

    /// Construct the registry, validating every alias reference
    pub fn build(self) -> Result<TopologyRegistry, MessagingError> {
        let pool = Arc::new(ConnectionPool::from_config(&self.config.connections));

        let exchanges = self.build_exchanges(&pool)?;
        let queues = self.build_queues(&pool, &exchanges)?;
        let publishers = self.build_publishers(&pool, &exchanges, &queues)?;
        let consumers = self.build_consumers(&pool, &queues)?;

        debug!(
            exchanges = exchanges.len(),
            queues = queues.len(),
            publishers = publishers.len(),
            consumers = consumers.len(),
            "topology registry built"
        );

        Ok(TopologyRegistry::new(pool, publishers, consumers))
    }

    fn build_exchanges(
        &self,
        pool: &Arc<ConnectionPool>,
    ) -> Result<HashMap<String, Arc<Exchange>>, MessagingError> {
        let mut exchanges = HashMap::new();
        for (alias, config) in &self.config.exchanges {
            if !pool.contains(&config.connection) {
                return Err(MessagingError::undefined_connection(&config.connection));
            }

            // Binds name queue aliases; resolve them to broker queue names now
            // so a typo fails the build instead of a later declare
            let mut binds = Vec::with_capacity(config.binds.len());
            for bind in &config.binds {
                let queue = self
                    .config
                    .queues
                    .get(&bind.queue)
                    .ok_or_else(|| MessagingError::undefined_bind_target(alias, &bind.queue))?;
                binds.push(ExchangeBind {
                    queue: queue.name.clone(),
                    routing_key: bind.routing_key.clone(),
                });
            }

            exchanges.insert(
                alias.clone(),
                Arc::new(Exchange {
                    alias: alias.clone(),
                    name: config.name.clone(),
                    kind: config.kind,
                    durable: config.durable,
                    auto_delete: config.auto_delete,
                    passive: config.passive,
                    binds,
                    connection: config.connection.clone(),
                }),
            );
        }
        Ok(exchanges)
    }

    fn build_queues(
        &self,
        pool: &Arc<ConnectionPool>,
        exchanges: &HashMap<String, Arc<Exchange>>,
    ) -> Result<HashMap<String, Arc<Queue>>, MessagingError> {
        let mut queues = HashMap::new();
        for (alias, config) in &self.config.queues {
            if !pool.contains(&config.connection) {
                return Err(MessagingError::undefined_connection(&config.connection));
            }

            let mut queue = Queue::from_config(alias, config);

            // Binds name exchange aliases; swap in broker names for declares
            for bind in &mut queue.binds {
                let exchange = exchanges
                    .get(&bind.exchange)
                    .ok_or_else(|| MessagingError::undefined_bind_target(alias, &bind.exchange))?;
                bind.exchange = exchange.name.clone();
            }

            if !queue.dead_letter_closed() {
                return Err(MessagingError::dangling_dead_letter(
                    &queue.name,
                    queue.dead_letter_routing_key.as_deref().unwrap_or(""),
                ));
            }

            queues.insert(alias.clone(), Arc::new(queue));
        }
        Ok(queues)
    }

    fn build_publishers(
        &self,
        pool: &Arc<ConnectionPool>,
        exchanges: &HashMap<String, Arc<Exchange>>,
        queues: &HashMap<String, Arc<Queue>>,
    ) -> Result<HashMap<String, Arc<Publisher>>, MessagingError> {
        let mut publishers = HashMap::new();
        for (alias, config) in &self.config.publishers {
            // Exchanges shadow queues on alias collision, deliberately
            let target = if let Some(exchange) = exchanges.get(&config.target) {
                BindTarget::Exchange(exchange.clone())
            } else if let Some(queue) = queues.get(&config.target) {
                BindTarget::Queue(queue.clone())
            } else {
                return Err(MessagingError::undefined_bind_target(alias, &config.target));
            };

            publishers.insert(
                alias.clone(),
                Arc::new(Publisher::new(
                    alias.clone(),
                    target,
                    config.default_priority,
                    pool.clone(),
                )),
            );
        }
        Ok(publishers)
    }

    fn build_consumers(
        &self,
        pool: &Arc<ConnectionPool>,
        queues: &HashMap<String, Arc<Queue>>,
    ) -> Result<HashMap<String, Arc<Consumer>>, MessagingError> {
        let mut consumers = HashMap::new();
        for (alias, config) in &self.config.consumers {
            let queue = queues
                .get(&config.queue)
                .ok_or_else(|| MessagingError::undefined_bind_target(alias, &config.queue))?
                .clone();

            let processor = self.processors.get(&config.processor)?;

            consumers.insert(
                alias.clone(),
                Arc::new(Consumer::new(
                    alias.clone(),
                    queue,
                    config.prefetch_count,
                    Duration::from_secs(config.idle_ttl),
                    processor,
                    pool.clone(),
                )),
            );
        }
        Ok(consumers)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{
        ConnectionConfig, ConsumerConfig, ExchangeBindConfig, ExchangeConfig, ExchangeKindConfig,
        PublisherConfig, QueueConfig,
    };

    use super::*;

    fn base_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config
            .connections
            .insert("default".to_string(), ConnectionConfig::default());
        config.queues.insert(
            "orders".to_string(),
            QueueConfig {
                connection: "default".to_string(),
                name: "app.orders".to_string(),
                durable: true,
                auto_delete: false,
                binds: vec![],
                max_priority: None,
                dead_letter_exchange: None,
                dead_letter_routing_key: None,
                retry_queue: None,
            },
        );
        config.exchanges.insert(
            "events".to_string(),
            ExchangeConfig {
                connection: "default".to_string(),
                name: "app.events".to_string(),
                kind: ExchangeKindConfig::Topic,
                durable: true,
                auto_delete: false,
                passive: false,
                binds: vec![],
            },
        );
        config
    }

    fn build(config: &EngineConfig) -> Result<TopologyRegistry, MessagingError> {
        let processors = ProcessorRegistry::with_builtins();
        EntityBuilder::new(config, &processors).build()
    }

    #[test]
    fn builds_registry_from_valid_config() {
        let mut config = base_config();
        config.publishers.insert(
            "order_publisher".to_string(),
            PublisherConfig {
                target: "orders".to_string(),
                default_priority: 2,
            },
        );
        config.consumers.insert(
            "order_consumer".to_string(),
            ConsumerConfig {
                queue: "orders".to_string(),
                prefetch_count: 5,
                idle_ttl: 10,
                processor: "log".to_string(),
                options: Default::default(),
            },
        );

        let registry = build(&config).unwrap();
        assert!(registry.publisher("order_publisher").is_ok());
        assert!(registry.consumer("order_consumer").is_ok());
        assert!(registry.publisher("missing").is_err());
    }

    #[test]
    fn publisher_with_undefined_target_fails_build() {
        let mut config = base_config();
        config.publishers.insert(
            "bad".to_string(),
            PublisherConfig {
                target: "no_such_entity".to_string(),
                default_priority: 0,
            },
        );

        let err = build(&config).unwrap_err();
        assert!(matches!(
            err,
            MessagingError::UndefinedBindTarget { ref owner, ref target }
                if owner == "bad" && target == "no_such_entity"
        ));
    }

    #[test]
    fn exchange_with_undefined_connection_fails_build() {
        let mut config = base_config();
        config.exchanges.insert(
            "orphan".to_string(),
            ExchangeConfig {
                connection: "no_such_connection".to_string(),
                name: "x".to_string(),
                kind: ExchangeKindConfig::Direct,
                durable: true,
                auto_delete: false,
                passive: false,
                binds: vec![],
            },
        );

        let err = build(&config).unwrap_err();
        assert!(matches!(err, MessagingError::UndefinedConnection { .. }));
    }

    #[test]
    fn exchange_bind_to_unknown_queue_fails_build() {
        let mut config = base_config();
        config.exchanges.get_mut("events").unwrap().binds = vec![ExchangeBindConfig {
            queue: "ghost_queue".to_string(),
            routing_key: "#".to_string(),
        }];

        assert!(build(&config).is_err());
    }

    #[test]
    fn alias_collision_resolves_to_exchange() {
        let mut config = base_config();
        // A queue and an exchange sharing the alias "shared"
        config.exchanges.insert(
            "shared".to_string(),
            ExchangeConfig {
                connection: "default".to_string(),
                name: "app.shared.exchange".to_string(),
                kind: ExchangeKindConfig::Direct,
                durable: true,
                auto_delete: false,
                passive: false,
                binds: vec![],
            },
        );
        config.queues.insert(
            "shared".to_string(),
            QueueConfig {
                connection: "default".to_string(),
                name: "app.shared.queue".to_string(),
                durable: true,
                auto_delete: false,
                binds: vec![],
                max_priority: None,
                dead_letter_exchange: None,
                dead_letter_routing_key: None,
                retry_queue: None,
            },
        );
        config.publishers.insert(
            "collider".to_string(),
            PublisherConfig {
                target: "shared".to_string(),
                default_priority: 0,
            },
        );

        let registry = build(&config).unwrap();
        let publisher = registry.publisher("collider").unwrap();
        assert!(publisher.target().requires_routing_key());
        assert_eq!(publisher.target().publish_route().0, "app.shared.exchange");
    }

    #[test]
    fn open_dead_letter_loop_fails_build() {
        let mut config = base_config();
        config
            .queues
            .get_mut("orders")
            .unwrap()
            .dead_letter_routing_key = Some("unrelated.queue".to_string());

        let err = build(&config).unwrap_err();
        assert!(matches!(err, MessagingError::DanglingDeadLetter { .. }));
    }

    #[test]
    fn consumer_with_unknown_processor_fails_build() {
        let mut config = base_config();
        config.consumers.insert(
            "c".to_string(),
            ConsumerConfig {
                queue: "orders".to_string(),
                prefetch_count: 1,
                idle_ttl: 1,
                processor: "unregistered".to_string(),
                options: Default::default(),
            },
        );

        let err = build(&config).unwrap_err();
        assert!(matches!(err, MessagingError::UnknownProcessor { .. }));
    }
}
