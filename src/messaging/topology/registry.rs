//! # Topology Registry
//!
//! In-memory directory mapping human-readable aliases to publishers and
//! consumers. Built exactly once per process by the entity builder and
//! immutable afterwards; shared by reference within the process. Worker
//! processes each rebuild their own registry from the same configuration
//! snapshot, never sharing broker connections across process boundaries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::messaging::consumer::Consumer;
use crate::messaging::pool::ConnectionPool;
use crate::messaging::publisher::Publisher;
use crate::messaging::MessagingError;

/// Immutable directory of publishers and consumers, keyed by alias
pub struct TopologyRegistry {
    pool: Arc<ConnectionPool>,
    publishers: HashMap<String, Arc<Publisher>>,
    consumers: HashMap<String, Arc<Consumer>>,
}

impl TopologyRegistry {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        publishers: HashMap<String, Arc<Publisher>>,
        consumers: HashMap<String, Arc<Consumer>>,
    ) -> Self {
        Self {
            pool,
            publishers,
            consumers,
        }
    }

    /// Look up a publisher by alias
    pub fn publisher(&self, alias: &str) -> Result<Arc<Publisher>, MessagingError> {
        self.publishers
            .get(alias)
            .cloned()
            .ok_or_else(|| MessagingError::unknown_alias("publisher", alias))
    }

    /// Look up a consumer by alias
    pub fn consumer(&self, alias: &str) -> Result<Arc<Consumer>, MessagingError> {
        self.consumers
            .get(alias)
            .cloned()
            .ok_or_else(|| MessagingError::unknown_alias("consumer", alias))
    }

    pub fn publisher_aliases(&self) -> impl Iterator<Item = &str> {
        self.publishers.keys().map(String::as_str)
    }

    pub fn consumer_aliases(&self) -> impl Iterator<Item = &str> {
        self.consumers.keys().map(String::as_str)
    }

    /// The connection pool backing this registry's entities
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Open every connection configured as eager
    pub async fn open_eager(&self) -> Result<(), MessagingError> {
        self.pool.open_eager().await
    }
}

impl std::fmt::Debug for TopologyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyRegistry")
            .field("publishers", &self.publishers.keys().collect::<Vec<_>>())
            .field("consumers", &self.consumers.keys().collect::<Vec<_>>())
            .finish()
    }
}
