//! # Connection Pool
//!
//! Owns the logical broker connections declared in configuration and hands out
//! channels keyed by purpose. Connections open lazily on first use unless the
//! configuration marks them eager; a reconnect discards every channel derived
//! from the old network connection.
//!
//! Channels are never shared across OS-process boundaries. Each worker process
//! builds its own pool from the same configuration snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;

use super::MessagingError;

/// What a channel is used for; one live channel is cached per purpose
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelPurpose {
    /// Publisher channel, one per publisher alias
    Publisher(String),
    /// The consumer channel
    Consumer(String),
    /// Declares and passive queue inspection
    Topology,
}

struct ConnectionSlot {
    config: ConnectionConfig,
    connection: RwLock<Option<Connection>>,
    channels: RwLock<HashMap<ChannelPurpose, Channel>>,
}

/// Pool of logical broker connections, keyed by alias
pub struct ConnectionPool {
    slots: HashMap<String, Arc<ConnectionSlot>>,
}

impl ConnectionPool {
    /// Build the pool from configuration; performs no network I/O
    pub fn from_config(connections: &HashMap<String, ConnectionConfig>) -> Self {
        let slots = connections
            .iter()
            .map(|(alias, config)| {
                (
                    alias.clone(),
                    Arc::new(ConnectionSlot {
                        config: config.clone(),
                        connection: RwLock::new(None),
                        channels: RwLock::new(HashMap::new()),
                    }),
                )
            })
            .collect();
        Self { slots }
    }

    /// Aliases of all configured connections
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Whether a connection alias is configured
    pub fn contains(&self, alias: &str) -> bool {
        self.slots.contains_key(alias)
    }

    /// Reuse the open connection for an alias, dialing if necessary
    pub async fn ensure_connection(&self, alias: &str) -> Result<(), MessagingError> {
        let slot = self
            .slots
            .get(alias)
            .ok_or_else(|| MessagingError::undefined_connection(alias))?;
        ensure_connected(alias, slot).await
    }

    /// Open every connection configured as eager (`lazy = false`)
    pub async fn open_eager(&self) -> Result<(), MessagingError> {
        for (alias, slot) in &self.slots {
            if !slot.config.lazy {
                ensure_connected(alias, slot).await?;
            }
        }
        Ok(())
    }

    /// Get a live channel for the given connection and purpose
    ///
    /// Reuses the cached channel while the underlying connection reports
    /// connected and the channel reports open; otherwise opens a fresh one.
    pub async fn get_channel(
        &self,
        alias: &str,
        purpose: ChannelPurpose,
    ) -> Result<Channel, MessagingError> {
        let slot = self
            .slots
            .get(alias)
            .ok_or_else(|| MessagingError::undefined_connection(alias))?;

        {
            let channels = slot.channels.read().await;
            if let Some(channel) = channels.get(&purpose) {
                let connected = {
                    let connection = slot.connection.read().await;
                    connection
                        .as_ref()
                        .map(|c| c.status().connected())
                        .unwrap_or(false)
                };
                if connected && channel.status().connected() {
                    return Ok(channel.clone());
                }
            }
        }

        ensure_connected(alias, slot).await?;

        let channel = {
            let connection = slot.connection.read().await;
            let connection = connection.as_ref().ok_or_else(|| {
                MessagingError::broker_unavailable(alias, "connection closed while opening channel")
            })?;
            connection.create_channel().await.map_err(|e| {
                MessagingError::broker_unavailable(alias, format!("channel creation failed: {e}"))
            })?
        };

        debug!(
            connection = alias,
            purpose = ?purpose,
            channel_id = channel.id(),
            "opened broker channel"
        );

        let mut channels = slot.channels.write().await;
        channels.insert(purpose, channel.clone());
        Ok(channel)
    }

    /// Discard cached channels and redial the network connection
    pub async fn reconnect(&self, alias: &str) -> Result<(), MessagingError> {
        let slot = self
            .slots
            .get(alias)
            .ok_or_else(|| MessagingError::undefined_connection(alias))?;

        {
            let mut channels = slot.channels.write().await;
            for (purpose, channel) in channels.drain() {
                if channel.status().connected() {
                    if let Err(e) = channel.close(200, "reconnect").await {
                        warn!(
                            connection = alias,
                            purpose = ?purpose,
                            error = %e,
                            "channel close failed during reconnect"
                        );
                    }
                }
            }
        }

        {
            let mut connection = slot.connection.write().await;
            if let Some(old) = connection.take() {
                if let Err(e) = old.close(200, "reconnect").await {
                    warn!(connection = alias, error = %e, "connection close failed during reconnect");
                }
            }
        }

        ensure_connected(alias, slot).await?;
        info!(connection = alias, "broker connection re-established");
        Ok(())
    }
}

async fn ensure_connected(alias: &str, slot: &ConnectionSlot) -> Result<(), MessagingError> {
    {
        let connection = slot.connection.read().await;
        if let Some(existing) = connection.as_ref() {
            if existing.status().connected() {
                return Ok(());
            }
        }
    }

    let mut guard = slot.connection.write().await;
    // Another task may have dialed while we waited for the write lock
    if let Some(existing) = guard.as_ref() {
        if existing.status().connected() {
            return Ok(());
        }
    }

    let uri = slot.config.amqp_uri();
    let connection = Connection::connect(
        &uri,
        ConnectionProperties::default().with_connection_name(format!("relay-{alias}").into()),
    )
    .await
    .map_err(|e| MessagingError::broker_unavailable(alias, format!("dial failed: {e}")))?;

    info!(
        connection = alias,
        uri = %slot.config.redacted_uri(),
        "broker connection opened"
    );

    *guard = Some(connection);
    Ok(())
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("aliases", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(aliases: &[&str]) -> ConnectionPool {
        let connections = aliases
            .iter()
            .map(|a| (a.to_string(), ConnectionConfig::default()))
            .collect();
        ConnectionPool::from_config(&connections)
    }

    #[test]
    fn from_config_registers_aliases_without_io() {
        let pool = pool_with(&["default", "secondary"]);
        assert!(pool.contains("default"));
        assert!(pool.contains("secondary"));
        assert!(!pool.contains("missing"));
    }

    #[tokio::test]
    async fn get_channel_rejects_undefined_alias() {
        let pool = pool_with(&["default"]);
        let err = pool
            .get_channel("missing", ChannelPurpose::Topology)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MessagingError::UndefinedConnection { ref alias } if alias == "missing"
        ));
    }

    #[tokio::test]
    async fn reconnect_rejects_undefined_alias() {
        let pool = pool_with(&[]);
        assert!(pool.reconnect("missing").await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires RabbitMQ running"]
    async fn channel_is_cached_per_purpose() {
        let pool = pool_with(&["default"]);
        let first = pool
            .get_channel("default", ChannelPurpose::Topology)
            .await
            .unwrap();
        let second = pool
            .get_channel("default", ChannelPurpose::Topology)
            .await
            .unwrap();
        assert_eq!(first.id(), second.id());

        let publisher = pool
            .get_channel("default", ChannelPurpose::Publisher("p".into()))
            .await
            .unwrap();
        assert_ne!(first.id(), publisher.id());
    }
}
