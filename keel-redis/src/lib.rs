//! # Keel Redis
//!
//! Redis client integration for the Keel cache: configuration and connection
//! establishment for single-node and cluster deployments.
//!
//! Each consumer owns exactly one logical connection for its lifetime; there
//! is no pooling at this layer. Single-node mode hands out a
//! [`redis::aio::ConnectionManager`] (which reconnects transparently),
//! cluster mode a [`redis::cluster_async::ClusterConnection`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_redis::{RedisConfig, connect_single};
//!
//! let config = RedisConfig::builder()
//!     .host("localhost")
//!     .port(6379)
//!     .password("s3cret")
//!     .database(1)
//!     .build();
//!
//! let conn = connect_single(&config).await?;
//! ```

mod config;
mod error;

pub use config::{ClusterStrategy, RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};

use redis::aio::ConnectionManager;
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::cluster_read_routing::RandomReplicaStrategy;
use tracing::{debug, warn};

// Re-export redis crate for consumers issuing raw commands.
pub use redis;

/// Connect to a single Redis node.
///
/// The connection URL encodes addressing (TCP or unix socket), credentials
/// and database selection; the client performs connect, AUTH and SELECT in
/// that order during the handshake. A failure at any step surfaces here and
/// the caller gets no connection.
pub async fn connect_single(config: &RedisConfig) -> Result<ConnectionManager> {
    let url = config.connection_url();
    let client = redis::Client::open(url.as_str())
        .map_err(|e| RedisError::Config(e.to_string()))?;

    let manager = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    debug!(host = %config.host, port = config.port, db = ?config.database, "Connected to Redis");
    Ok(manager)
}

/// Connect to a Redis cluster.
///
/// Seed nodes come from [`RedisConfig::cluster_nodes`]; the client discovers
/// the rest of the topology itself. Replica read distribution is a
/// connection-time option derived from the configured [`ClusterStrategy`],
/// never a per-call one.
pub async fn connect_cluster(config: &RedisConfig) -> Result<ClusterConnection> {
    if config.cluster_nodes.is_empty() {
        return Err(RedisError::Config("no cluster nodes configured".into()));
    }

    let mut builder = ClusterClientBuilder::new(config.cluster_urls());

    if let Some(password) = &config.password {
        builder = builder.password(password.clone());
    }
    if let Some(username) = &config.username {
        builder = builder.username(username.clone());
    }
    if config.strategy.reads_from_replicas() {
        builder = builder.read_routing_strategy(RandomReplicaStrategy);
    }

    let client = builder
        .build()
        .map_err(|e| RedisError::Cluster(e.to_string()))?;

    let conn = tokio::time::timeout(config.connect_timeout, client.get_async_connection())
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| {
            warn!(nodes = ?config.cluster_nodes, "Cluster connection failed: {e}");
            RedisError::Cluster(e.to_string())
        })?;

    debug!(nodes = ?config.cluster_nodes, strategy = ?config.strategy, "Connected to Redis cluster");
    Ok(conn)
}

/// Prelude for common imports.
pub mod prelude {
    pub use crate::config::{ClusterStrategy, RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::{connect_cluster, connect_single};
    pub use redis::AsyncCommands;
}
