//! Redis pub/sub implementation of [`CoordinationBus`]

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::{
    bus::{CoordinationBus, MessageStream},
    error::{MeshError, MeshResult},
    message::{BusMessage, Topic},
};

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of connections in the pool
    pub pool_size: usize,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Command timeout in seconds
    pub command_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 4,
            connect_timeout_secs: 2,
            command_timeout_secs: 2,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }
}

/// Coordination bus on Redis pub/sub
///
/// Construction opens no connection, so building one on a cold start is
/// cheap; the first publish, subscribe or ping connects.
pub struct RedisBus {
    pool: deadpool_redis::Pool,
    client: redis::Client,
    config: RedisConfig,
}

impl RedisBus {
    /// Create a bus with default settings for `url`
    pub fn new(url: impl Into<String>) -> MeshResult<Self> {
        Self::with_config(RedisConfig::new(url))
    }

    pub fn with_config(config: RedisConfig) -> MeshResult<Self> {
        let mut pool_config = deadpool_redis::Config::from_url(&config.url);
        pool_config.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size.max(1)));

        let pool = pool_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| MeshError::InvalidConfig(e.to_string()))?;

        // Pub/sub needs a dedicated connection outside the pool
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| MeshError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            pool,
            client,
            config,
        })
    }

    /// Create a bus and verify the server answers
    pub async fn connect(url: impl Into<String>) -> MeshResult<Self> {
        let bus = Self::new(url)?;
        bus.ping().await?;
        debug!("Redis bus connected to {}", bus.config.url);
        Ok(bus)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    async fn get_connection(&self) -> MeshResult<deadpool_redis::Connection> {
        timeout(self.connect_timeout(), self.pool.get())
            .await
            .map_err(|_| MeshError::Timeout(self.connect_timeout()))?
            .map_err(|e| MeshError::ConnectionFailed(e.to_string()))
    }

    /// Build Redis channel name for topic
    fn channel(topic: &Topic) -> String {
        format!("beast:topic:{}", topic)
    }
}

#[async_trait]
impl CoordinationBus for RedisBus {
    async fn publish(&self, topic: &Topic, message: &BusMessage) -> MeshResult<()> {
        let json = message.to_json()?;
        let mut conn = self.get_connection().await?;
        let channel = Self::channel(topic);

        timeout(
            self.command_timeout(),
            conn.publish::<_, _, ()>(&channel, json),
        )
        .await
        .map_err(|_| MeshError::Timeout(self.command_timeout()))?
        .map_err(|e| MeshError::PublishFailed(e.to_string()))?;

        debug!(topic = %topic, kind = message.kind(), "Published to Redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> MeshResult<MessageStream> {
        let channel = Self::channel(topic);

        let mut pubsub = timeout(self.connect_timeout(), self.client.get_async_pubsub())
            .await
            .map_err(|_| MeshError::Timeout(self.connect_timeout()))?
            .map_err(|e| MeshError::ConnectionFailed(e.to_string()))?;

        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| MeshError::SubscribeFailed(e.to_string()))?;

        debug!("Subscribed to Redis channel {}", channel);

        let stream = pubsub.into_on_message().map(|msg| {
            let payload: String = msg.get_payload().map_err(|e| {
                error!("Failed to get message payload: {}", e);
                MeshError::DeserializationFailed(e.to_string())
            })?;

            BusMessage::from_json(&payload)
        });

        Ok(Box::pin(stream))
    }

    async fn ping(&self) -> MeshResult<()> {
        let mut conn = self.get_connection().await?;
        timeout(
            self.command_timeout(),
            redis::cmd("PING").query_async::<String>(&mut *conn),
        )
        .await
        .map_err(|_| MeshError::Timeout(self.command_timeout()))?
        .map_err(|e| MeshError::ConnectionFailed(format!("PING failed: {}", e)))?;
        Ok(())
    }
}
