use std::time::Duration;

use async_trait::async_trait;
use orderhub_core::repository::{order_key, CacheError, OrderCache};
use orderhub_shared::Order;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{error, info, warn};

use crate::app_config::RedisConfig;

fn backend(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

/// Redis-backed order cache. Snapshots are stored as JSON under
/// `order:{order_uid}` with a fixed TTL.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    ttl_seconds: u64,
}

impl RedisClient {
    pub fn new(connection_string: &str, ttl_seconds: u64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client, ttl_seconds })
    }

    /// Opens the client and pings until Redis answers, up to
    /// `connect_attempts` times with `connect_backoff_ms` between tries.
    pub async fn connect(config: &RedisConfig) -> Result<Self, redis::RedisError> {
        let redis = Self::new(&config.url, config.ttl_seconds)?;
        let backoff = Duration::from_millis(config.connect_backoff_ms);

        let mut attempt = 1;
        loop {
            match redis.ping().await {
                Ok(()) => {
                    info!("Connected to Redis on attempt {}", attempt);
                    return Ok(redis);
                }
                Err(e) if attempt < config.connect_attempts => {
                    warn!(
                        "Redis not reachable (attempt {}/{}): {}",
                        attempt, config.connect_attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!("Giving up on Redis after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl OrderCache for RedisClient {
    async fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError> {
        let mut conn = self.connection().await.map_err(backend)?;
        let raw: Option<String> = conn.get(order_key(order_uid)).await.map_err(backend)?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(order) => Ok(Some(order)),
            Err(e) => {
                warn!("Discarding undecodable cache entry for {}: {}", order_uid, e);
                Ok(None)
            }
        }
    }

    async fn set_many(&self, orders: &[Order]) -> usize {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to Redis for cache write: {}", e);
                return 0;
            }
        };

        let mut stored = 0;
        for order in orders {
            let payload = match serde_json::to_string(order) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to encode order {} for cache: {}", order.order_uid, e);
                    continue;
                }
            };
            match conn
                .set_ex::<_, _, ()>(order_key(&order.order_uid), payload, self.ttl_seconds)
                .await
            {
                Ok(()) => stored += 1,
                Err(e) => error!("Failed to cache order {}: {}", order.order_uid, e),
            }
        }
        stored
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await.map_err(backend)?;
        conn.keys(pattern).await.map_err(backend)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await.map_err(backend)?;
        conn.del::<_, ()>(key).await.map_err(backend)
    }

    async fn health(&self) -> Result<(), CacheError> {
        self.ping().await.map_err(backend)
    }
}
