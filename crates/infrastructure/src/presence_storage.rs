//! Redis 在线状态缓存
//!
//! 每个在线用户一个带 `EX` 过期的键，是否在线只看键是否存在。

use std::time::Duration;

use application::{ApplicationError, TtlCache};
use async_trait::async_trait;
use domain::RepositoryError;
use redis::{aio::ConnectionManager, AsyncCommands, Client};

fn map_redis_err(err: redis::RedisError) -> ApplicationError {
    if err.is_timeout() || err.is_io_error() || err.is_connection_dropped() {
        RepositoryError::transient(err.to_string()).into()
    } else {
        ApplicationError::infrastructure_with_source("redis command failed", err)
    }
}

/// 基于 `ConnectionManager` 的 TTL 缓存，断线后自动重连
#[derive(Clone)]
pub struct RedisTtlCache {
    connection: ConnectionManager,
}

impl RedisTtlCache {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("redis presence cache connected");
        Ok(Self { connection })
    }

    pub fn from_manager(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl TtlCache for RedisTtlCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        // EX 以秒为单位，不足一秒按一秒算
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(map_redis_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ApplicationError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(map_redis_err)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, ApplicationError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        redis::cmd("MGET")
            .arg(keys)
            .query_async::<Vec<Option<String>>>(&mut conn)
            .await
            .map_err(map_redis_err)
    }

    async fn delete(&self, key: &str) -> Result<(), ApplicationError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(map_redis_err)
    }
}
