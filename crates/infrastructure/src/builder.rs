use std::sync::Arc;

use config::{AppConfig, PresenceBackend};
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    presence_storage::RedisTtlCache,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 已连接的外部存储
#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
    /// 只有配置了 Redis 在线状态后端时才连接
    pub presence_cache: Option<Arc<RedisTtlCache>>,
}

impl Infrastructure {
    /// 连接 Postgres 并执行迁移，按需连接 Redis
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(
            max_connections = config.database.max_connections,
            "postgres storage ready"
        );

        let presence_cache = match config.presence.backend {
            PresenceBackend::Redis => Some(Arc::new(Self::connect_presence(config).await?)),
            PresenceBackend::Memory => None,
        };

        Ok(Self {
            storage: Arc::new(PgStorage::new(pool)),
            presence_cache,
        })
    }

    pub async fn connect_presence(config: &AppConfig) -> Result<RedisTtlCache, InfrastructureError> {
        Ok(RedisTtlCache::connect(&config.redis.url).await?)
    }
}
