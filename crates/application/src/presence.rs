use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{Timestamp, UserId};
use tokio::sync::RwLock;

use crate::{clock::Clock, error::ApplicationError};

const ONLINE: &str = "1";

/// 带过期时间的键值缓存
///
/// 过期由缓存自身淘汰完成，调用方不做清扫。
#[async_trait]
pub trait TtlCache: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApplicationError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ApplicationError>;
    /// 结果与 `keys` 一一对应
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, ApplicationError>;
    async fn delete(&self, key: &str) -> Result<(), ApplicationError>;
}

/// 在线状态跟踪器，只存在于 TTL 缓存中，不持久化
#[derive(Clone)]
pub struct PresenceTracker {
    cache: Arc<dyn TtlCache>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(cache: Arc<dyn TtlCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn from_config(cache: Arc<dyn TtlCache>, config: &config::PresenceConfig) -> Self {
        Self::new(cache, Duration::from_secs(config.ttl_seconds))
    }

    fn key(user_id: &UserId) -> String {
        format!("presence:{user_id}")
    }

    /// 每次调用都刷新 TTL
    pub async fn mark_online(&self, user_id: &UserId) -> Result<(), ApplicationError> {
        self.cache.put(&Self::key(user_id), ONLINE, self.ttl).await?;
        tracing::debug!(user_id = %user_id, ttl_secs = self.ttl.as_secs(), "user online");
        Ok(())
    }

    pub async fn mark_offline(&self, user_id: &UserId) -> Result<(), ApplicationError> {
        self.cache.delete(&Self::key(user_id)).await?;
        tracing::debug!(user_id = %user_id, "user offline");
        Ok(())
    }

    pub async fn is_online(&self, user_id: &UserId) -> Result<bool, ApplicationError> {
        Ok(self.cache.get(&Self::key(user_id)).await?.is_some())
    }

    /// 一次批量读取，避免渲染成员列表时逐个查询
    pub async fn batch_status(
        &self,
        user_ids: &[UserId],
    ) -> Result<BTreeMap<UserId, bool>, ApplicationError> {
        if user_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let keys: Vec<String> = user_ids.iter().map(Self::key).collect();
        let values = self.cache.get_many(&keys).await?;

        Ok(user_ids
            .iter()
            .cloned()
            .zip(values.into_iter().map(|value| value.is_some()))
            .collect())
    }
}

/// 进程内 TTL 缓存，过期时间由注入的时钟判定
pub struct MemoryTtlCache {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, (String, Timestamp)>>,
}

impl MemoryTtlCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn live(&self, entry: Option<&(String, Timestamp)>, now: Timestamp) -> Option<String> {
        entry
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone())
    }
}

#[async_trait]
impl TtlCache for MemoryTtlCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApplicationError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ApplicationError::infrastructure_with_source("invalid ttl", e))?;
        let expires_at = self.clock.now() + ttl;

        let mut entries = self.entries.write().await;
        let now = self.clock.now();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_owned(), (value.to_owned(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ApplicationError> {
        let entries = self.entries.read().await;
        Ok(self.live(entries.get(key), self.clock.now()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, ApplicationError> {
        let entries = self.entries.read().await;
        let now = self.clock.now();
        Ok(keys
            .iter()
            .map(|key| self.live(entries.get(key), now))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), ApplicationError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn uid(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn tracker(clock: Arc<ManualClock>) -> PresenceTracker {
        PresenceTracker::new(
            Arc::new(MemoryTtlCache::new(clock)),
            Duration::from_secs(30 * 60),
        )
    }

    #[tokio::test]
    async fn online_entry_expires_with_ttl() {
        let clock = Arc::new(ManualClock::default());
        let presence = tracker(clock.clone());

        presence.mark_online(&uid("1")).await.unwrap();
        assert!(presence.is_online(&uid("1")).await.unwrap());

        clock.advance(Duration::from_secs(29 * 60));
        assert!(presence.is_online(&uid("1")).await.unwrap());

        clock.advance(Duration::from_secs(2 * 60));
        assert!(!presence.is_online(&uid("1")).await.unwrap());
    }

    #[tokio::test]
    async fn mark_online_refreshes_ttl() {
        let clock = Arc::new(ManualClock::default());
        let presence = tracker(clock.clone());

        presence.mark_online(&uid("1")).await.unwrap();
        clock.advance(Duration::from_secs(20 * 60));
        presence.mark_online(&uid("1")).await.unwrap();
        clock.advance(Duration::from_secs(20 * 60));
        assert!(presence.is_online(&uid("1")).await.unwrap());
    }

    #[tokio::test]
    async fn offline_is_immediate() {
        let presence = tracker(Arc::new(ManualClock::default()));
        presence.mark_online(&uid("1")).await.unwrap();
        presence.mark_offline(&uid("1")).await.unwrap();
        assert!(!presence.is_online(&uid("1")).await.unwrap());
    }

    #[tokio::test]
    async fn batch_status_covers_every_requested_user() {
        let presence = tracker(Arc::new(ManualClock::default()));
        presence.mark_online(&uid("1")).await.unwrap();

        let status = presence
            .batch_status(&[uid("1"), uid("2")])
            .await
            .unwrap();
        assert_eq!(status.get(&uid("1")), Some(&true));
        assert_eq!(status.get(&uid("2")), Some(&false));
    }
}
