//! Redis-backed store for multi-instance deployments.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};

use super::Store;
use crate::error::StoreResult;

/// Connection attempts before giving up at startup.
const CONNECT_RETRIES: u32 = 5;
/// First retry delay; doubles up to `MAX_RETRY_DELAY`.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Redis store using a `ConnectionManager` for automatic reconnection.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or every attempt fails.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(5))
            .set_response_timeout(Duration::from_secs(5))
            .set_number_of_retries(3);

        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match ConnectionManager::new_with_config(client.clone(), config.clone()).await {
                Ok(manager) => {
                    tracing::info!(attempt, "Connected to Redis");
                    return Ok(Self { manager });
                }
                Err(e) if attempt < CONNECT_RETRIES => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = CONNECT_RETRIES + 1,
                        error = %e,
                        "Redis connection failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn();
        match ttl {
            // SET EX rejects 0, round sub-second TTLs up
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed: u64 = self.conn().del(key).await?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        // GETDEL is atomic: a consumed key is gone for every other caller
        let value: Option<String> =
            redis::cmd("GETDEL").arg(key).query_async(&mut self.conn()).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.conn().exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        Ok(self.conn().expire(key, secs).await?)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        // -2 = missing, -1 = no expiry
        let secs: i64 = self.conn().ttl(key).await?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.conn().sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.conn().srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn().smembers(key).await?)
    }

    async fn ping(&self) -> StoreResult<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

#[cfg(all(test, feature = "redis-tests"))]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("oauth:test:{}", uuid::Uuid::new_v4());

        store.set(&key, "payload".into(), Some(Duration::from_secs(30))).await.unwrap();
        assert_eq!(store.take(&key).await.unwrap().as_deref(), Some("payload"));
        assert!(store.take(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_reporting() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("oauth:test:{}", uuid::Uuid::new_v4());

        store.set(&key, "v".into(), None).await.unwrap();
        assert!(store.ttl(&key).await.unwrap().is_none());
        assert!(store.expire(&key, Duration::from_secs(30)).await.unwrap());
        assert!(store.ttl(&key).await.unwrap().is_some());
        assert!(store.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_sets() {
        let store = RedisStore::connect(&redis_url()).await.unwrap();
        let key = format!("oauth:test:{}", uuid::Uuid::new_v4());

        store.set_add(&key, "a").await.unwrap();
        store.set_add(&key, "b").await.unwrap();
        store.set_remove(&key, "a").await.unwrap();
        assert_eq!(store.set_members(&key).await.unwrap(), vec!["b".to_string()]);
        store.delete(&key).await.unwrap();
    }
}
