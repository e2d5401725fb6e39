//! Persistent key/value store behind every OAuth entity.
//!
//! The gateway itself holds no state between requests: clients, pending
//! authorizations, codes, tokens and the per-user token index all live here.
//! Expiry is delegated to the backend through per-key TTLs.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreResult;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Key layout shared by all backends.
pub mod keys {
    pub fn client(client_id: &str) -> String {
        format!("oauth:client:{client_id}")
    }

    pub fn state(state: &str) -> String {
        format!("oauth:state:{state}")
    }

    pub fn code(code: &str) -> String {
        format!("oauth:code:{code}")
    }

    pub fn token(jti: &str) -> String {
        format!("oauth:token:{jti}")
    }

    pub fn refresh(token: &str) -> String {
        format!("oauth:refresh:{token}")
    }

    pub fn user_tokens(username: &str) -> String {
        format!("oauth:user_tokens:{username}")
    }
}

/// Minimal KV + set store with TTL and atomic consumption.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, replacing any previous one. `None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically read and delete a key.
    ///
    /// Of any number of concurrent callers, at most one observes the value.
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Set a TTL on an existing key. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining TTL. `None` if the key is missing or never expires.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Health check.
    async fn ping(&self) -> StoreResult<()>;
}

impl dyn Store {
    /// Read and deserialize a JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a JSON value.
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, ttl).await
    }

    /// Atomically read, delete and deserialize a JSON value.
    pub async fn take_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.take(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Convert a lifetime into a store TTL. Zero means "never expires".
#[must_use]
pub fn ttl_for(lifetime: Duration) -> Option<Duration> {
    if lifetime.is_zero() { None } else { Some(lifetime) }
}
