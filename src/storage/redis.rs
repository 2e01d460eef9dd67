// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis cache backend.
//!
//! Maps the [`CacheStore`] operations onto plain Redis types:
//! - JSON snapshots → STRING with `SET .. EX`
//! - entity mirrors and pending operations → HASH, written with
//!   `MULTI; HSET; EXPIRE; EXEC` so a mirror never exists without a TTL
//! - membership indexes → SET, same MULTI/EXPIRE treatment
//!
//! Pending operation discovery uses `SCAN MATCH`, never `KEYS`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client, RedisError};

use super::traits::{CacheStore, StorageError};
use crate::resilience::retry::{retry, retry_if, RetryConfig};

const SCAN_BATCH: usize = 100;

pub struct RedisCache {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "shop:" → "shop:product:1")
    prefix: String,
}

fn transient(e: &RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

fn backend(e: RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Redis TTLs here are whole seconds; anything shorter becomes one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl RedisCache {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix.
    ///
    /// ```rust,no_run
    /// # use shop_cache::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys become "shop:product:1", "shop:store:all", ...
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("shop:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(backend)?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(backend)?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Round-trip PING, checked once at engine startup.
    pub async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING").query_async(&mut conn).await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_if("redis_get", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let value: Option<String> = cmd("GET").arg(&key).query_async(&mut conn).await?;
                Ok(value)
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);
        let secs = ttl_secs(ttl);

        retry_if("redis_set", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let _: () = cmd("SET")
                    .arg(&key)
                    .arg(value)
                    .arg("EX")
                    .arg(secs)
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_if("redis_del", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let _: i64 = cmd("DEL").arg(&key).query_async(&mut conn).await?;
                Ok(())
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_if("redis_hget", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let value: Option<String> = cmd("HGET").arg(&key).arg(field).query_async(&mut conn).await?;
                Ok(value)
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_if("redis_hgetall", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let fields: HashMap<String, String> = cmd("HGETALL").arg(&key).query_async(&mut conn).await?;
                Ok(fields)
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StorageError> {
        if fields.is_empty() {
            return Ok(());
        }
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);
        let secs = ttl_secs(ttl);

        retry_if("redis_hset", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let mut pipeline = pipe();
                pipeline.atomic();
                let hset = pipeline.cmd("HSET").arg(&key);
                for (field, value) in fields {
                    hset.arg(*field).arg(value.as_str());
                }
                hset.ignore();
                pipeline.cmd("EXPIRE").arg(&key).arg(secs).ignore();
                pipeline.query_async::<()>(&mut conn).await?;
                Ok(())
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> Result<(), StorageError> {
        if members.is_empty() {
            return Ok(());
        }
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);
        let secs = ttl_secs(ttl);

        retry_if("redis_sadd", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let mut pipeline = pipe();
                pipeline.atomic();
                pipeline.cmd("SADD").arg(&key).arg(members).ignore();
                pipeline.cmd("EXPIRE").arg(&key).arg(secs).ignore();
                pipeline.query_async::<()>(&mut conn).await?;
                Ok(())
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_if("redis_srem", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let _: i64 = cmd("SREM").arg(&key).arg(member).query_async(&mut conn).await?;
                Ok(())
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.connection.clone();
        let key = self.prefixed_key(key);

        retry_if("redis_smembers", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let key = key.clone();
            async move {
                let members: Vec<String> = cmd("SMEMBERS").arg(&key).query_async(&mut conn).await?;
                Ok(members)
            }
        }, transient)
        .await
        .map_err(backend)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", self.prefixed_key(prefix));

        let mut keys: Vec<String> = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to scan '{}': {}", pattern, e)))?;

            keys.extend(batch.iter().map(|k| self.strip_prefix(k).to_string()));
            cursor = next_cursor;

            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once across iterations
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// One pipelined round trip of HGETALLs.
    async fn hash_get_all_many(
        &self,
        keys: &[String],
    ) -> Result<Vec<HashMap<String, String>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connection.clone();
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();

        retry_if("redis_hgetall_many", &RetryConfig::query(), || {
            let mut conn = conn.clone();
            let prefixed = prefixed.clone();
            async move {
                let mut pipeline = pipe();
                for key in &prefixed {
                    pipeline.cmd("HGETALL").arg(key);
                }
                let results: Vec<HashMap<String, String>> = pipeline.query_async(&mut conn).await?;
                Ok(results)
            }
        }, transient)
        .await
        .map_err(backend)
    }
}
