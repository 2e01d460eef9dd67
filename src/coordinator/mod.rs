// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shop coordinator.
//!
//! The [`ShopCoordinator`] sits between request handlers and the two stores:
//! - reads are cache-aside: cache first, durable store on any miss, then
//!   the cache is repopulated
//! - product and cart item writes go through to their hash mirrors
//! - store writes and deletes invalidate the JSON snapshots they affect
//! - registration and payment enqueue a pending notification
//!
//! The durable write is the commit point. Cache failures after it are
//! handled per [`CacheWritePolicy`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shop_cache::{ShopCacheConfig, ShopCoordinator};
//! use shop_cache::model::NewProduct;
//! use shop_cache::storage::memory::InMemoryCache;
//! use shop_cache::storage::sql::SqlStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ShopCacheConfig::default();
//! let sql = SqlStore::new("sqlite:shop.db?mode=rwc").await?;
//! let shop = ShopCoordinator::new(Arc::new(InMemoryCache::new()), Arc::new(sql), &config);
//!
//! let store = shop.create_store(1, "corner shop").await?;
//! let product = shop
//!     .create_product(1, NewProduct { store_id: store.id, name: "tea".into(), stock: 5 })
//!     .await?;
//!
//! let read = shop.product(product.id).await?;
//! println!("{} served from {}", read.value.name, read.source);
//! # Ok(())
//! # }
//! ```

mod account_api;
mod cart_api;
mod product_api;
mod stock;
mod store_api;
mod types;


pub use types::{Source, Sourced};
use types::Deadline;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CacheWritePolicy, ShopCacheConfig};
use crate::error::{ShopError, ShopResult, ValidationError};
use crate::keys::TtlTable;
use crate::metrics::{self, LatencyTimer};
use crate::pending::{PendingOperation, PendingQueue};
use crate::storage::traits::{CacheStore, DurableStore, StorageError};

/// Bound on the key drop that follows a failed cache write. Independent of
/// the call deadline: it runs after the commit and keeps stale data out.
const REPAIR_TIMEOUT: Duration = Duration::from_secs(1);

/// Caching and consistency layer over the durable store.
///
/// # Thread Safety
///
/// `Send + Sync`; share one instance behind an `Arc`. No entity-level locks
/// are taken: concurrent writes to the same key are last-write-wins at the
/// cache.
pub struct ShopCoordinator {
    cache: Arc<dyn CacheStore>,
    durable: Arc<dyn DurableStore>,
    queue: PendingQueue,
    ttl: TtlTable,
    policy: CacheWritePolicy,
    call_timeout: Duration,
    cache_timeout: Duration,
}

impl ShopCoordinator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        durable: Arc<dyn DurableStore>,
        config: &ShopCacheConfig,
    ) -> Self {
        let ttl = config.ttls();
        Self {
            queue: PendingQueue::new(Arc::clone(&cache), ttl.pending),
            cache,
            durable,
            ttl,
            policy: config.cache_write_policy,
            call_timeout: config.call_timeout(),
            cache_timeout: config.cache_timeout(),
        }
    }

    /// The pending queue this coordinator writes to.
    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn ttls(&self) -> &TtlTable {
        &self.ttl
    }

    pub fn cache_write_policy(&self) -> CacheWritePolicy {
        self.policy
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.call_timeout)
    }

    /// Budget for one cache round trip: the configured cap, and never more
    /// than half of what the call has left.
    fn cache_budget(&self, deadline: Deadline) -> Duration {
        self.cache_timeout.min(deadline.remaining() / 2)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bounded backend calls
    // ═══════════════════════════════════════════════════════════════════════

    /// Run a durable call within the deadline. Every failure aborts the
    /// operation.
    async fn durable_call<T>(
        &self,
        deadline: Deadline,
        operation: &'static str,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> ShopResult<T> {
        let _timer = LatencyTimer::new(operation);
        match tokio::time::timeout(deadline.remaining(), call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(operation, error = %e, "Durable store call failed");
                Err(ShopError::Durable(e))
            }
            Err(_) => {
                metrics::record_timeout("durable", operation);
                warn!(operation, "Durable store call exceeded its deadline");
                Err(ShopError::Durable(StorageError::Timeout { operation: operation.to_string() }))
            }
        }
    }

    /// Run a cache call within `budget`, folding an elapsed budget into
    /// [`StorageError::Timeout`].
    async fn cache_call<T>(
        &self,
        budget: Duration,
        operation: &'static str,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout("cache", operation);
                Err(StorageError::Timeout { operation: operation.to_string() })
            }
        }
    }

    /// Apply the cache write policy to a failed post-commit cache write.
    ///
    /// Best effort drops every key in `drop_keys` so the next read goes to
    /// the durable store, then reports success.
    async fn cache_write_failed(
        &self,
        operation: &'static str,
        error: StorageError,
        drop_keys: &[&str],
    ) -> ShopResult<()> {
        metrics::record_cache_write_failure(operation);
        match self.policy {
            CacheWritePolicy::Strict => {
                warn!(operation, error = %error, "Cache write failed");
                Err(ShopError::Cache(error))
            }
            CacheWritePolicy::BestEffort => {
                warn!(operation, error = %error, "Cache write failed, dropping affected keys");
                for key in drop_keys {
                    if let Err(e) = self.cache_call(REPAIR_TIMEOUT, "drop_key", self.cache.delete(key)).await {
                        warn!(key = %key, error = %e, "Failed to drop key after cache write failure");
                    }
                }
                Ok(())
            }
        }
    }

    /// Delete keys after a durable write (write-around invalidation).
    async fn invalidate(&self, deadline: Deadline, keys: &[&str]) -> ShopResult<()> {
        for key in keys {
            if let Err(e) = self
                .cache_call(self.cache_budget(deadline), "invalidate", self.cache.delete(key))
                .await
            {
                self.cache_write_failed("invalidate", e, &[*key]).await?;
            } else {
                debug!(key = %key, "Cache key invalidated");
            }
        }
        Ok(())
    }

    /// Write hash fields after a durable write (write-through).
    async fn write_mirror(
        &self,
        deadline: Deadline,
        operation: &'static str,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> ShopResult<()> {
        match self
            .cache_call(self.cache_budget(deadline), operation, self.cache.hash_set(key, fields, ttl))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => self.cache_write_failed(operation, e, &[key]).await,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Cache-aside helpers for JSON snapshots
    // ═══════════════════════════════════════════════════════════════════════

    /// Decoded snapshot, or `None` on miss, decode failure or cache error.
    async fn read_snapshot<T: DeserializeOwned>(
        &self,
        deadline: Deadline,
        entity: &'static str,
        key: &str,
    ) -> Option<T> {
        match self.cache_call(self.cache_budget(deadline), "get", self.cache.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    metrics::record_cache_lookup(entity, "hit");
                    debug!(key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    metrics::record_cache_lookup(entity, "corrupt");
                    debug!(key = %key, error = %e, "Undecodable snapshot, treating as miss");
                    None
                }
            },
            Ok(None) => {
                metrics::record_cache_lookup(entity, "miss");
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                metrics::record_cache_lookup(entity, "error");
                warn!(key = %key, error = %e, "Cache read failed, falling back to durable store");
                None
            }
        }
    }

    /// Populate a snapshot after a durable read. Failures are logged only:
    /// the read already has its answer.
    async fn store_snapshot<T: Serialize>(
        &self,
        deadline: Deadline,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode snapshot");
                return;
            }
        };
        if let Err(e) = self
            .cache_call(self.cache_budget(deadline), "set", self.cache.set(key, &encoded, ttl))
            .await
        {
            metrics::record_cache_write_failure("populate");
            warn!(key = %key, error = %e, "Failed to populate cache");
        }
    }

    /// Populate a hash mirror after a durable read. Failures are logged only.
    async fn populate_mirror(
        &self,
        deadline: Deadline,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) {
        if let Err(e) = self
            .cache_call(self.cache_budget(deadline), "hash_set", self.cache.hash_set(key, fields, ttl))
            .await
        {
            metrics::record_cache_write_failure("populate");
            warn!(key = %key, error = %e, "Failed to populate cache");
        }
    }

    /// Queue a notification once the durable write has committed. A failure
    /// follows the cache write policy; there is no key to drop.
    async fn enqueue_pending(
        &self,
        deadline: Deadline,
        op: &PendingOperation,
    ) -> ShopResult<()> {
        match self
            .cache_call(self.cache_budget(deadline), "enqueue", self.queue.enqueue(op))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => self.cache_write_failed("enqueue", e, &[]).await,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Shared checks
    // ═══════════════════════════════════════════════════════════════════════

    async fn require_store_admin(
        &self,
        deadline: Deadline,
        user_id: i64,
        store_id: i64,
    ) -> ShopResult<()> {
        let is_admin = self
            .durable_call(deadline, "is_store_admin", self.durable.is_store_admin(user_id, store_id))
            .await?;
        if is_admin {
            Ok(())
        } else {
            Err(ValidationError::NotStoreAdmin { user_id, store_id }.into())
        }
    }
}
