// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    CartItem, NewCartItem, NewProduct, NewStore, NewUser, Product, ProductUpdate, Store, User,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Operation '{operation}' exceeded its deadline")]
    Timeout { operation: String },
    #[error("Unique constraint violated: {0}")]
    Conflict(String),
}

/// Result of the pay-time stock consumption transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Stock decremented and the item marked paid.
    Paid { product_id: i64, purchase_amount: i64, remaining_stock: i64 },
    /// Conditional decrement matched no row; nothing changed.
    InsufficientStock { available: Option<i64> },
    /// The item was already paid; nothing changed.
    AlreadyPaid,
    /// The referenced product has been deleted.
    ProductDeleted,
    /// No such cart item for this user.
    Missing,
}

/// Ephemeral key-value cache with per-key TTL, hash values and set values.
///
/// Anything stored here may vanish at any time. Keys are passed unprefixed;
/// backends that namespace keys apply their prefix internally.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StorageError>;

    /// Empty map when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;

    /// Set hash fields and refresh the key TTL in one step.
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StorageError>;

    /// Add members to a set and refresh the key TTL in one step.
    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> Result<(), StorageError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StorageError>;

    /// Empty vec when the key does not exist.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError>;

    /// All live keys starting with `prefix` (returned unprefixed).
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Read several hashes at once (pipelined for Redis).
    /// Default implementation falls back to sequential reads.
    async fn hash_get_all_many(
        &self,
        keys: &[String],
    ) -> Result<Vec<HashMap<String, String>>, StorageError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.hash_get_all(key).await?);
        }
        Ok(out)
    }
}

/// Durable source of truth for users, stores, products and cart items.
#[async_trait]
pub trait DurableStore: Send + Sync {
    // ---- users ----
    async fn insert_user(&self, user: &NewUser) -> Result<User, StorageError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    // ---- stores ----
    async fn is_store_admin(&self, user_id: i64, store_id: i64) -> Result<bool, StorageError>;
    async fn store_by_id(&self, store_id: i64) -> Result<Option<Store>, StorageError>;
    async fn store_by_admin(&self, admin_id: i64) -> Result<Option<Store>, StorageError>;
    async fn list_stores(&self) -> Result<Vec<Store>, StorageError>;
    async fn insert_store(&self, store: &NewStore) -> Result<Store, StorageError>;
    /// Returns false when no row matched.
    async fn rename_store(&self, store_id: i64, name: &str) -> Result<bool, StorageError>;
    /// Deletes the store and its products in one transaction, flagging cart
    /// items that referenced those products. Returns the deleted product ids,
    /// or `None` when the store did not exist.
    async fn delete_store(&self, store_id: i64) -> Result<Option<Vec<i64>>, StorageError>;

    // ---- products ----
    async fn product_by_id(&self, product_id: i64) -> Result<Option<Product>, StorageError>;
    async fn products_by_store(&self, store_id: i64) -> Result<Vec<Product>, StorageError>;
    async fn list_products(&self) -> Result<Vec<Product>, StorageError>;
    async fn product_stock(&self, product_id: i64) -> Result<Option<i64>, StorageError>;
    async fn insert_product(&self, product: &NewProduct) -> Result<Product, StorageError>;
    /// Returns the row as stored after the update, `None` when absent.
    async fn update_product(
        &self,
        product_id: i64,
        update: &ProductUpdate,
    ) -> Result<Option<Product>, StorageError>;
    /// Flags referencing cart items and deletes the product atomically.
    /// Returns false when the product did not exist.
    async fn delete_product(&self, product_id: i64) -> Result<bool, StorageError>;

    // ---- cart items ----
    async fn cart_item(&self, user_id: i64, cart_item_id: i64) -> Result<Option<CartItem>, StorageError>;
    async fn cart_items_by_user(&self, user_id: i64) -> Result<Vec<CartItem>, StorageError>;
    async fn insert_cart_item(&self, item: &NewCartItem) -> Result<CartItem, StorageError>;
    /// Only unpaid items change. Returns false when no unpaid item matched.
    async fn update_cart_amount(
        &self,
        user_id: i64,
        cart_item_id: i64,
        purchase_amount: i64,
    ) -> Result<bool, StorageError>;
    /// Conditionally decrement stock and mark the item paid, atomically.
    async fn pay_cart_item(
        &self,
        user_id: i64,
        cart_item_id: i64,
    ) -> Result<PaymentOutcome, StorageError>;
    /// Returns false when nothing was deleted.
    async fn delete_cart_item(&self, user_id: i64, cart_item_id: i64) -> Result<bool, StorageError>;
}
