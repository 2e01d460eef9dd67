// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store operations.
//!
//! Store data only lives in the JSON snapshots (`store:all`,
//! `mystore:user:<admin>`), so every write here is write-around: commit,
//! then delete the snapshots that include the store.

use tracing::info;

use crate::error::{Entity, ShopError, ShopResult, ValidationError};
use crate::keys;
use crate::model::{NewStore, Store, StoreWithProducts};
use crate::storage::traits::StorageError;

use super::{ShopCoordinator, Sourced};

impl ShopCoordinator {
    /// Create the caller's store. One store per admin.
    #[tracing::instrument(skip(self))]
    pub async fn create_store(&self, admin_id: i64, name: &str) -> ShopResult<Store> {
        let deadline = self.deadline();

        let existing = self
            .durable_call(deadline, "store_by_admin", self.durable.store_by_admin(admin_id))
            .await?;
        if existing.is_some() {
            return Err(ValidationError::StoreAlreadyExists { admin_id }.into());
        }

        let new_store = NewStore { admin_id, name: name.to_string() };
        let store = match self
            .durable_call(deadline, "insert_store", self.durable.insert_store(&new_store))
            .await
        {
            // Lost a race with a concurrent create for the same admin
            Err(ShopError::Durable(StorageError::Conflict(_))) => {
                return Err(ValidationError::StoreAlreadyExists { admin_id }.into());
            }
            other => other?,
        };

        let my_store = keys::my_store(admin_id);
        self.invalidate(deadline, &[keys::ALL_STORES, my_store.as_str()]).await?;

        info!(store_id = store.id, admin_id, "Store created");
        Ok(store)
    }

    /// The caller's store with its products. The caller must administer
    /// `store_id`.
    #[tracing::instrument(skip(self))]
    pub async fn store_for_admin(
        &self,
        user_id: i64,
        store_id: i64,
    ) -> ShopResult<Sourced<StoreWithProducts>> {
        let deadline = self.deadline();
        self.require_store_admin(deadline, user_id, store_id).await?;

        let key = keys::my_store(user_id);
        if let Some(snapshot) = self.read_snapshot::<StoreWithProducts>(deadline, "my_store", &key).await {
            return Ok(Sourced::cache(snapshot));
        }

        let store = self
            .durable_call(deadline, "store_by_admin", self.durable.store_by_admin(user_id))
            .await?
            .ok_or_else(|| ShopError::not_found(Entity::Store, store_id))?;
        let products = self
            .durable_call(deadline, "products_by_store", self.durable.products_by_store(store.id))
            .await?;

        let snapshot = StoreWithProducts::new(store, products);
        self.store_snapshot(deadline, &key, &snapshot, self.ttl.my_store).await;
        Ok(Sourced::store(snapshot))
    }

    #[tracing::instrument(skip(self))]
    pub async fn all_stores(&self) -> ShopResult<Sourced<Vec<Store>>> {
        let deadline = self.deadline();

        if let Some(stores) = self.read_snapshot::<Vec<Store>>(deadline, "all_stores", keys::ALL_STORES).await {
            return Ok(Sourced::cache(stores));
        }

        let stores = self.durable_call(deadline, "list_stores", self.durable.list_stores()).await?;
        self.store_snapshot(deadline, keys::ALL_STORES, &stores, self.ttl.all_stores).await;
        Ok(Sourced::store(stores))
    }

    #[tracing::instrument(skip(self))]
    pub async fn rename_store(&self, user_id: i64, store_id: i64, name: &str) -> ShopResult<()> {
        let deadline = self.deadline();
        self.require_store_admin(deadline, user_id, store_id).await?;

        let renamed = self
            .durable_call(deadline, "rename_store", self.durable.rename_store(store_id, name))
            .await?;
        if !renamed {
            return Err(ShopError::not_found(Entity::Store, store_id));
        }

        let my_store = keys::my_store(user_id);
        self.invalidate(deadline, &[keys::ALL_STORES, my_store.as_str()]).await?;

        info!(store_id, "Store renamed");
        Ok(())
    }

    /// Delete the store and its products. Cart items that referenced those
    /// products are kept and flagged.
    #[tracing::instrument(skip(self))]
    pub async fn delete_store(&self, user_id: i64, store_id: i64) -> ShopResult<()> {
        let deadline = self.deadline();
        self.require_store_admin(deadline, user_id, store_id).await?;

        let product_ids = self
            .durable_call(deadline, "delete_store", self.durable.delete_store(store_id))
            .await?
            .ok_or_else(|| ShopError::not_found(Entity::Store, store_id))?;

        let my_store = keys::my_store(user_id);
        let product_keys: Vec<String> = product_ids.iter().map(|id| keys::product(*id)).collect();
        let mut stale: Vec<&str> = vec![keys::ALL_STORES, my_store.as_str(), keys::ALL_PRODUCTS];
        stale.extend(product_keys.iter().map(String::as_str));
        self.invalidate(deadline, &stale).await?;

        info!(store_id, products = product_ids.len(), "Store deleted");
        Ok(())
    }
}
