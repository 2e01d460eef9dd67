// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Product operations.
//!
//! Single products are mirrored as hashes (write-through); the product list
//! and the owner's store snapshot are invalidated on every change.

use tracing::{debug, info, warn};

use crate::error::{Entity, ShopError, ShopResult, ValidationError};
use crate::keys;
use crate::metrics;
use crate::mirror::ProductMirror;
use crate::model::{NewProduct, Product, ProductUpdate};

use super::types::Deadline;
use super::{ShopCoordinator, Sourced};

impl ShopCoordinator {
    /// Create a product in a store the caller administers.
    #[tracing::instrument(skip(self, product), fields(store_id = product.store_id))]
    pub async fn create_product(&self, user_id: i64, product: NewProduct) -> ShopResult<Product> {
        if product.stock < 0 {
            return Err(ValidationError::InvalidStock.into());
        }
        let deadline = self.deadline();
        self.require_store_admin(deadline, user_id, product.store_id).await?;

        let created = self
            .durable_call(deadline, "insert_product", self.durable.insert_product(&product))
            .await?;

        self.after_product_write(deadline, user_id, &created).await?;

        info!(product_id = created.id, "Product created");
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    pub async fn product(&self, product_id: i64) -> ShopResult<Sourced<Product>> {
        let deadline = self.deadline();
        let key = keys::product(product_id);

        match self
            .cache_call(self.cache_budget(deadline), "hash_get_all", self.cache.hash_get_all(&key))
            .await
        {
            Ok(fields) if fields.is_empty() => {
                metrics::record_cache_lookup("product", "miss");
                debug!(key = %key, "Cache miss");
            }
            Ok(fields) => match ProductMirror::from_fields(&fields) {
                Ok(mirror) => {
                    metrics::record_cache_lookup("product", "hit");
                    return Ok(Sourced::cache(mirror.into_product(product_id)));
                }
                Err(e) => {
                    metrics::record_cache_lookup("product", "corrupt");
                    debug!(key = %key, error = %e, "Undecodable product mirror, treating as miss");
                }
            },
            Err(e) => {
                metrics::record_cache_lookup("product", "error");
                warn!(key = %key, error = %e, "Cache read failed, falling back to durable store");
            }
        }

        let product = self
            .durable_call(deadline, "product_by_id", self.durable.product_by_id(product_id))
            .await?
            .ok_or_else(|| ShopError::not_found(Entity::Product, product_id))?;

        let fields = ProductMirror::from(&product).to_fields();
        self.populate_mirror(deadline, &key, &fields, self.ttl.product).await;
        Ok(Sourced::store(product))
    }

    #[tracing::instrument(skip(self))]
    pub async fn all_products(&self) -> ShopResult<Sourced<Vec<Product>>> {
        let deadline = self.deadline();

        if let Some(products) = self
            .read_snapshot::<Vec<Product>>(deadline, "all_products", keys::ALL_PRODUCTS)
            .await
        {
            return Ok(Sourced::cache(products));
        }

        let products = self.durable_call(deadline, "list_products", self.durable.list_products()).await?;
        self.store_snapshot(deadline, keys::ALL_PRODUCTS, &products, self.ttl.all_products).await;
        Ok(Sourced::store(products))
    }

    /// Replace a product's name and stock.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_product(
        &self,
        user_id: i64,
        product_id: i64,
        update: ProductUpdate,
    ) -> ShopResult<Product> {
        if update.stock < 0 {
            return Err(ValidationError::InvalidStock.into());
        }
        let deadline = self.deadline();
        let current = self.load_product(deadline, product_id).await?;
        self.require_store_admin(deadline, user_id, current.store_id).await?;

        let updated = self
            .durable_call(deadline, "update_product", self.durable.update_product(product_id, &update))
            .await?
            .ok_or_else(|| ShopError::not_found(Entity::Product, product_id))?;

        self.after_product_write(deadline, user_id, &updated).await?;

        info!(product_id, stock = updated.stock, "Product updated");
        Ok(updated)
    }

    /// Delete a product. Cart items that referenced it are kept and
    /// flagged; their mirrors are left as they are until they expire.
    #[tracing::instrument(skip(self))]
    pub async fn delete_product(&self, user_id: i64, product_id: i64) -> ShopResult<()> {
        let deadline = self.deadline();
        let current = self.load_product(deadline, product_id).await?;
        self.require_store_admin(deadline, user_id, current.store_id).await?;

        let deleted = self
            .durable_call(deadline, "delete_product", self.durable.delete_product(product_id))
            .await?;
        if !deleted {
            return Err(ShopError::not_found(Entity::Product, product_id));
        }

        let product_key = keys::product(product_id);
        let my_store = keys::my_store(user_id);
        self.invalidate(deadline, &[product_key.as_str(), keys::ALL_PRODUCTS, my_store.as_str()]).await?;

        info!(product_id, "Product deleted");
        Ok(())
    }

    async fn load_product(&self, deadline: Deadline, product_id: i64) -> ShopResult<Product> {
        self.durable_call(deadline, "product_by_id", self.durable.product_by_id(product_id))
            .await?
            .ok_or_else(|| ShopError::not_found(Entity::Product, product_id))
    }

    /// Mirror the committed row, then drop the aggregates that list it.
    async fn after_product_write(
        &self,
        deadline: Deadline,
        admin_id: i64,
        product: &Product,
    ) -> ShopResult<()> {
        let key = keys::product(product.id);
        let fields = ProductMirror::from(product).to_fields();
        self.write_mirror(deadline, "product_mirror", &key, &fields, self.ttl.product).await?;

        let my_store = keys::my_store(admin_id);
        self.invalidate(deadline, &[keys::ALL_PRODUCTS, my_store.as_str()]).await
    }

    /// Rewrite the mirror of a product whose stock changed outside the
    /// product write paths. Drops the mirror if the row is gone.
    pub(super) async fn refresh_product_mirror(&self, deadline: Deadline, product_id: i64) -> ShopResult<()> {
        let key = keys::product(product_id);
        match self
            .durable_call(deadline, "product_by_id", self.durable.product_by_id(product_id))
            .await
        {
            Ok(Some(product)) => {
                let fields = ProductMirror::from(&product).to_fields();
                self.write_mirror(deadline, "product_mirror", &key, &fields, self.ttl.product).await
            }
            Ok(None) => self.invalidate(deadline, &[key.as_str()]).await,
            // The payment already committed; a stale mirror is dropped
            // rather than failing the call.
            Err(e) => {
                warn!(product_id, error = %e, "Could not reload product after payment");
                self.invalidate(deadline, &[key.as_str()]).await
            }
        }
    }
}
