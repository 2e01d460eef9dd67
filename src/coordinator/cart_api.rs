// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cart operations.
//!
//! Each cart item has a hash mirror and belongs to its owner's membership
//! index set. The index is only ever extended while it is live; a missing
//! index is rebuilt from the durable store so it never lists a subset of
//! the cart.

use tracing::{debug, info, warn};

use crate::error::{Entity, ShopError, ShopResult, ValidationError};
use crate::keys;
use crate::metrics;
use crate::mirror::CartItemMirror;
use crate::model::{CartItem, CartItemView, NewCartItem};
use crate::pending::PendingOperation;
use crate::storage::traits::PaymentOutcome;

use super::types::Deadline;
use super::{ShopCoordinator, Sourced};

impl ShopCoordinator {
    /// Put `purchase_amount` units of a product in the user's cart.
    ///
    /// Runs the stock guard but reserves nothing.
    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        user_id: i64,
        product_id: i64,
        purchase_amount: i64,
    ) -> ShopResult<CartItemView> {
        let deadline = self.deadline();
        self.check_stock_within(deadline, product_id, purchase_amount).await?;

        let new_item = NewCartItem { user_id, product_id, purchase_amount };
        let item = self
            .durable_call(deadline, "insert_cart_item", self.durable.insert_cart_item(&new_item))
            .await?;

        self.write_cart_mirror(deadline, &item).await?;
        self.index_cart_item(deadline, user_id, item.id).await?;

        info!(cart_item_id = item.id, product_id, purchase_amount, "Added to cart");
        Ok(CartItemView::from(&item))
    }

    /// The user's cart, ordered by item id.
    #[tracing::instrument(skip(self))]
    pub async fn cart_items(&self, user_id: i64) -> ShopResult<Sourced<Vec<CartItemView>>> {
        let deadline = self.deadline();

        if let Some(items) = self.cached_cart(deadline, user_id).await {
            metrics::record_cache_lookup("cart", "hit");
            return Ok(Sourced::cache(items));
        }

        let rows = self
            .durable_call(deadline, "cart_items_by_user", self.durable.cart_items_by_user(user_id))
            .await?;
        let mut items: Vec<CartItemView> = rows.iter().map(CartItemView::from).collect();
        items.sort_by_key(|item| item.id);

        self.rebuild_cart_cache(deadline, user_id, &rows).await;
        Ok(Sourced::store(items))
    }

    /// Change the amount of an unpaid cart item.
    #[tracing::instrument(skip(self))]
    pub async fn update_cart_amount(
        &self,
        user_id: i64,
        cart_item_id: i64,
        purchase_amount: i64,
    ) -> ShopResult<CartItemView> {
        if purchase_amount < 1 {
            return Err(ValidationError::InvalidAmount.into());
        }
        let deadline = self.deadline();
        let mut item = self.load_open_item(deadline, user_id, cart_item_id).await?;
        let product_id = item.product_id.ok_or(ValidationError::ProductUnavailable)?;

        self.check_stock_within(deadline, product_id, purchase_amount).await?;

        let updated = self
            .durable_call(
                deadline,
                "update_cart_amount",
                self.durable.update_cart_amount(user_id, cart_item_id, purchase_amount),
            )
            .await?;
        if !updated {
            // Paid or removed since it was loaded
            let current = self
                .durable_call(deadline, "cart_item", self.durable.cart_item(user_id, cart_item_id))
                .await?;
            return match current {
                Some(row) if row.is_paid => Err(ValidationError::AlreadyPaid.into()),
                _ => Err(ShopError::not_found(Entity::CartItem, cart_item_id)),
            };
        }

        item.purchase_amount = purchase_amount;
        self.write_cart_mirror(deadline, &item).await?;

        info!(cart_item_id, purchase_amount, "Cart amount updated");
        Ok(CartItemView::from(&item))
    }

    /// Pay for a cart item, consuming its stock.
    ///
    /// `email` receives the purchase confirmation.
    #[tracing::instrument(skip(self, email))]
    pub async fn pay_cart_item(
        &self,
        user_id: i64,
        email: &str,
        cart_item_id: i64,
    ) -> ShopResult<CartItemView> {
        let deadline = self.deadline();
        let mut item = self.load_open_item(deadline, user_id, cart_item_id).await?;
        let product_id = item.product_id.ok_or(ValidationError::ProductUnavailable)?;

        self.check_stock_within(deadline, product_id, item.purchase_amount).await?;

        let outcome = self
            .durable_call(deadline, "pay_cart_item", self.durable.pay_cart_item(user_id, cart_item_id))
            .await?;

        let (product_id, purchase_amount, remaining_stock) = match outcome {
            PaymentOutcome::Paid { product_id, purchase_amount, remaining_stock } => {
                (product_id, purchase_amount, remaining_stock)
            }
            PaymentOutcome::InsufficientStock { available } => {
                metrics::record_stock_rejection("store");
                return Err(ValidationError::InsufficientStock {
                    product_id,
                    requested: item.purchase_amount,
                    available: available.unwrap_or(0),
                }
                .into());
            }
            PaymentOutcome::AlreadyPaid => return Err(ValidationError::AlreadyPaid.into()),
            PaymentOutcome::ProductDeleted => return Err(ValidationError::ProductUnavailable.into()),
            PaymentOutcome::Missing => return Err(ShopError::not_found(Entity::CartItem, cart_item_id)),
        };

        item.is_paid = true;
        item.purchase_amount = purchase_amount;
        self.write_cart_mirror(deadline, &item).await?;

        self.refresh_product_mirror(deadline, product_id).await?;
        let mut stale = vec![keys::ALL_PRODUCTS.to_string()];
        if let Some(admin_id) = self.store_admin_of(deadline, product_id).await {
            stale.push(keys::my_store(admin_id));
        }
        let stale: Vec<&str> = stale.iter().map(String::as_str).collect();
        self.invalidate(deadline, &stale).await?;

        let op = PendingOperation::buy(cart_item_id, email, product_id, purchase_amount);
        self.enqueue_pending(deadline, &op).await?;

        info!(cart_item_id, product_id, purchase_amount, remaining_stock, "Cart item paid");
        Ok(CartItemView::from(&item))
    }

    /// Remove a cart item. Removing an item that is already gone succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn delete_cart_item(&self, user_id: i64, cart_item_id: i64) -> ShopResult<()> {
        let deadline = self.deadline();

        let deleted = self
            .durable_call(
                deadline,
                "delete_cart_item",
                self.durable.delete_cart_item(user_id, cart_item_id),
            )
            .await?;
        if !deleted {
            debug!(cart_item_id, "Cart item already absent");
        }

        let index = keys::cart_index(user_id);
        let member = cart_item_id.to_string();
        if let Err(e) = self
            .cache_call(self.cache_budget(deadline), "set_remove", self.cache.set_remove(&index, &member))
            .await
        {
            self.cache_write_failed("cart_index", e, &[index.as_str()]).await?;
        }

        let mirror = keys::cart_item(user_id, cart_item_id);
        self.invalidate(deadline, &[mirror.as_str()]).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// A cart item of this user that can still change.
    async fn load_open_item(&self, deadline: Deadline, user_id: i64, cart_item_id: i64) -> ShopResult<CartItem> {
        let item = self
            .durable_call(deadline, "cart_item", self.durable.cart_item(user_id, cart_item_id))
            .await?
            .ok_or_else(|| ShopError::not_found(Entity::CartItem, cart_item_id))?;
        if item.is_paid {
            return Err(ValidationError::AlreadyPaid.into());
        }
        Ok(item)
    }

    async fn write_cart_mirror(&self, deadline: Deadline, item: &CartItem) -> ShopResult<()> {
        let key = keys::cart_item(item.user_id, item.id);
        let fields = CartItemMirror::from(item).to_fields();
        self.write_mirror(deadline, "cart_mirror", &key, &fields, self.ttl.cart).await
    }

    /// Add a new item id to a live index, or rebuild the index from the
    /// durable store when there is none.
    async fn index_cart_item(&self, deadline: Deadline, user_id: i64, cart_item_id: i64) -> ShopResult<()> {
        let index = keys::cart_index(user_id);

        let members = match self
            .cache_call(self.cache_budget(deadline), "set_members", self.cache.set_members(&index))
            .await
        {
            Ok(members) => members,
            Err(e) => return self.cache_write_failed("cart_index", e, &[index.as_str()]).await,
        };

        let ids: Vec<String> = if members.is_empty() {
            let rows = self
                .durable_call(deadline, "cart_items_by_user", self.durable.cart_items_by_user(user_id))
                .await?;
            rows.iter().map(|row| row.id.to_string()).collect()
        } else {
            vec![cart_item_id.to_string()]
        };
        if ids.is_empty() {
            return Ok(());
        }

        match self
            .cache_call(self.cache_budget(deadline), "set_add", self.cache.set_add(&index, &ids, self.ttl.cart))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => self.cache_write_failed("cart_index", e, &[index.as_str()]).await,
        }
    }

    /// The cart from its index and mirrors, or `None` if any piece is
    /// missing, undecodable or unreadable.
    async fn cached_cart(&self, deadline: Deadline, user_id: i64) -> Option<Vec<CartItemView>> {
        let index = keys::cart_index(user_id);

        let members = match self
            .cache_call(self.cache_budget(deadline), "set_members", self.cache.set_members(&index))
            .await
        {
            Ok(members) if members.is_empty() => {
                metrics::record_cache_lookup("cart", "miss");
                debug!(key = %index, "Cache miss");
                return None;
            }
            Ok(members) => members,
            Err(e) => {
                metrics::record_cache_lookup("cart", "error");
                warn!(key = %index, error = %e, "Cache read failed, falling back to durable store");
                return None;
            }
        };

        let mut ids = Vec::with_capacity(members.len());
        for member in &members {
            match member.parse::<i64>() {
                Ok(id) => ids.push(id),
                Err(_) => {
                    metrics::record_cache_lookup("cart", "corrupt");
                    debug!(key = %index, member = %member, "Non-numeric cart index member");
                    return None;
                }
            }
        }
        ids.sort_unstable();

        let mirror_keys: Vec<String> = ids.iter().map(|id| keys::cart_item(user_id, *id)).collect();
        let hashes = match self
            .cache_call(self.cache_budget(deadline), "hash_get_all_many", self.cache.hash_get_all_many(&mirror_keys))
            .await
        {
            Ok(hashes) => hashes,
            Err(e) => {
                metrics::record_cache_lookup("cart", "error");
                warn!(user_id, error = %e, "Cart mirror read failed, falling back to durable store");
                return None;
            }
        };

        let mut items = Vec::with_capacity(ids.len());
        for (id, fields) in ids.iter().zip(hashes.iter()) {
            if fields.is_empty() {
                metrics::record_cache_lookup("cart", "miss");
                debug!(user_id, cart_item_id = id, "Cart mirror missing");
                return None;
            }
            match CartItemMirror::from_fields(fields) {
                Ok(mirror) => items.push(mirror.into_view(*id)),
                Err(e) => {
                    metrics::record_cache_lookup("cart", "corrupt");
                    debug!(user_id, cart_item_id = id, error = %e, "Undecodable cart mirror");
                    return None;
                }
            }
        }
        Some(items)
    }

    /// Replace the index and every mirror with the durable rows. Failures
    /// are logged only.
    async fn rebuild_cart_cache(&self, deadline: Deadline, user_id: i64, rows: &[CartItem]) {
        let index = keys::cart_index(user_id);
        if let Err(e) = self
            .cache_call(self.cache_budget(deadline), "delete", self.cache.delete(&index))
            .await
        {
            metrics::record_cache_write_failure("populate");
            warn!(key = %index, error = %e, "Failed to reset cart index");
            return;
        }
        if rows.is_empty() {
            return;
        }

        for row in rows {
            let key = keys::cart_item(user_id, row.id);
            let fields = CartItemMirror::from(row).to_fields();
            self.populate_mirror(deadline, &key, &fields, self.ttl.cart).await;
        }

        // Index last, so a live index implies its mirrors were written
        let ids: Vec<String> = rows.iter().map(|row| row.id.to_string()).collect();
        if let Err(e) = self
            .cache_call(self.cache_budget(deadline), "set_add", self.cache.set_add(&index, &ids, self.ttl.cart))
            .await
        {
            metrics::record_cache_write_failure("populate");
            warn!(key = %index, error = %e, "Failed to populate cart index");
        }
    }

    /// Admin of the store that sells `product_id`, if still known.
    async fn store_admin_of(&self, deadline: Deadline, product_id: i64) -> Option<i64> {
        let product = match self
            .durable_call(deadline, "product_by_id", self.durable.product_by_id(product_id))
            .await
        {
            Ok(product) => product?,
            Err(e) => {
                warn!(product_id, error = %e, "Could not resolve product owner");
                return None;
            }
        };
        match self
            .durable_call(deadline, "store_by_id", self.durable.store_by_id(product.store_id))
            .await
        {
            Ok(store) => store.map(|store| store.admin_id),
            Err(e) => {
                warn!(product_id, error = %e, "Could not resolve product owner");
                None
            }
        }
    }
}
