// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stock guard.
//!
//! The mirror may only reject early. Approval always comes from the durable
//! store.

use tracing::{debug, warn};

use crate::error::{Entity, ShopError, ShopResult, ValidationError};
use crate::keys;
use crate::metrics;
use crate::mirror::{parse_stock, ProductMirror};

use super::types::Deadline;
use super::ShopCoordinator;

impl ShopCoordinator {
    /// Check that `requested` units of a product are available right now.
    ///
    /// Does not reserve anything; stock is consumed at payment.
    #[tracing::instrument(skip(self))]
    pub async fn check_stock(&self, product_id: i64, requested: i64) -> ShopResult<()> {
        self.check_stock_within(self.deadline(), product_id, requested).await
    }

    pub(super) async fn check_stock_within(
        &self,
        deadline: Deadline,
        product_id: i64,
        requested: i64,
    ) -> ShopResult<()> {
        if requested < 1 {
            return Err(ValidationError::InvalidAmount.into());
        }

        let key = keys::product(product_id);
        match self
            .cache_call(
                self.cache_budget(deadline),
                "hash_get",
                self.cache.hash_get(&key, ProductMirror::STOCK),
            )
            .await
        {
            Ok(Some(raw)) => match parse_stock(&raw) {
                Some(cached) if cached < requested => {
                    metrics::record_stock_rejection("cache");
                    debug!(product_id, requested, cached, "Stock guard rejected from mirror");
                    return Err(ValidationError::InsufficientStock {
                        product_id,
                        requested,
                        available: cached,
                    }
                    .into());
                }
                Some(_) => {}
                None => debug!(product_id, raw = %raw, "Ignoring unparseable mirror stock"),
            },
            Ok(None) => {}
            Err(e) => warn!(product_id, error = %e, "Stock mirror read failed"),
        }

        let available = self
            .durable_call(deadline, "product_stock", self.durable.product_stock(product_id))
            .await?
            .ok_or_else(|| ShopError::not_found(Entity::Product, product_id))?;

        if available < requested {
            metrics::record_stock_rejection("store");
            return Err(ValidationError::InsufficientStock { product_id, requested, available }.into());
        }
        Ok(())
    }
}
