// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable rows and the caller-facing views built from them.
//!
//! Rows are what the SQL store returns. Views are what the coordinator hands
//! back to callers and what the JSON aggregate snapshots contain.
//! Timestamps are epoch millis.

use serde::{Deserialize, Serialize};

/// Current time as epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Opaque credential produced by the auth layer
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// A store row. Also the element type of the `store:all` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: i64,
    pub name: String,
    pub admin_id: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewStore {
    pub admin_id: i64,
    pub name: String,
}

/// A product row. Also the element type of `products:all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub store_id: i64,
    pub name: String,
    pub stock: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub store_id: i64,
    pub name: String,
    pub stock: i64,
}

#[derive(Debug, Clone)]
pub struct ProductUpdate {
    pub name: String,
    pub stock: i64,
}

/// The `mystore:user:<id>` snapshot: an admin's store with its products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreWithProducts {
    pub id: i64,
    pub name: String,
    pub admin_id: i64,
    pub created_at: i64,
    #[serde(rename = "product", default)]
    pub products: Vec<Product>,
}

impl StoreWithProducts {
    #[must_use]
    pub fn new(store: Store, products: Vec<Product>) -> Self {
        Self {
            id: store.id,
            name: store.name,
            admin_id: store.admin_id,
            created_at: store.created_at,
            products,
        }
    }
}

/// A cart item row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    pub id: i64,
    pub user_id: i64,
    /// `None` once the referenced product has been deleted
    pub product_id: Option<i64>,
    pub purchase_amount: i64,
    pub is_paid: bool,
    pub is_product_deleted: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewCartItem {
    pub user_id: i64,
    pub product_id: i64,
    pub purchase_amount: i64,
}

/// Caller-facing cart item.
///
/// The cart mirror does not carry the creation time, so neither does the
/// view; the same shape comes back whichever side served the read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemView {
    pub id: i64,
    pub user_id: i64,
    pub product_id: Option<i64>,
    pub purchase_amount: i64,
    pub is_paid: bool,
    pub is_product_deleted: bool,
}

impl From<&CartItem> for CartItemView {
    fn from(item: &CartItem) -> Self {
        Self {
            id: item.id,
            user_id: item.user_id,
            product_id: item.product_id,
            purchase_amount: item.purchase_amount,
            is_paid: item.is_paid,
            is_product_deleted: item.is_product_deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_snapshot_uses_product_field() {
        let snapshot = StoreWithProducts::new(
            Store { id: 1, name: "corner".into(), admin_id: 3, created_at: 10 },
            vec![Product { id: 5, store_id: 1, name: "tea".into(), stock: 2, created_at: 11 }],
        );

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["product"][0]["name"], "tea");
        assert_eq!(json["admin_id"], 3);

        let back: StoreWithProducts = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_cart_view_from_row() {
        let row = CartItem {
            id: 4,
            user_id: 2,
            product_id: None,
            purchase_amount: 3,
            is_paid: false,
            is_product_deleted: true,
            created_at: 99,
        };
        let view = CartItemView::from(&row);
        assert_eq!(view.product_id, None);
        assert!(view.is_product_deleted);
        assert_eq!(view.purchase_amount, 3);
    }

    #[test]
    fn test_now_millis_is_positive() {
        assert!(now_millis() > 1_600_000_000_000);
    }
}
