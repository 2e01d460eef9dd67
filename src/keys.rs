// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache key namespace.
//!
//! Deployed instances share these keys, so the layout is fixed:
//!
//! ```text
//! mystore:user:<adminId>          JSON store + products snapshot   20 min
//! store:all                       JSON list of stores              15 min
//! product:<id>                    hash {name, store_id, stock, created_at}   30 min
//! products:all                    JSON list of products            30 min
//! user:<uid>:cartitem:<id>        hash {product_id, user_id, purchase_amount, is_paid}   30 min
//! user:<uid>:cartitems            set of cart item ids             30 min
//! behind:pending:<op>:<id>        hash {id, email, message, op}    10 min
//! ```

use std::time::Duration;

pub const ALL_STORES: &str = "store:all";
pub const ALL_PRODUCTS: &str = "products:all";
pub const PENDING_PREFIX: &str = "behind:pending:";

#[must_use]
pub fn my_store(admin_id: i64) -> String {
    format!("mystore:user:{}", admin_id)
}

#[must_use]
pub fn product(product_id: i64) -> String {
    format!("product:{}", product_id)
}

#[must_use]
pub fn cart_item(user_id: i64, cart_item_id: i64) -> String {
    format!("user:{}:cartitem:{}", user_id, cart_item_id)
}

#[must_use]
pub fn cart_index(user_id: i64) -> String {
    format!("user:{}:cartitems", user_id)
}

/// `behind:pending:<op>:<subject_id>`
#[must_use]
pub fn pending(op: &str, subject_id: i64) -> String {
    format!("{}{}:{}", PENDING_PREFIX, op, subject_id)
}

/// Resolved TTL per key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlTable {
    pub my_store: Duration,
    pub all_stores: Duration,
    pub product: Duration,
    pub all_products: Duration,
    pub cart: Duration,
    pub pending: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        crate::config::ShopCacheConfig::default().ttls()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(my_store(1), "mystore:user:1");
        assert_eq!(product(42), "product:42");
        assert_eq!(cart_item(2, 7), "user:2:cartitem:7");
        assert_eq!(cart_index(2), "user:2:cartitems");
        assert_eq!(pending("register", 9), "behind:pending:register:9");
        assert_eq!(pending("buy", 11), "behind:pending:buy:11");
    }

    #[test]
    fn test_pending_keys_share_scan_prefix() {
        assert!(pending("buy", 1).starts_with(PENDING_PREFIX));
        assert!(pending("register", 1).starts_with(PENDING_PREFIX));
    }
}
