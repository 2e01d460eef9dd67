// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for everything decoded from the cache.
//!
//! Anything read back from Redis may be garbage; decoding must fail cleanly
//! and never panic.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::HashMap;

use proptest::prelude::*;

use shop_cache::keys;
use shop_cache::mirror::{parse_stock, CartItemMirror, ProductMirror};
use shop_cache::model::{Product, Store, StoreWithProducts};
use shop_cache::PendingOperation;

// =============================================================================
// Strategies
// =============================================================================

const PRODUCT_FIELDS: &[&str] = &["name", "store_id", "stock", "created_at"];
const CART_FIELDS: &[&str] = &["product_id", "user_id", "purchase_amount", "is_paid"];
const PENDING_FIELDS: &[&str] = &["id", "email", "message", "op"];

/// Hash contents drawn from the expected field names plus noise, with values
/// that are sometimes numeric and sometimes not.
fn hash_strategy(names: &'static [&'static str]) -> impl Strategy<Value = HashMap<String, String>> {
    let name = prop_oneof![
        4 => prop::sample::select(names).prop_map(str::to_string),
        1 => "[a-z_]{0,12}",
    ];
    let value = prop_oneof![
        any::<i64>().prop_map(|n| n.to_string()),
        Just(String::new()),
        Just("true".to_string()),
        Just("false".to_string()),
        ".{0,20}",
    ];
    prop::collection::hash_map(name, value, 0..8)
}

fn product_strategy() -> impl Strategy<Value = Product> {
    (any::<i64>(), any::<i64>(), ".{0,30}", 0..i64::MAX, any::<i64>()).prop_map(
        |(id, store_id, name, stock, created_at)| Product { id, store_id, name, stock, created_at },
    )
}

// =============================================================================
// Mirror decoding
// =============================================================================

proptest! {
    #[test]
    fn fuzz_product_mirror_never_panics(fields in hash_strategy(PRODUCT_FIELDS)) {
        if let Ok(mirror) = ProductMirror::from_fields(&fields) {
            prop_assert!(mirror.stock >= 0);
        }
    }

    #[test]
    fn fuzz_cart_mirror_never_panics(fields in hash_strategy(CART_FIELDS)) {
        if let Ok(mirror) = CartItemMirror::from_fields(&fields) {
            prop_assert!(mirror.purchase_amount >= 1);
            let view = mirror.clone().into_view(1);
            prop_assert_eq!(view.is_product_deleted, mirror.product_id.is_none());
        }
    }

    #[test]
    fn fuzz_pending_entry_never_panics(fields in hash_strategy(PENDING_FIELDS)) {
        let _ = PendingOperation::from_fields(&fields);
    }

    #[test]
    fn prop_product_mirror_preserves_row(product in product_strategy()) {
        let fields: HashMap<String, String> = ProductMirror::from(&product)
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let decoded = ProductMirror::from_fields(&fields).unwrap().into_product(product.id);
        prop_assert_eq!(decoded, product);
    }

    #[test]
    fn prop_parse_stock_only_accepts_non_negative(raw in ".{0,20}") {
        match parse_stock(&raw) {
            Some(stock) => prop_assert!(stock >= 0 && raw.parse::<i64>() == Ok(stock)),
            None => prop_assert!(raw.parse::<i64>().map_or(true, |n| n < 0)),
        }
    }
}

// =============================================================================
// Snapshot decoding
// =============================================================================

proptest! {
    #[test]
    fn fuzz_snapshots_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = serde_json::from_slice::<Vec<Store>>(&bytes);
        let _ = serde_json::from_slice::<Vec<Product>>(&bytes);
        let _ = serde_json::from_slice::<StoreWithProducts>(&bytes);
    }

    #[test]
    fn fuzz_corrupted_product_list(
        products in prop::collection::vec(product_strategy(), 1..5),
        corruption in prop::collection::vec(any::<u8>(), 1..20),
        position in 0usize..10_000,
    ) {
        let mut bytes = serde_json::to_vec(&products).unwrap();
        let pos = position % bytes.len();
        for (i, b) in corruption.iter().enumerate() {
            let idx = (pos + i) % bytes.len();
            bytes[idx] ^= b;
        }
        let _ = serde_json::from_slice::<Vec<Product>>(&bytes);
    }
}

// =============================================================================
// Key formatting
// =============================================================================

proptest! {
    #[test]
    fn prop_pending_keys_share_scan_prefix(op in "register|buy", id in any::<i64>()) {
        let key = keys::pending(&op, id);
        prop_assert!(key.starts_with(keys::PENDING_PREFIX));
        prop_assert_eq!(key, format!("behind:pending:{}:{}", op, id));
    }

    #[test]
    fn prop_cart_keys_are_distinct_per_user(uid in 0i64..1000, other in 0i64..1000, id in any::<i64>()) {
        prop_assert_eq!(keys::cart_item(uid, id), format!("user:{}:cartitem:{}", uid, id));
        if uid != other {
            prop_assert_ne!(keys::cart_index(uid), keys::cart_index(other));
            prop_assert_ne!(keys::cart_item(uid, id), keys::cart_item(other, id));
        }
    }
}
