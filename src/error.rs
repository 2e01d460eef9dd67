// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors surfaced to callers of the coordinator.
//!
//! Cache misses and undecodable mirrors never show up here; they are routed
//! to the durable store internally.

use std::fmt;

use thiserror::Error;

use crate::storage::traits::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Store,
    Product,
    CartItem,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::User => write!(f, "user"),
            Entity::Store => write!(f, "store"),
            Entity::Product => write!(f, "product"),
            Entity::CartItem => write!(f, "cart item"),
        }
    }
}

/// Business rule failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: i64, requested: i64, available: i64 },
    #[error("User {user_id} is not the admin of store {store_id}")]
    NotStoreAdmin { user_id: i64, store_id: i64 },
    #[error("User {admin_id} already has a store")]
    StoreAlreadyExists { admin_id: i64 },
    #[error("Stock must not be negative")]
    InvalidStock,
    #[error("Purchase amount must be at least 1")]
    InvalidAmount,
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("The product is no longer available")]
    ProductUnavailable,
    #[error("A user with this email or username already exists")]
    DuplicateUser,
    #[error("The cart item has already been paid")]
    AlreadyPaid,
}

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Durable store error: {0}")]
    Durable(StorageError),
    #[error("Cache error: {0}")]
    Cache(StorageError),
}

impl ShopError {
    pub(crate) fn not_found(entity: Entity, id: i64) -> Self {
        ShopError::NotFound { entity, id }
    }

    /// Whether the failure is the caller's fault rather than infrastructure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, ShopError::NotFound { .. } | ShopError::Validation(_))
    }
}

pub type ShopResult<T> = Result<T, ShopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ShopError::not_found(Entity::CartItem, 9);
        assert_eq!(err.to_string(), "cart item 9 not found");

        let err = ShopError::from(ValidationError::InsufficientStock {
            product_id: 1,
            requested: 6,
            available: 5,
        });
        assert!(err.to_string().contains("requested 6, available 5"));
        assert!(err.is_client_error());

        let err = ShopError::Durable(StorageError::Timeout { operation: "pay".into() });
        assert!(!err.is_client_error());
    }
}
