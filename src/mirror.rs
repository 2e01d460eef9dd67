// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed hash mirrors of products and cart items.
//!
//! Every field is a decimal string or `true`/`false`. A null product id is
//! the empty string. Decoding is strict: a missing field, a non-numeric
//! number or an out-of-range value rejects the whole mirror, and the
//! coordinator treats a rejected mirror as a cache miss.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::{CartItem, CartItemView, Product};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Mirror field '{0}' is missing")]
    MissingField(&'static str),
    #[error("Mirror field '{field}' has invalid value '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &'static str) -> Result<&'a str, MirrorError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(MirrorError::MissingField(name))
}

fn int_field(fields: &HashMap<String, String>, name: &'static str) -> Result<i64, MirrorError> {
    let raw = field(fields, name)?;
    raw.parse::<i64>().map_err(|_| MirrorError::InvalidValue {
        field: name,
        value: raw.to_string(),
    })
}

fn bool_field(fields: &HashMap<String, String>, name: &'static str) -> Result<bool, MirrorError> {
    match field(fields, name)? {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(MirrorError::InvalidValue { field: name, value: other.to_string() }),
    }
}

/// Parse a stock figure read from a product mirror. `None` for anything
/// that is not a non-negative integer.
#[must_use]
pub fn parse_stock(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|stock| *stock >= 0)
}

/// `product:<id>` → {name, store_id, stock, created_at}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductMirror {
    pub name: String,
    pub store_id: i64,
    pub stock: i64,
    pub created_at: i64,
}

impl ProductMirror {
    pub const STOCK: &'static str = "stock";

    #[must_use]
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("store_id", self.store_id.to_string()),
            (Self::STOCK, self.stock.to_string()),
            ("created_at", self.created_at.to_string()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, MirrorError> {
        let stock = int_field(fields, Self::STOCK)?;
        if stock < 0 {
            return Err(MirrorError::InvalidValue { field: Self::STOCK, value: stock.to_string() });
        }
        Ok(Self {
            name: field(fields, "name")?.to_string(),
            store_id: int_field(fields, "store_id")?,
            stock,
            created_at: int_field(fields, "created_at")?,
        })
    }

    #[must_use]
    pub fn into_product(self, id: i64) -> Product {
        Product {
            id,
            store_id: self.store_id,
            name: self.name,
            stock: self.stock,
            created_at: self.created_at,
        }
    }
}

impl From<&Product> for ProductMirror {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            store_id: product.store_id,
            stock: product.stock,
            created_at: product.created_at,
        }
    }
}

/// `user:<uid>:cartitem:<id>` → {product_id, user_id, purchase_amount, is_paid}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItemMirror {
    pub product_id: Option<i64>,
    pub user_id: i64,
    pub purchase_amount: i64,
    pub is_paid: bool,
}

impl CartItemMirror {
    #[must_use]
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("product_id", self.product_id.map(|id| id.to_string()).unwrap_or_default()),
            ("user_id", self.user_id.to_string()),
            ("purchase_amount", self.purchase_amount.to_string()),
            ("is_paid", self.is_paid.to_string()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, MirrorError> {
        let product_id = match field(fields, "product_id")? {
            "" => None,
            raw => Some(raw.parse::<i64>().map_err(|_| MirrorError::InvalidValue {
                field: "product_id",
                value: raw.to_string(),
            })?),
        };
        let purchase_amount = int_field(fields, "purchase_amount")?;
        if purchase_amount < 1 {
            return Err(MirrorError::InvalidValue {
                field: "purchase_amount",
                value: purchase_amount.to_string(),
            });
        }
        Ok(Self {
            product_id,
            user_id: int_field(fields, "user_id")?,
            purchase_amount,
            is_paid: bool_field(fields, "is_paid")?,
        })
    }

    /// The mirror has no deleted flag; a nulled product id stands in for it.
    #[must_use]
    pub fn into_view(self, id: i64) -> CartItemView {
        CartItemView {
            id,
            user_id: self.user_id,
            product_id: self.product_id,
            purchase_amount: self.purchase_amount,
            is_paid: self.is_paid,
            is_product_deleted: self.product_id.is_none(),
        }
    }
}

impl From<&CartItem> for CartItemMirror {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            user_id: item.user_id,
            purchase_amount: item.purchase_amount,
            is_paid: item.is_paid,
        }
    }
}
