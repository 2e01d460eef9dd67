// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending notification queue kept in the cache.
//!
//! Each entry is one hash under `behind:pending:<op>:<id>` holding
//! `{id, email, message, op}` with a short TTL. There is no in-flight
//! state: an entry is either still waiting, or it was dispatched and
//! deleted, or it expired unseen.
//!
//! ```text
//! Created ──tick──▶ Dispatched & Deleted
//!    │
//!    └──TTL──▶ Expired (lost)
//! ```

pub mod worker;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::keys;
use crate::model::User;
use crate::storage::traits::{CacheStore, StorageError};

pub use worker::{FlushReport, FlushWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingOpKind {
    Register,
    Buy,
}

impl PendingOpKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Buy => "buy",
        }
    }

    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "register" => Some(Self::Register),
            "buy" => Some(Self::Buy),
            _ => None,
        }
    }
}

impl fmt::Display for PendingOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PendingDecodeError {
    #[error("Pending entry is missing field '{0}'")]
    MissingField(&'static str),
    #[error("Pending entry has unknown op '{0}'")]
    UnknownOp(String),
    #[error("Pending entry has invalid id '{0}'")]
    InvalidId(String),
}

/// One queued notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: PendingOpKind,
    /// User id for `register`, cart item id for `buy`
    pub subject_id: i64,
    pub recipient: String,
    pub message: String,
}

impl PendingOperation {
    #[must_use]
    pub fn register(user: &User) -> Self {
        Self {
            kind: PendingOpKind::Register,
            subject_id: user.id,
            recipient: user.email.clone(),
            message: format!("Welcome to the shop, {}", user.username),
        }
    }

    #[must_use]
    pub fn buy(cart_item_id: i64, recipient: &str, product_id: i64, purchase_amount: i64) -> Self {
        Self {
            kind: PendingOpKind::Buy,
            subject_id: cart_item_id,
            recipient: recipient.to_string(),
            message: format!(
                "Purchase of product {} confirmed, total items {}",
                product_id, purchase_amount
            ),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        keys::pending(self.kind.as_str(), self.subject_id)
    }

    #[must_use]
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.subject_id.to_string()),
            ("email", self.recipient.clone()),
            ("message", self.message.clone()),
            ("op", self.kind.as_str().to_string()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, PendingDecodeError> {
        let get = |name: &'static str| {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or(PendingDecodeError::MissingField(name))
        };

        let op = get("op")?;
        let kind = PendingOpKind::parse(op).ok_or_else(|| PendingDecodeError::UnknownOp(op.to_string()))?;
        let raw_id = get("id")?;
        let subject_id = raw_id
            .parse::<i64>()
            .map_err(|_| PendingDecodeError::InvalidId(raw_id.to_string()))?;

        Ok(Self {
            kind,
            subject_id,
            recipient: get("email")?.to_string(),
            message: get("message")?.to_string(),
        })
    }
}

/// Handle on the queue. Cheap to clone.
#[derive(Clone)]
pub struct PendingQueue {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl PendingQueue {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Write the entry and its TTL in one step. Re-enqueueing the same
    /// subject overwrites the earlier entry.
    pub async fn enqueue(&self, op: &PendingOperation) -> Result<(), StorageError> {
        let key = op.key();
        self.cache.hash_set(&key, &op.to_fields(), self.ttl).await?;
        crate::metrics::record_pending_enqueued(op.kind.as_str());
        debug!(key = %key, op = %op.kind, "Pending operation enqueued");
        Ok(())
    }

    /// Keys of all live entries.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.cache.scan_prefix(keys::PENDING_PREFIX).await
    }

    /// Raw fields of one entry; empty when it vanished meanwhile.
    pub async fn read(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        self.cache.hash_get_all(key).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.cache.delete(key).await
    }
}
