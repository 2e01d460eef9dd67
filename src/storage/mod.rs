// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends.
//!
//! - [`traits`]: the [`CacheStore`](traits::CacheStore) and
//!   [`DurableStore`](traits::DurableStore) seams
//! - [`redis`]: Redis cache
//! - [`memory`]: in-process cache with the same TTL semantics
//! - [`sql`]: SQLite/MySQL durable store

pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
