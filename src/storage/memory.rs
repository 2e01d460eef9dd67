// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`CacheStore`] with Redis-like TTL semantics.
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive it with
//! `tokio::time::pause()` / `advance()`. Reads and writes can be made to fail
//! on demand to exercise the coordinator's degradation paths.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::traits::{CacheStore, StorageError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

pub struct InMemoryCache {
    data: DashMap<String, Entry>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::Backend(format!(
        "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
        key
    ))
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| e.value().is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    /// Whether `key` exists and has not expired.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Remaining TTL of a live key.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.live(key).map(|e| e.expires_at.saturating_duration_since(now))
    }

    /// Make every read return a backend error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write (including deletes) return a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<(), StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".into()));
        }
        Ok(())
    }

    /// Snapshot of a live entry; expired entries are dropped on the way.
    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.data.get(key).map(|e| e.value().clone())?;
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.data.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_read()?;
        match self.live(key).map(|e| e.value) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.check_write()?;
        self.data.insert(
            key.to_string(),
            Entry { value: Value::Text(value.to_string()), expires_at: Instant::now() + ttl },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.data.remove(key);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StorageError> {
        self.check_read()?;
        match self.live(key).map(|e| e.value) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(h.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        self.check_read()?;
        match self.live(key).map(|e| e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StorageError> {
        self.check_write()?;
        if fields.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.value = Value::Hash(HashMap::new());
        }
        match &mut entry.value {
            Value::Hash(h) => {
                for (field, value) in fields {
                    h.insert((*field).to_string(), value.clone());
                }
            }
            _ => return Err(wrong_type(key)),
        }
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn set_add(&self, key: &str, members: &[String], ttl: Duration) -> Result<(), StorageError> {
        self.check_write()?;
        if members.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entry = self.data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.value = Value::Set(BTreeSet::new());
        }
        match &mut entry.value {
            Value::Set(s) => s.extend(members.iter().cloned()),
            _ => return Err(wrong_type(key)),
        }
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StorageError> {
        self.check_write()?;
        let now = Instant::now();
        let emptied = match self.data.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => match &mut entry.value {
                Value::Set(s) => {
                    s.remove(member);
                    s.is_empty()
                }
                _ => return Err(wrong_type(key)),
            },
            _ => false,
        };
        // Redis drops a set once its last member is removed
        if emptied {
            self.data.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StorageError> {
        self.check_read()?;
        match self.live(key).map(|e| e.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(s)) => Ok(s.into_iter().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check_read()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .data
            .iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().is_live(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
