// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the shop coordinator.

use std::time::Duration;

use tokio::time::Instant;

/// Which side served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Decoded from a live cache entry
    Cache,
    /// Loaded from the durable store (and written back to the cache)
    Store,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "Cache"),
            Self::Store => write!(f, "Store"),
        }
    }
}

/// A read result tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Sourced<T> {
    pub(super) fn cache(value: T) -> Self {
        Self { value, source: Source::Cache }
    }

    pub(super) fn store(value: T) -> Self {
        Self { value, source: Source::Store }
    }

    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.source == Source::Cache
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Time budget of one coordinator call.
#[derive(Debug, Clone, Copy)]
pub(super) struct Deadline {
    at: Instant,
}

impl Deadline {
    pub(super) fn after(budget: Duration) -> Self {
        Self { at: Instant::now() + budget }
    }

    pub(super) fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_display() {
        assert_eq!(format!("{}", Source::Cache), "Cache");
        assert_eq!(format!("{}", Source::Store), "Store");
    }

    #[test]
    fn test_sourced_accessors() {
        let hit = Sourced::cache(5);
        assert!(hit.is_cached());
        assert_eq!(hit.into_inner(), 5);
        assert!(!Sourced::store(()).is_cached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_down() {
        let deadline = Deadline::after(Duration::from_secs(2));
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(deadline.remaining(), Duration::from_millis(500));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
