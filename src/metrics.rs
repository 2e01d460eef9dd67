// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for shop-cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `shop_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `entity`: store, product, cart_item, ...
//! - `outcome`: hit, miss, corrupt, error
//! - `op`: register, buy

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a cache lookup on a read path
pub fn record_cache_lookup(entity: &'static str, outcome: &'static str) {
    counter!(
        "shop_cache_cache_lookups_total",
        "entity" => entity,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a cache write or invalidation that failed after the durable commit
pub fn record_cache_write_failure(operation: &'static str) {
    counter!(
        "shop_cache_cache_write_failures_total",
        "operation" => operation
    )
    .increment(1);
}

/// Record a stock guard rejection (`source` = cache or store)
pub fn record_stock_rejection(source: &'static str) {
    counter!(
        "shop_cache_stock_rejections_total",
        "source" => source
    )
    .increment(1);
}

/// Record durable store call latency
pub fn record_durable_latency(operation: &'static str, duration: Duration) {
    histogram!(
        "shop_cache_durable_operation_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Record a call that hit its deadline
pub fn record_timeout(backend: &'static str, operation: &'static str) {
    counter!(
        "shop_cache_timeouts_total",
        "backend" => backend,
        "operation" => operation
    )
    .increment(1);
}

/// Record a pending operation written to the queue
pub fn record_pending_enqueued(op: &'static str) {
    counter!(
        "shop_cache_pending_enqueued_total",
        "op" => op
    )
    .increment(1);
}

/// Record the fate of one queue entry (dispatched, failed, skipped)
pub fn record_pending_outcome(outcome: &'static str) {
    counter!(
        "shop_cache_pending_operations_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record flush tick duration
pub fn record_flush_tick(duration: Duration) {
    histogram!("shop_cache_flush_tick_seconds").record(duration.as_secs_f64());
}

/// Set flush worker running flag (0 or 1)
pub fn set_worker_running(running: bool) {
    gauge!("shop_cache_flush_worker_running").set(if running { 1.0 } else { 0.0 });
}

/// Records durable latency when dropped.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_durable_latency(self.operation, self.start.elapsed());
    }
}
