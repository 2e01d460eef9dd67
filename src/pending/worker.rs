// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic drain of the pending queue.
//!
//! One spawned task runs the ticks sequentially. [`FlushWorker::flush_once`]
//! takes the same tick lock, so a manual flush never overlaps a scheduled
//! one. Stopping is observed between ticks; a tick in progress always runs
//! to completion.
//!
//! Per entry: read → decode → send → delete. The delete happens whatever
//! the send outcome, so each entry is attempted at most once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{PendingOperation, PendingQueue};
use crate::notify::NotificationSender;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Keys returned by the scan
    pub scanned: usize,
    /// Entries handed to the sender successfully
    pub dispatched: usize,
    /// Entries whose send failed or that could not be decoded (all deleted)
    pub failed: usize,
    /// Entries left alone: vanished before the read, or unreadable
    pub skipped: usize,
}

struct WorkerInner {
    queue: PendingQueue,
    sender: Arc<dyn NotificationSender>,
    tick_lock: tokio::sync::Mutex<()>,
}

impl WorkerInner {
    async fn tick(&self) -> FlushReport {
        let _guard = self.tick_lock.lock().await;
        let started = Instant::now();
        let mut report = FlushReport::default();

        let keys = match self.queue.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Pending queue scan failed, skipping tick");
                return report;
            }
        };
        report.scanned = keys.len();

        for key in keys {
            let fields = match self.queue.read(&key).await {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read pending entry");
                    report.skipped += 1;
                    crate::metrics::record_pending_outcome("skipped");
                    continue;
                }
            };
            if fields.is_empty() {
                report.skipped += 1;
                crate::metrics::record_pending_outcome("skipped");
                continue;
            }

            match PendingOperation::from_fields(&fields) {
                Ok(op) => match self.sender.send(&op.recipient, &op.message).await {
                    Ok(()) => {
                        debug!(key = %key, op = %op.kind, "Pending operation dispatched");
                        report.dispatched += 1;
                        crate::metrics::record_pending_outcome("dispatched");
                    }
                    Err(e) => {
                        warn!(key = %key, op = %op.kind, error = %e, "Dispatch failed, dropping entry");
                        report.failed += 1;
                        crate::metrics::record_pending_outcome("failed");
                    }
                },
                Err(e) => {
                    warn!(key = %key, error = %e, "Malformed pending entry, dropping");
                    report.failed += 1;
                    crate::metrics::record_pending_outcome("failed");
                }
            }

            if let Err(e) = self.queue.remove(&key).await {
                warn!(key = %key, error = %e, "Failed to delete pending entry");
            }
        }

        crate::metrics::record_flush_tick(started.elapsed());
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                dispatched = report.dispatched,
                failed = report.failed,
                skipped = report.skipped,
                "Pending queue flushed"
            );
        }
        report
    }
}

/// The spawned task and its stop signal.
struct RunningTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Everything `start`, `stop` and `shutdown` change, behind one lock.
#[derive(Default)]
struct TaskSlots {
    active: Option<RunningTask>,
    /// Stopped tasks not yet joined; they may still be finishing a tick
    stopping: Vec<JoinHandle<()>>,
}

/// Background drain of the pending queue.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use shop_cache::pending::{FlushWorker, PendingQueue};
/// # use shop_cache::notify::LogSender;
/// # use shop_cache::storage::memory::InMemoryCache;
/// # async fn example() {
/// let queue = PendingQueue::new(Arc::new(InMemoryCache::new()), Duration::from_secs(600));
/// let worker = FlushWorker::new(queue, Arc::new(LogSender), Duration::from_secs(10));
///
/// worker.start();
/// // ...
/// worker.shutdown().await;
/// # }
/// ```
pub struct FlushWorker {
    inner: Arc<WorkerInner>,
    interval: Duration,
    tasks: Mutex<TaskSlots>,
}

impl FlushWorker {
    pub fn new(queue: PendingQueue, sender: Arc<dyn NotificationSender>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                queue,
                sender,
                tick_lock: tokio::sync::Mutex::new(()),
            }),
            interval: interval.max(Duration::from_millis(1)),
            tasks: Mutex::new(TaskSlots::default()),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.lock().active.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the periodic task. No-op when already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.active.is_some() {
            debug!("Flush worker already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            // First tick one full interval after start
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        inner.tick().await;
                    }
                }
            }
            debug!("Flush worker task exited");
        });

        tasks.active = Some(RunningTask { stop_tx, handle });
        crate::metrics::set_worker_running(true);
        info!(interval_ms = interval.as_millis() as u64, "Flush worker started");
    }

    /// Signal the task to stop and return immediately. Idempotent.
    ///
    /// The stopped task is kept so [`shutdown`](Self::shutdown) can wait
    /// for it, even across a later `start`.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.active.take() {
            let _ = task.stop_tx.send(true);
            tasks.stopping.push(task.handle);
            crate::metrics::set_worker_running(false);
            info!("Flush worker stopping");
        }
    }

    /// Stop and wait for every task this worker spawned, including any
    /// in-flight tick, to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handles = std::mem::take(&mut self.tasks.lock().stopping);
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Flush worker task ended abnormally");
            }
        }
        info!("Flush worker stopped");
    }

    #[cfg(test)]
    fn tracked_tasks(&self) -> usize {
        let tasks = self.tasks.lock();
        tasks.stopping.len() + usize::from(tasks.active.is_some())
    }

    /// Run one tick now, serialized with the scheduled ones.
    pub async fn flush_once(&self) -> FlushReport {
        self.inner.tick().await
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;
    use crate::notify::RecordingSender;
    use crate::storage::memory::InMemoryCache;
    use crate::storage::traits::CacheStore;

    const TTL: Duration = Duration::from_secs(600);
    const INTERVAL: Duration = Duration::from_secs(10);

    fn user(id: i64) -> User {
        User {
            id,
            username: format!("user{}", id),
            email: format!("user{}@example.com", id),
            password_hash: "x".into(),
            created_at: 0,
        }
    }

    fn setup() -> (Arc<InMemoryCache>, PendingQueue, Arc<RecordingSender>, FlushWorker) {
        let cache = Arc::new(InMemoryCache::new());
        let queue = PendingQueue::new(cache.clone(), TTL);
        let sender = Arc::new(RecordingSender::new());
        let worker = FlushWorker::new(queue.clone(), sender.clone(), INTERVAL);
        (cache, queue, sender, worker)
    }

    #[tokio::test]
    async fn test_flush_once_dispatches_and_deletes() {
        let (cache, queue, sender, worker) = setup();
        queue.enqueue(&PendingOperation::register(&user(1))).await.unwrap();
        queue.enqueue(&PendingOperation::buy(9, "user2@example.com", 4, 2)).await.unwrap();

        let report = worker.flush_once().await;
        assert_eq!(report, FlushReport { scanned: 2, dispatched: 2, failed: 0, skipped: 0 });

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.contains(&("user1@example.com".into(), "Welcome to the shop, user1".into())));
        assert!(cache.is_empty());

        // Nothing left for the next tick
        assert_eq!(worker.flush_once().await, FlushReport::default());
    }

    #[tokio::test]
    async fn test_malformed_entry_is_dropped_without_dispatch() {
        let (cache, _queue, sender, worker) = setup();
        cache
            .hash_set("behind:pending:refund:3", &[("op", "refund".into()), ("id", "3".into())], TTL)
            .await
            .unwrap();

        let report = worker.flush_once().await;
        assert_eq!(report.failed, 1);
        assert!(sender.sent().is_empty());
        assert!(!cache.contains_key("behind:pending:refund:3"));
    }

    #[tokio::test]
    async fn test_failed_send_still_deletes() {
        let (cache, queue, sender, worker) = setup();
        queue.enqueue(&PendingOperation::register(&user(5))).await.unwrap();
        sender.set_failing(true);

        let report = worker.flush_once().await;
        assert_eq!(report.failed, 1);
        assert!(!cache.contains_key("behind:pending:register:5"));
    }

    #[tokio::test]
    async fn test_scan_failure_leaves_entries_for_later() {
        let (cache, queue, sender, worker) = setup();
        queue.enqueue(&PendingOperation::register(&user(5))).await.unwrap();

        cache.set_fail_reads(true);
        assert_eq!(worker.flush_once().await, FlushReport::default());
        cache.set_fail_reads(false);

        assert!(cache.contains_key("behind:pending:register:5"));
        assert_eq!(worker.flush_once().await.dispatched, 1);
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_abort_tick() {
        let (cache, queue, sender, worker) = setup();
        queue.enqueue(&PendingOperation::register(&user(1))).await.unwrap();
        queue.enqueue(&PendingOperation::register(&user(2))).await.unwrap();

        cache.set_fail_writes(true);
        let report = worker.flush_once().await;
        cache.set_fail_writes(false);

        assert_eq!(report.dispatched, 2);
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_never_dispatched() {
        let (_cache, queue, sender, worker) = setup();
        queue.enqueue(&PendingOperation::register(&user(1))).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(worker.flush_once().await.scanned, 0);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_until_stopped() {
        let (_cache, queue, sender, worker) = setup();
        worker.start();
        worker.start(); // second start is a no-op
        assert!(worker.is_running());

        queue.enqueue(&PendingOperation::register(&user(1))).await.unwrap();
        tokio::time::sleep(INTERVAL + Duration::from_millis(1)).await;
        assert_eq!(sender.sent().len(), 1);

        worker.stop();
        worker.stop();
        assert!(!worker.is_running());

        queue.enqueue(&PendingOperation::register(&user(2))).await.unwrap();
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(sender.sent().len(), 1);

        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_shutdown() {
        let (_cache, queue, sender, worker) = setup();
        worker.start();
        worker.shutdown().await;
        assert!(!worker.is_running());

        worker.start();
        queue.enqueue(&PendingOperation::register(&user(3))).await.unwrap();
        tokio::time::sleep(INTERVAL + Duration::from_millis(1)).await;
        assert_eq!(sender.sent().len(), 1);

        worker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_joins_tasks_stopped_before_a_restart() {
        let (_cache, queue, sender, worker) = setup();
        worker.start();
        worker.stop();
        worker.start();
        assert_eq!(worker.tracked_tasks(), 2);

        queue.enqueue(&PendingOperation::register(&user(4))).await.unwrap();
        tokio::time::sleep(INTERVAL + Duration::from_millis(1)).await;
        assert_eq!(sender.sent().len(), 1);

        worker.shutdown().await;
        assert_eq!(worker.tracked_tasks(), 0);
        assert!(!worker.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_and_stop() {
        let cache = Arc::new(InMemoryCache::new());
        let queue = PendingQueue::new(cache.clone(), TTL);
        let sender = Arc::new(RecordingSender::new());
        let worker = Arc::new(FlushWorker::new(queue.clone(), sender.clone(), Duration::from_millis(5)));

        for _ in 0..200 {
            let starter = Arc::clone(&worker);
            let stopper = Arc::clone(&worker);
            let (started, stopped) = tokio::join!(
                tokio::spawn(async move { starter.start() }),
                tokio::spawn(async move { stopper.stop() }),
            );
            started.unwrap();
            stopped.unwrap();

            // Whichever ran first, one stop now always takes effect
            worker.stop();
            assert!(!worker.is_running());
        }

        worker.shutdown().await;
        assert_eq!(worker.tracked_tasks(), 0);

        queue.enqueue(&PendingOperation::register(&user(8))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sender.sent().is_empty());
    }
}
