//! Background replay of the offline queue.
//!
//! A pass walks the queue oldest-first and hands each entry to the
//! [`Replayer`]. Successful entries are removed; failed ones get their retry
//! count bumped and stay queued for the next pass. Passes never overlap: a
//! pass requested while another runs is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};

use pos_models::{PendingRequest, SyncReport, SyncStatus};

use crate::config::OfflineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::OfflineResult;
use crate::metrics::{record_replay, record_sync_pass};
use crate::queue::OfflineQueue;

/// Sends one queued mutation to the backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Replayer: Send + Sync {
    async fn replay(&self, request: &PendingRequest) -> OfflineResult<()>;
}

/// Clears the syncing flag even if the pass is cancelled.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a status listener; dropping it unsubscribes.
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Drives sync passes and publishes their status.
pub struct SyncScheduler {
    queue: Arc<OfflineQueue>,
    replayer: Arc<dyn Replayer>,
    connectivity: ConnectivityMonitor,
    config: OfflineConfig,
    is_syncing: AtomicBool,
    status: watch::Sender<SyncStatus>,
    trigger: Notify,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        queue: Arc<OfflineQueue>,
        replayer: Arc<dyn Replayer>,
        connectivity: ConnectivityMonitor,
        config: OfflineConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let (shutdown, _) = watch::channel(false);

        Self {
            queue,
            replayer,
            connectivity,
            config,
            is_syncing: AtomicBool::new(false),
            status,
            trigger: Notify::new(),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    /// Latest published status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Call `listener` with the current status and then on every change.
    /// Rapid successive changes may be coalesced into the latest one.
    pub fn on_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + 'static,
    {
        let mut rx = self.status.subscribe();
        let handle = tokio::spawn(async move {
            let current = rx.borrow_and_update().clone();
            listener(&current);
            while rx.changed().await.is_ok() {
                let status = rx.borrow_and_update().clone();
                listener(&status);
            }
        });
        Subscription { handle }
    }

    /// Re-read the queue size into the published status.
    pub async fn refresh_status(&self) {
        let pending = self.queue.size().await;
        self.status.send_modify(|s| s.pending_count = pending);
    }

    /// Ask the background loop for a pass. Ignored while a pass is running.
    pub fn request_sync(&self) {
        if self.is_syncing() {
            debug!("Sync already in progress, ignoring request");
            return;
        }
        self.trigger.notify_one();
    }

    /// Start the background loop: a pass now, then every sync interval,
    /// whenever connectivity comes back, and on `request_sync`.
    pub async fn start_sync(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Sync loop already running");
            return;
        }

        self.shutdown.send_replace(false);
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut online_rx = self.connectivity.subscribe();
        let scheduler = Arc::clone(self);

        info!(interval_secs = self.config.sync_interval.as_secs(), "Starting sync loop");

        *worker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.sync_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let run = tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        false
                    }
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        *online_rx.borrow_and_update()
                    }
                    _ = scheduler.trigger.notified() => true,
                    _ = interval.tick() => true,
                };

                if run {
                    scheduler.sync_queue().await;
                    // Connectivity flips during the pass are covered by it
                    let _ = online_rx.borrow_and_update();
                    interval.reset();
                }
            }
            info!("Sync loop stopped");
        }));
    }

    /// Stop the background loop, waiting briefly for a running pass.
    pub async fn stop_sync(&self) {
        self.shutdown.send_replace(true);

        let Some(handle) = self.worker.lock().await.take() else {
            return;
        };
        let abort = handle.abort_handle();
        if tokio::time::timeout(self.config.shutdown_timeout, handle).await.is_err() {
            warn!("Sync pass did not finish in time, aborting");
            abort.abort();
        }
    }

    /// Run one pass now.
    ///
    /// Returns `None` without doing anything when offline or when another
    /// pass is already running.
    pub async fn sync_queue(&self) -> Option<SyncReport> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync");
            return None;
        }

        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress, dropping request");
            return None;
        }
        let _guard = SyncGuard(&self.is_syncing);

        Some(self.run_pass().instrument(info_span!("sync_pass")).await)
    }

    async fn run_pass(&self) -> SyncReport {
        let pending = self.queue.size().await;
        if pending == 0 {
            self.status.send_modify(|s| {
                s.is_syncing = false;
                s.pending_count = 0;
                s.success_count = 0;
                s.fail_count = 0;
            });
            return SyncReport::default();
        }

        let start = Instant::now();
        self.status.send_modify(|s| {
            s.is_syncing = true;
            s.pending_count = pending;
        });

        let mut report = SyncReport::default();
        let mut cursor: Option<u64> = None;

        loop {
            let next = match cursor {
                None => self.queue.get_next().await,
                Some(seq) => self.queue.get_next_after(seq).await,
            };
            let Some(entry) = next else {
                break;
            };
            cursor = Some(entry.seq);

            match self.replayer.replay(&entry).await {
                Ok(()) => {
                    report.success_count += 1;
                    record_replay(true);
                    if let Err(e) = self.queue.remove(&entry.id).await {
                        warn!(id = %entry.id, error = %e, "Replayed entry could not be removed");
                    }
                }
                Err(e) => {
                    report.fail_count += 1;
                    record_replay(false);
                    warn!(
                        id = %entry.id,
                        endpoint = %entry.endpoint,
                        retry_count = entry.retry_count + 1,
                        error = %e,
                        "Replay failed, keeping entry"
                    );
                    if let Err(e) = self.queue.increment_retry(&entry.id).await {
                        warn!(id = %entry.id, error = %e, "Retry count could not be saved");
                    }
                }
            }
        }

        let remaining = self.queue.size().await;
        self.status.send_modify(|s| {
            s.is_syncing = false;
            s.pending_count = remaining;
            s.last_sync_time = Some(Utc::now());
            s.success_count = report.success_count;
            s.fail_count = report.fail_count;
        });
        record_sync_pass(start.elapsed().as_millis() as f64);

        info!(
            succeeded = report.success_count,
            failed = report.fail_count,
            remaining,
            "Sync pass finished"
        );
        report
    }
}
