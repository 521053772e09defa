//! Submission queue: deliver once, otherwise persist and retry later.
//!
//! A failed write is never reported as a failure to the caller. It lands in the
//! local backlog and the caller gets `Deferred`. Retry sweeps are bounded (one
//! attempt per queued item) and never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backlog::{BacklogStorage, QueuedSubmission};
use crate::connectivity::{Connectivity, ConnectivityNotifier};
use crate::store::{Destination, ReportStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DeliveryOutcome {
    Delivered { key: String },
    /// Accepted and persisted locally; will be retried.
    Deferred { entry_id: String },
    /// Neither delivered nor persisted. Only produced by callers that keep
    /// going after a backlog failure.
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, DeliveryOutcome::Deferred { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Delivered { key } => Some(key),
            DeliveryOutcome::Deferred { .. } | DeliveryOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySummary {
    pub retried: usize,
    pub delivered: usize,
    pub still_pending: usize,
    /// True when another sweep was already running and this call did nothing.
    pub skipped: bool,
}

pub struct SubmissionQueue {
    store: Arc<dyn ReportStore>,
    backlog: Arc<dyn BacklogStorage>,
    // Serializes read-modify-write cycles on the backlog list.
    backlog_lock: Mutex<()>,
    sweeping: AtomicBool,
    write_timeout: Duration,
    connectivity: Option<ConnectivityNotifier>,
}

/// Clears the in-flight flag however the sweep ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SubmissionQueue {
    pub fn new(
        store: Arc<dyn ReportStore>,
        backlog: Arc<dyn BacklogStorage>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backlog,
            backlog_lock: Mutex::new(()),
            sweeping: AtomicBool::new(false),
            write_timeout,
            connectivity: None,
        }
    }

    /// Report write outcomes to `notifier`: a deferral marks the store offline,
    /// a delivery marks it online again.
    pub fn with_connectivity(mut self, notifier: ConnectivityNotifier) -> Self {
        self.connectivity = Some(notifier);
        self
    }

    fn observe(&self, state: Connectivity) {
        if let Some(n) = &self.connectivity {
            n.set(state);
        }
    }

    async fn try_write(&self, dest: Destination, payload: &Value) -> Result<String> {
        match tokio::time::timeout(self.write_timeout, self.store.push(dest, payload)).await {
            Ok(res) => res,
            Err(_) => Err(anyhow!(
                "store write to {} timed out after {:?}",
                dest.as_path(),
                self.write_timeout
            )),
        }
    }

    /// One delivery attempt; on any failure the payload is persisted locally.
    ///
    /// Only a failure of the local backlog itself is returned as an error.
    pub async fn submit(&self, dest: Destination, payload: Value) -> Result<DeliveryOutcome> {
        match self.try_write(dest, &payload).await {
            Ok(key) => {
                self.observe(Connectivity::Online);
                Ok(DeliveryOutcome::Delivered { key })
            }
            Err(e) => {
                warn!(target: "queue", path = dest.as_path(), error = %e, "delivery failed; deferring");
                self.observe(Connectivity::Offline);
                let entry = QueuedSubmission::new(dest, payload, Utc::now());
                let entry_id = entry.id.clone();
                self.enqueue(entry).await?;
                counter!("triage_reports_deferred_total", "path" => dest.as_path()).increment(1);
                Ok(DeliveryOutcome::Deferred { entry_id })
            }
        }
    }

    async fn enqueue(&self, entry: QueuedSubmission) -> Result<()> {
        let _g = self.backlog_lock.lock().await;
        let mut items = self.backlog.load().await?;
        if let Some(existing) = items.iter_mut().find(|q| q.id == entry.id) {
            existing.attempts += 1;
        } else {
            items.push(entry);
        }
        self.backlog.save(&items).await?;
        gauge!("triage_backlog_size").set(items.len() as f64);
        Ok(())
    }

    /// Attempt every queued item once. Overlapping calls return `skipped`.
    pub async fn retry_pending(&self) -> Result<RetrySummary> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(RetrySummary {
                skipped: true,
                ..RetrySummary::default()
            });
        }
        let _sweep = SweepGuard(&self.sweeping);
        counter!("triage_retry_sweeps_total").increment(1);

        let snapshot = {
            let _g = self.backlog_lock.lock().await;
            self.backlog.load().await?
        };
        if snapshot.is_empty() {
            gauge!("triage_backlog_size").set(0.0);
            return Ok(RetrySummary::default());
        }

        // Writes happen outside the lock so new submissions can still enqueue.
        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for item in &snapshot {
            match self.try_write(item.path, &item.payload).await {
                Ok(key) => {
                    info!(target: "queue", entry = %item.id, path = item.path.as_path(), %key, "queued report delivered");
                    delivered.push(item.id.clone());
                }
                Err(e) => {
                    warn!(target: "queue", entry = %item.id, path = item.path.as_path(), error = %e, "retry failed; keeping entry");
                    failed.push(item.id.clone());
                }
            }
        }

        let remaining = {
            let _g = self.backlog_lock.lock().await;
            let mut items = self.backlog.load().await?;
            items.retain(|q| !delivered.contains(&q.id));
            for q in items.iter_mut().filter(|q| failed.contains(&q.id)) {
                q.attempts += 1;
            }
            self.backlog.save(&items).await?;
            items.len()
        };
        gauge!("triage_backlog_size").set(remaining as f64);
        if failed.is_empty() {
            self.observe(Connectivity::Online);
        } else if delivered.is_empty() {
            self.observe(Connectivity::Offline);
        }

        Ok(RetrySummary {
            retried: snapshot.len(),
            delivered: delivered.len(),
            still_pending: remaining,
            skipped: false,
        })
    }

    pub fn store_is_durable(&self) -> bool {
        self.store.is_durable()
    }

    pub async fn pending_count(&self) -> Result<usize> {
        let _g = self.backlog_lock.lock().await;
        Ok(self.backlog.load().await?.len())
    }

    pub async fn pending(&self) -> Result<Vec<QueuedSubmission>> {
        let _g = self.backlog_lock.lock().await;
        self.backlog.load().await
    }
}

/// Run a retry sweep on every offline → online transition.
pub fn spawn_retry_on_reconnect(
    queue: Arc<SubmissionQueue>,
    mut rx: watch::Receiver<Connectivity>,
) -> JoinHandle<()> {
    // Read the starting state before spawning so an immediate transition is not missed.
    let mut last = *rx.borrow_and_update();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let now = *rx.borrow_and_update();
            if last == Connectivity::Offline && now == Connectivity::Online {
                match queue.retry_pending().await {
                    Ok(s) => info!(
                        target: "queue",
                        retried = s.retried,
                        delivered = s.delivered,
                        still_pending = s.still_pending,
                        "reconnect sweep finished"
                    ),
                    Err(e) => warn!(target: "queue", error = %e, "reconnect sweep failed"),
                }
            }
            last = now;
        }
    })
}

/// Sweep the backlog every `interval` while it holds anything.
///
/// Covers deployments without a connectivity probe, where nothing would
/// otherwise publish the transition back to online.
pub fn spawn_backlog_sweeper(queue: Arc<SubmissionQueue>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match queue.pending_count().await {
                Ok(0) => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "queue", error = %e, "backlog unreadable; sweep skipped");
                    continue;
                }
            }
            match queue.retry_pending().await {
                Ok(s) if !s.skipped => info!(
                    target: "queue",
                    retried = s.retried,
                    delivered = s.delivered,
                    still_pending = s.still_pending,
                    "periodic sweep finished"
                ),
                Ok(_) => {}
                Err(e) => warn!(target: "queue", error = %e, "periodic sweep failed"),
            }
        }
    })
}
