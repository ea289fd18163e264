// src/scheduler/mod.rs
//! Publish scheduler actor. It is the only owner of the queue, the day counter
//! and the stats ledger; everything else talks to it through `SchedulerHandle`.

pub mod queue;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ScheduleConfig;
use crate::error::Classify;
use crate::ingest::types::ItemKey;
use crate::publish::{PublishOutcome, Publisher};
use crate::rewrite::RewrittenItem;
use crate::store::{load_or_default, write_json_atomic, SeenStore, StatsFile, StatsLedger, StoreError};
pub use queue::{Admission, Pacing, PublishQueue, QueueEntry};

const COMMAND_BUFFER: usize = 32;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_published_total", "Posts published to the target.");
        describe_counter!(
            "relay_publish_errors_total",
            "Publish attempts that did not succeed, by outcome."
        );
        describe_counter!(
            "relay_admission_rejected_total",
            "Items refused because the daily cap was reached."
        );
        describe_gauge!("relay_queue_depth", "Entries waiting to be published.");
    });
}

#[derive(Debug, thiserror::Error)]
#[error("scheduler task is not running")]
pub struct SchedulerClosed;

enum Command {
    Accept {
        item: Box<RewrittenItem>,
        reply: oneshot::Sender<Admission>,
    },
    IsPending {
        key: ItemKey,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingView {
    pub key: String,
    pub publish_at: DateTime<Utc>,
    pub backend: String,
    pub attempts: u32,
}

/// Point-in-time view served by `/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub queue_depth: usize,
    pub published_today: u32,
    pub daily_cap: u32,
    pub next_publish_at: Option<DateTime<Utc>>,
    pub pending: Vec<PendingView>,
    pub stats: StatsLedger,
}

#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    pub async fn accept(&self, item: RewrittenItem) -> Result<Admission, SchedulerClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Accept {
                item: Box::new(item),
                reply,
            })
            .await
            .map_err(|_| SchedulerClosed)?;
        rx.await.map_err(|_| SchedulerClosed)
    }

    /// Whether `key` is queued right now.
    pub async fn is_pending(&self, key: &ItemKey) -> Result<bool, SchedulerClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::IsPending {
                key: key.clone(),
                reply,
            })
            .await
            .map_err(|_| SchedulerClosed)?;
        rx.await.map_err(|_| SchedulerClosed)
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot, SchedulerClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| SchedulerClosed)?;
        rx.await.map_err(|_| SchedulerClosed)
    }

    /// Let the current batch finish, persist the queue and stop.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDoc {
    #[serde(default)]
    entries: Vec<QueueEntry>,
}

/// Local calendar day source. Rollover and the cap hold key off it.
pub type Today = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct Scheduler {
    queue: PublishQueue<StdRng>,
    today: Today,
    tick: Duration,
    ledger: StatsLedger,
    stats_file: Option<StatsFile>,
    queue_path: Option<PathBuf>,
    publisher: Arc<dyn Publisher>,
    seen: Arc<dyn SeenStore>,
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Start of the local day after `day`, in UTC.
pub fn midnight_after(day: NaiveDate) -> DateTime<Utc> {
    day.succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|t| t.and_local_timezone(Local).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(1))
}

impl Scheduler {
    pub fn new(cfg: &ScheduleConfig, publisher: Arc<dyn Publisher>, seen: Arc<dyn SeenStore>) -> Self {
        Self {
            queue: PublishQueue::new(Pacing::from(cfg), StdRng::from_os_rng()),
            today: Arc::new(local_today),
            tick: Duration::from_secs(cfg.tick_secs.max(1)),
            ledger: StatsLedger::default(),
            stats_file: None,
            queue_path: None,
            publisher,
            seen,
        }
    }

    /// Fixed seed for reproducible spacing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        let pacing = self.queue.pacing().clone();
        self.queue = PublishQueue::new(pacing, StdRng::seed_from_u64(seed));
        self
    }

    /// Replace the local-day source. Call before `with_persistence`.
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    /// Load the ledger and any queue left by a previous run. Restored entries
    /// whose keys are already seen are discarded.
    pub fn with_persistence(mut self, stats: StatsFile, queue_path: impl Into<PathBuf>) -> Self {
        let queue_path = queue_path.into();
        self.ledger = stats.load();
        if self.ledger.roll_day((self.today)()) {
            tracing::info!(target: "scheduler", "new day since last run; daily counter reset");
        }

        let doc: QueueDoc = load_or_default(&queue_path, "queue");
        let total = doc.entries.len();
        let mut keys = std::collections::HashSet::new();
        let entries: Vec<QueueEntry> = doc
            .entries
            .into_iter()
            .filter(|e| !self.seen.has(e.key()) && keys.insert(e.key().clone()))
            .collect();
        if total > 0 {
            tracing::info!(target: "scheduler", restored = entries.len(), discarded = total - entries.len(), "restored queue");
        }
        self.queue.restore(entries, self.ledger.last_post_time);

        self.stats_file = Some(stats);
        self.queue_path = Some(queue_path);
        self
    }

    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        ensure_metrics_described();
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let join = tokio::spawn(self.run(rx));
        (SchedulerHandle { tx }, join)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        gauge!("relay_queue_depth").set(self.queue.len() as f64);
        loop {
            let wake = self.next_wake(Utc::now());
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.persist_queue().await;
                        tracing::info!(target: "scheduler", queued = self.queue.len(), "scheduler stopped");
                        let _ = reply.send(());
                        return;
                    }
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        self.persist_queue().await;
                        return;
                    }
                },
                _ = sleep_opt(wake) => self.drain().await,
            }
        }
    }

    /// Earliest due entry or the tick, whichever is sooner; `None` while empty.
    fn next_wake(&self, now: DateTime<Utc>) -> Option<Duration> {
        let due = self.queue.next_due()?;
        let until = (due - now).to_std().unwrap_or(Duration::ZERO);
        Some(until.min(self.tick))
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Accept { item, reply } => {
                let adm = self.admit(*item).await;
                let _ = reply.send(adm);
            }
            Command::IsPending { key, reply } => {
                let _ = reply.send(self.queue.contains(&key));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { .. } => {}
        }
    }

    async fn roll_day(&mut self) {
        if self.ledger.roll_day((self.today)()) {
            // queue is kept across midnight; only the counter resets
            tracing::info!(target: "scheduler", queued = self.queue.len(), "day rollover; daily counter reset");
            self.save_stats().await;
        }
    }

    async fn admit(&mut self, item: RewrittenItem) -> Admission {
        self.roll_day().await;
        let key = item.source.key.clone();
        let adm = self.queue.accept(item, Utc::now(), self.ledger.posts_today);
        match &adm {
            Admission::Queued { publish_at, depth } => {
                tracing::info!(target: "scheduler", %key, %publish_at, depth, "queued");
                gauge!("relay_queue_depth").set(*depth as f64);
                self.persist_queue().await;
            }
            Admission::CapReached {
                published_today,
                queued,
            } => {
                tracing::info!(target: "scheduler", %key, published_today, queued, cap = self.queue.pacing().daily_cap, "daily cap reached; item dropped");
                counter!("relay_admission_rejected_total").increment(1);
            }
        }
        adm
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            queue_depth: self.queue.len(),
            published_today: self.ledger.posts_today,
            daily_cap: self.queue.pacing().daily_cap,
            next_publish_at: self.queue.next_due(),
            pending: self
                .queue
                .entries()
                .iter()
                .map(|e| PendingView {
                    key: e.key().to_string(),
                    publish_at: e.publish_at,
                    backend: e.item.backend.clone(),
                    attempts: e.attempts,
                })
                .collect(),
            stats: self.ledger.clone(),
        }
    }

    /// Publish every due entry in order. A rate limit stops the batch.
    async fn drain(&mut self) {
        self.roll_day().await;
        let cap = self.queue.pacing().daily_cap;
        let mut due = self.queue.take_due(Utc::now()).into_iter();

        while let Some(entry) = due.next() {
            if self.ledger.posts_today >= cap {
                // restored entries can outlast the cap; hold them for tomorrow
                tracing::debug!(target: "scheduler", cap, "cap reached while draining; holding entries");
                self.queue
                    .defer(std::iter::once(entry).chain(due.by_ref()), midnight_after((self.today)()));
                break;
            }

            let key = entry.key().clone();
            let outcome = self
                .publisher
                .publish(&entry.item.text, entry.item.media.as_ref())
                .await;

            match outcome {
                PublishOutcome::Published => {
                    let today = (self.today)();
                    self.ledger.record_publish(
                        &entry.item.backend,
                        &entry.item.source.origin.title,
                        Utc::now(),
                        today,
                    );
                    self.save_stats().await;
                    self.mark_seen(&key).await;
                    counter!("relay_published_total", "backend" => entry.item.backend.clone()).increment(1);
                    tracing::info!(target: "publish", %key, backend = %entry.item.backend, today = self.ledger.posts_today, "published");
                }
                PublishOutcome::RateLimited(wait) => {
                    counter!("relay_publish_errors_total", "outcome" => "rate_limited").increment(1);
                    let until = Utc::now()
                        + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::seconds(30));
                    match self.queue.reschedule(entry, until) {
                        Ok(()) => {
                            tracing::warn!(target: "publish", %key, retry_in_secs = wait.as_secs(), "rate limited; rescheduled")
                        }
                        Err(dropped) => {
                            tracing::error!(target: "publish", %key, attempts = dropped.attempts, "rate limited too often; dropping");
                            self.mark_seen(&key).await;
                        }
                    }
                    self.queue.defer(due.by_ref(), until);
                    break;
                }
                PublishOutcome::Forbidden(reason) => {
                    counter!("relay_publish_errors_total", "outcome" => "forbidden").increment(1);
                    tracing::error!(target: "publish", %key, %reason, class = "permanent_auth", "target rejected the post; dropping");
                    self.mark_seen(&key).await;
                }
                PublishOutcome::Unknown(reason) => {
                    counter!("relay_publish_errors_total", "outcome" => "unknown").increment(1);
                    tracing::warn!(target: "publish", %key, %reason, "publish failed; dropping");
                    self.mark_seen(&key).await;
                }
            }
        }

        gauge!("relay_queue_depth").set(self.queue.len() as f64);
        self.persist_queue().await;
    }

    async fn mark_seen(&self, key: &ItemKey) {
        let seen = self.seen.clone();
        let k = key.clone();
        if let Some(e) = off_thread(move || seen.mark(&k)).await {
            tracing::warn!(target: "scheduler", %key, class = %e.class(), error = %e, "could not persist seen key");
        }
    }

    async fn save_stats(&self) {
        let Some(file) = self.stats_file.clone() else { return };
        let ledger = self.ledger.clone();
        if let Some(e) = off_thread(move || file.save(&ledger)).await {
            tracing::warn!(target: "scheduler", class = %e.class(), error = %e, "could not persist stats");
        }
    }

    async fn persist_queue(&self) {
        let Some(path) = self.queue_path.clone() else { return };
        let doc = QueueDoc {
            entries: self.queue.entries().to_vec(),
        };
        if let Some(e) = off_thread(move || write_json_atomic(&path, &doc)).await {
            tracing::warn!(target: "scheduler", class = %e.class(), error = %e, "could not persist queue");
        }
    }
}

/// Run a blocking store write on the blocking pool and wait for it, so the
/// fsync never stalls a runtime worker. Returns the store error, if any.
async fn off_thread<F>(write: F) -> Option<StoreError>
where
    F: FnOnce() -> Result<(), StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(write).await {
        Ok(res) => res.err(),
        Err(e) => {
            tracing::error!(target: "scheduler", error = %e, "store write task failed");
            None
        }
    }
}

async fn sleep_opt(d: Option<Duration>) {
    match d {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
