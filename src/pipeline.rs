// src/pipeline.rs
//! Coordinator: dedup → eligibility → rewrite → sanitize → enqueue, one item
//! at a time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::FilterConfig;
use crate::error::Classify;
use crate::ingest::types::SourceItem;
use crate::ingest::{check_eligibility, SkipReason};
use crate::rewrite::Rewriter;
use crate::sanitize::Sanitizer;
use crate::scheduler::{Admission, SchedulerHandle};
use crate::store::SeenStore;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "relay_dedup_skipped_total",
            "Items skipped because they were already seen or queued."
        );
        describe_counter!("relay_filtered_total", "Items failing the eligibility filter.");
    });
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    AlreadySeen,
    AlreadyQueued,
    Skipped(SkipReason),
    Queued {
        publish_at: DateTime<Utc>,
        backend: String,
    },
    /// Day is full. The key stays unseen so a later re-delivery is reconsidered.
    CapReached,
    SchedulerClosed,
}

pub struct Coordinator {
    seen: Arc<dyn SeenStore>,
    filter: FilterConfig,
    rewriter: Rewriter,
    sanitizer: Sanitizer,
    scheduler: SchedulerHandle,
}

impl Coordinator {
    pub fn new(
        seen: Arc<dyn SeenStore>,
        filter: FilterConfig,
        rewriter: Rewriter,
        sanitizer: Sanitizer,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            seen,
            filter,
            rewriter,
            sanitizer,
            scheduler,
        }
    }

    pub async fn process(&self, item: SourceItem) -> ItemOutcome {
        ensure_metrics_described();
        let key = item.key.clone();

        if self.seen.has(&key) {
            counter!("relay_dedup_skipped_total", "reason" => "seen").increment(1);
            tracing::debug!(target: "ingest", %key, stage = "dedup", "already seen");
            return ItemOutcome::AlreadySeen;
        }
        match self.scheduler.is_pending(&key).await {
            Ok(true) => {
                counter!("relay_dedup_skipped_total", "reason" => "queued").increment(1);
                tracing::debug!(target: "ingest", %key, stage = "dedup", "already queued");
                return ItemOutcome::AlreadyQueued;
            }
            Ok(false) => {}
            Err(_) => return ItemOutcome::SchedulerClosed,
        }

        if let Err(reason) = check_eligibility(&item, &self.filter) {
            counter!("relay_filtered_total", "reason" => reason.as_str()).increment(1);
            tracing::debug!(target: "ingest", %key, stage = "filter", class = %reason.class(), %reason, "skipped");
            return ItemOutcome::Skipped(reason);
        }

        let rewritten = self.rewriter.rewrite(item).await;
        let finalized = self.sanitizer.finalize(rewritten);
        let backend = finalized.backend.clone();

        match self.scheduler.accept(finalized).await {
            Ok(Admission::Queued { publish_at, .. }) => ItemOutcome::Queued { publish_at, backend },
            Ok(Admission::CapReached { .. }) => ItemOutcome::CapReached,
            Err(_) => ItemOutcome::SchedulerClosed,
        }
    }

    /// Consume until every sender is gone or the scheduler stops.
    pub async fn run(self, mut rx: mpsc::Receiver<SourceItem>) {
        tracing::info!(target: "ingest", backend = self.rewriter.backend_name(), "coordinator started");
        while let Some(item) = rx.recv().await {
            if self.process(item).await == ItemOutcome::SchedulerClosed {
                tracing::warn!(target: "ingest", "scheduler gone; coordinator stopping");
                break;
            }
        }
        tracing::info!(target: "ingest", "coordinator stopped");
    }

    pub fn spawn(self, rx: mpsc::Receiver<SourceItem>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }
}
