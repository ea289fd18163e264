// src/app.rs
//! Wires providers, coordinator, scheduler and the status API together and
//! owns the shutdown order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::ingest::poller::spawn_poller;
use crate::ingest::providers::ProviderSlot;
use crate::metrics::Metrics;
use crate::pipeline::Coordinator;
use crate::publish::Publisher;
use crate::rewrite::Rewriter;
use crate::sanitize::Sanitizer;
use crate::scheduler::{Scheduler, SchedulerHandle};
use crate::store::{JsonSeenStore, SeenStore, StatsFile};

/// A running relay.
pub struct Relay {
    stop: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
    coordinator: JoinHandle<()>,
    scheduler: SchedulerHandle,
    scheduler_join: JoinHandle<()>,
    api: Option<JoinHandle<()>>,
    seen: Arc<dyn SeenStore>,
}

/// Keep providers whose `verify` passes. None left is a startup failure.
pub async fn verify_providers(slots: Vec<ProviderSlot>) -> Result<Vec<ProviderSlot>> {
    let mut usable = Vec::with_capacity(slots.len());
    for slot in slots {
        let name = slot.provider.name();
        match slot.provider.verify().await {
            Ok(()) => {
                tracing::info!(target: "ingest", provider = name, every_secs = slot.every.as_secs(), "source ready");
                usable.push(slot);
            }
            Err(e) => tracing::error!(target: "ingest", provider = name, error = %e, "source unusable"),
        }
    }
    if usable.is_empty() {
        bail!("no usable ingestion source");
    }
    Ok(usable)
}

impl Relay {
    pub async fn start(
        cfg: &AppConfig,
        providers: Vec<ProviderSlot>,
        publisher: Arc<dyn Publisher>,
        metrics: Option<Metrics>,
    ) -> Result<Self> {
        let providers = verify_providers(providers).await?;

        std::fs::create_dir_all(&cfg.storage.data_dir)
            .with_context(|| format!("creating data dir {}", cfg.storage.data_dir.display()))?;
        let seen: Arc<dyn SeenStore> = Arc::new(JsonSeenStore::open(
            cfg.storage.seen_path(),
            chrono::Duration::days(cfg.storage.seen_retention_days),
        ));

        let rewriter = Rewriter::from_config(&cfg.rewrite)?;
        let backend = rewriter.backend_name();

        let (scheduler, scheduler_join) = Scheduler::new(&cfg.schedule, publisher, seen.clone())
            .with_persistence(
                StatsFile::new(cfg.storage.stats_path()),
                cfg.storage.queue_path(),
            )
            .spawn();

        let (tx, rx) = mpsc::channel(cfg.ingest.channel_capacity);
        let coordinator = Coordinator::new(
            seen.clone(),
            cfg.filter.clone(),
            rewriter,
            Sanitizer::new(&cfg.publish.signature, &cfg.publish.source_label),
            scheduler.clone(),
        )
        .spawn(rx);

        let (stop, stop_rx) = watch::channel(false);
        let pollers = providers
            .into_iter()
            .map(|slot| spawn_poller(slot.provider, slot.every, tx.clone(), stop_rx.clone()))
            .collect();
        // pollers hold the only senders; the coordinator ends when they do
        drop(tx);

        let api = match (cfg.api.enabled, metrics) {
            (true, Some(metrics)) => {
                let state = AppState {
                    scheduler: scheduler.clone(),
                    seen: seen.clone(),
                    backend,
                    started_at: Utc::now(),
                };
                let router = api::router(state, &metrics);
                let listener = tokio::net::TcpListener::bind(&cfg.api.bind)
                    .await
                    .with_context(|| format!("binding status api on {}", cfg.api.bind))?;
                tracing::info!(bind = %cfg.api.bind, "status api listening");
                let mut stop_api = stop_rx.clone();
                Some(tokio::spawn(async move {
                    let served = axum::serve(listener, router)
                        .with_graceful_shutdown(async move {
                            let _ = stop_api.wait_for(|s| *s).await;
                        })
                        .await;
                    if let Err(e) = served {
                        tracing::error!(error = %e, "status api failed");
                    }
                }))
            }
            _ => None,
        };

        Ok(Self {
            stop,
            pollers,
            coordinator,
            scheduler,
            scheduler_join,
            api,
            seen,
        })
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn seen(&self) -> Arc<dyn SeenStore> {
        self.seen.clone()
    }

    /// Pollers stop, the coordinator finishes what is buffered, the scheduler
    /// finishes its batch and persists the queue.
    pub async fn shutdown(self) {
        tracing::info!("shutting down");
        let _ = self.stop.send(true);
        for p in self.pollers {
            let _ = p.await;
        }
        if tokio::time::timeout(Duration::from_secs(120), self.coordinator)
            .await
            .is_err()
        {
            tracing::warn!(target: "ingest", "coordinator did not finish in time");
        }
        self.scheduler.shutdown().await;
        let _ = self.scheduler_join.await;
        if let Some(api) = self.api {
            let _ = api.await;
        }
        tracing::info!("shutdown complete");
    }
}
