// src/ingest/poller.rs
use crate::ingest::{fetch_normalized, types::SourceItem, types::SourceProvider};
use metrics::counter;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Spawn a polling task for one provider. Items are pushed into `tx`; a full
/// channel back-pressures the poller. Stops when `shutdown` flips to true or the
/// receiver is gone.
pub fn spawn_poller(
    provider: Arc<dyn SourceProvider>,
    every: Duration,
    tx: mpsc::Sender<SourceItem>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                    continue;
                }
            }

            let items = fetch_normalized(provider.as_ref()).await;
            let n = items.len();
            for it in items {
                if tx.send(it).await.is_err() {
                    tracing::debug!(target: "ingest", provider = provider.name(), "coordinator gone; poller exiting");
                    return;
                }
            }
            counter!("relay_poll_runs_total", "provider" => provider.name()).increment(1);
            tracing::debug!(target: "ingest", provider = provider.name(), items = n, "poll tick");
        }
        tracing::info!(target: "ingest", provider = provider.name(), "poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::providers::fixture::FixtureProvider;
    use crate::ingest::types::{ItemKey, Origin, SourceItem};
    use chrono::Utc;

    fn item(id: &str) -> SourceItem {
        SourceItem {
            key: ItemKey::new("fixture", id),
            text: format!("item {id}"),
            origin: Origin::default(),
            published_at: Utc::now(),
            engagement: Default::default(),
            media: None,
            kind: Default::default(),
            forwarded: false,
            reply: false,
        }
    }

    #[tokio::test]
    async fn poller_forwards_items_and_stops_on_shutdown() {
        let provider = Arc::new(FixtureProvider::from_items(vec![item("1"), item("2")]));
        let (tx, mut rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        let h = spawn_poller(provider, Duration::from_millis(10), tx, stop_rx);

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.key.raw_id, "1");
        assert_eq!(b.key.raw_id, "2");

        stop_tx.send(true).unwrap();
        h.await.unwrap();
        // fixture only emits once; channel closes when the poller drops tx
        assert!(rx.recv().await.is_none());
    }
}
