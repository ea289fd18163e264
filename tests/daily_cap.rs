// tests/daily_cap.rs
//
// Cap of two: the third item of the day is rejected at admission, stays unseen,
// and is still rejected after the first two went out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rewrite_relay::config::{AiConfig, FilterConfig, ScheduleConfig};
use rewrite_relay::ingest::types::{ItemKey, Origin, SourceItem};
use rewrite_relay::pipeline::{Coordinator, ItemOutcome};
use rewrite_relay::publish::MockPublisher;
use rewrite_relay::rewrite::Rewriter;
use rewrite_relay::sanitize::Sanitizer;
use rewrite_relay::scheduler::Scheduler;
use rewrite_relay::store::{MemorySeenStore, SeenStore};

fn item(id: &str) -> SourceItem {
    SourceItem {
        key: ItemKey::new("telegram", id),
        text: format!("Gaming guild {id} launches a play-to-earn season on TON with new rewards."),
        origin: Origin {
            title: "Guild News".into(),
            ..Default::default()
        },
        published_at: Utc::now(),
        engagement: Default::default(),
        media: None,
        kind: Default::default(),
        forwarded: false,
        reply: false,
    }
}

#[tokio::test]
async fn third_item_is_dropped_and_left_unseen() {
    let seen = Arc::new(MemorySeenStore::default());
    let publisher = Arc::new(MockPublisher::new());
    let sched = ScheduleConfig {
        daily_cap: 2,
        first_delay_secs: 0,
        min_interval_minutes: 0,
        max_interval_minutes: 0,
        tick_secs: 1,
        ..ScheduleConfig::default()
    };
    let (handle, _join) = Scheduler::new(&sched, publisher.clone(), seen.clone())
        .with_seed(7)
        .spawn();
    let c = Coordinator::new(
        seen.clone(),
        FilterConfig::default(),
        Rewriter::from_config(&AiConfig::default()).unwrap(),
        Sanitizer::new("@ton_boom", "Source"),
        handle.clone(),
    );

    assert!(matches!(c.process(item("1")).await, ItemOutcome::Queued { .. }));
    assert!(matches!(c.process(item("2")).await, ItemOutcome::Queued { .. }));
    assert_eq!(c.process(item("3")).await, ItemOutcome::CapReached);
    assert!(!seen.has(&ItemKey::new("telegram", "3")));

    tokio::time::timeout(Duration::from_secs(5), async {
        while publisher.attempts() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both queued items published");

    let snap = handle.snapshot().await.unwrap();
    assert_eq!(snap.published_today, 2);
    assert_eq!(snap.queue_depth, 0);
    assert!(seen.has(&ItemKey::new("telegram", "1")));
    assert!(seen.has(&ItemKey::new("telegram", "2")));

    // re-delivery of the rejected key is reconsidered, and rejected again today
    assert_eq!(c.process(item("3")).await, ItemOutcome::CapReached);
    assert_eq!(publisher.attempts(), 2);
    handle.shutdown().await;
}
