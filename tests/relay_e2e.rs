// tests/relay_e2e.rs
//
// Whole relay in-process: fixture file → coordinator → scheduler → mock publisher,
// with real JSON documents in a temp data dir.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rewrite_relay::config::AppConfig;
use rewrite_relay::ingest::providers::build_providers;
use rewrite_relay::ingest::types::{ItemKey, Origin, SourceItem, SourceKind};
use rewrite_relay::publish::MockPublisher;
use rewrite_relay::store::{JsonSeenStore, SeenStore, StatsFile};
use rewrite_relay::Relay;

fn item(provider: &str, id: &str, text: &str, kind: SourceKind) -> SourceItem {
    SourceItem {
        key: ItemKey::new(provider, id),
        text: text.into(),
        origin: Origin {
            title: "TON Community".into(),
            ..Default::default()
        },
        published_at: Utc::now(),
        engagement: Default::default(),
        media: None,
        kind,
        forwarded: false,
        reply: false,
    }
}

fn write_fixture(path: &Path) {
    let items = vec![
        item(
            "telegram",
            "-1001/10",
            "TON foundation opens a new grant round for wallet developers this week. #ton #grants",
            SourceKind::Generic,
        ),
        item(
            "twitter",
            "1799",
            "Toncoin staking volume hit a record after the latest validator update landed.",
            SourceKind::Attributed {
                reference: "https://twitter.com/ton_blockchain/status/1799".into(),
            },
        ),
        item("telegram", "-1001/11", "gm", SourceKind::Generic),
    ];
    std::fs::write(path, serde_json::to_string_pretty(&items).unwrap()).unwrap();
}

fn config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.ingest.fixture_path = Some(dir.join("fixture.json"));
    cfg.ingest.poll_interval_secs = 1;
    cfg.schedule.first_delay_secs = 0;
    cfg.schedule.min_interval_minutes = 0;
    cfg.schedule.max_interval_minutes = 0;
    cfg.schedule.tick_secs = 1;
    cfg.publish.target_chat = "@ton_boom".into();
    cfg.storage.data_dir = dir.join("data");
    cfg.api.enabled = false;
    cfg
}

async fn wait_for_sends(publisher: &MockPublisher, n: usize) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while publisher.attempts() < n {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("publisher never reached expected sends");
}

#[tokio::test]
async fn fixture_items_are_rewritten_signed_and_published() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(&dir.path().join("fixture.json"));
    let cfg = config(dir.path());

    let publisher = Arc::new(MockPublisher::new());
    let providers = build_providers(&cfg).unwrap();
    let relay = Relay::start(&cfg, providers, publisher.clone(), None)
        .await
        .unwrap();

    wait_for_sends(&publisher, 2).await;
    relay.shutdown().await;

    let sent = publisher.sent();
    assert_eq!(sent.len(), 2, "short post must be filtered: {sent:?}");
    assert!(sent.iter().all(|t| t.ends_with("@ton_boom")));
    assert!(sent.iter().all(|t| !t.contains('#')), "hashtags stripped: {sent:?}");
    assert!(
        sent.iter().any(|t| t.contains(
            "Source: https://twitter.com/ton_blockchain/status/1799\n@ton_boom"
        )),
        "attributed post carries source line: {sent:?}"
    );

    let data = dir.path().join("data");
    let seen = JsonSeenStore::open(data.join("seen.json"), chrono::Duration::days(30));
    assert!(seen.has(&ItemKey::new("telegram", "-1001/10")));
    assert!(seen.has(&ItemKey::new("twitter", "1799")));
    assert!(!seen.has(&ItemKey::new("telegram", "-1001/11")));

    let stats = StatsFile::new(data.join("stats.json")).load();
    assert_eq!(stats.total_posts, 2);
    assert_eq!(stats.posts_today, 2);
    assert!(stats.last_post_time.is_some());

    let queue: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(data.join("queue.json")).unwrap()).unwrap();
    assert_eq!(queue["entries"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn restart_does_not_republish_seen_items() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(&dir.path().join("fixture.json"));
    let cfg = config(dir.path());

    let first = Arc::new(MockPublisher::new());
    let relay = Relay::start(&cfg, build_providers(&cfg).unwrap(), first.clone(), None)
        .await
        .unwrap();
    wait_for_sends(&first, 2).await;
    relay.shutdown().await;

    let second = Arc::new(MockPublisher::new());
    let relay = Relay::start(&cfg, build_providers(&cfg).unwrap(), second.clone(), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let snap = relay.scheduler().snapshot().await.unwrap();
    relay.shutdown().await;

    assert_eq!(second.attempts(), 0);
    assert_eq!(snap.queue_depth, 0);
    // the daily counter survives the restart
    assert_eq!(snap.published_today, 2);
}

#[tokio::test]
async fn start_fails_without_any_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.ingest.fixture_path = None;

    let providers = build_providers(&cfg).unwrap();
    assert!(providers.is_empty());
    let err = Relay::start(&cfg, providers, Arc::new(MockPublisher::new()), None)
        .await
        .err()
        .expect("no sources must be a startup error");
    assert!(err.to_string().contains("no usable ingestion source"));
}
