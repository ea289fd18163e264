// tests/config_load.rs
use std::fs;
use std::path::Path;

use rewrite_relay::config::{AppConfig, ProviderKind};

#[test]
fn shipped_sample_config_parses() {
    let cfg = AppConfig::load_from(Path::new("config/relay.toml")).unwrap();
    assert_eq!(cfg.rewrite.provider_kind().unwrap(), ProviderKind::Local);
    assert_eq!(cfg.schedule.daily_cap, 24);
    assert_eq!(
        (cfg.schedule.min_interval_minutes, cfg.schedule.max_interval_minutes),
        (20, 30)
    );
    assert_eq!(cfg.publish.signature, "@ton_boom");
    assert_eq!(cfg.ingest.twitter_accounts, vec!["ton_blockchain".to_string()]);
    assert!(cfg.storage.seen_path().ends_with("seen.json"));
}

#[test]
fn messy_values_are_repaired_not_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("relay.toml");
    fs::write(
        &p,
        r#"
[ingest]
telegram_channels = [" @a ", "", "@a", "@b"]
twitter_accounts = ["@whale", "whale"]
poll_interval_secs = 0

[schedule]
min_interval_minutes = 40
max_interval_minutes = 10
tick_secs = 0
max_publish_attempts = 0

[storage]
seen_retention_days = -3
"#,
    )
    .unwrap();

    let cfg = AppConfig::load_from(&p).unwrap();
    assert_eq!(cfg.ingest.telegram_channels, vec!["@a".to_string(), "@b".to_string()]);
    assert_eq!(cfg.ingest.twitter_accounts, vec!["whale".to_string()]);
    assert!(cfg.ingest.poll_interval_secs > 0);
    assert_eq!(
        (cfg.schedule.min_interval_minutes, cfg.schedule.max_interval_minutes),
        (10, 40)
    );
    assert!(cfg.schedule.tick_secs > 0);
    assert_eq!(cfg.schedule.max_publish_attempts, 1);
    assert_eq!(cfg.storage.seen_retention_days, 30);
}

#[test]
fn unparsable_file_is_an_error_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("broken.toml");
    fs::write(&p, "[schedule\ndaily_cap = ").unwrap();
    let err = AppConfig::load_from(&p).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}
