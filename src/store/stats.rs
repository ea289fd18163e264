// src/store/stats.rs
use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{load_or_default, write_json_atomic, StoreError};

/// Publish counters. Owned by the scheduler task; persisted after every publish.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsLedger {
    pub total_posts: u64,
    pub posts_today: u32,
    /// Local calendar day `posts_today` belongs to.
    pub day: Option<NaiveDate>,
    pub last_post_time: Option<DateTime<Utc>>,
    /// backend name -> posts
    pub provider_stats: BTreeMap<String, u64>,
    /// origin title -> posts
    pub source_stats: BTreeMap<String, u64>,
}

impl StatsLedger {
    /// Reset the day counter when `today` differs from the stored day.
    /// Returns true when a rollover happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        match self.day {
            Some(d) if d == today => false,
            Some(_) => {
                self.day = Some(today);
                self.posts_today = 0;
                true
            }
            None => {
                // first start: a restored counter without a day is kept as today's
                self.day = Some(today);
                false
            }
        }
    }

    pub fn record_publish(&mut self, backend: &str, source: &str, at: DateTime<Utc>, today: NaiveDate) {
        self.roll_day(today);
        self.total_posts += 1;
        self.posts_today += 1;
        self.last_post_time = Some(at);
        *self.provider_stats.entry(backend.to_string()).or_default() += 1;
        *self.source_stats.entry(source.to_string()).or_default() += 1;
    }
}

/// Where the ledger lives on disk.
#[derive(Debug, Clone)]
pub struct StatsFile {
    path: PathBuf,
}

impl StatsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> StatsLedger {
        load_or_default(&self.path, "stats")
    }

    pub fn save(&self, ledger: &StatsLedger) -> Result<(), StoreError> {
        write_json_atomic(&self.path, ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn publish_counts_by_backend_and_source() {
        let mut l = StatsLedger::default();
        let now = Utc::now();
        l.record_publish("openai", "TON Live", now, day(1));
        l.record_publish("fallback", "TON Live", now, day(1));
        assert_eq!(l.total_posts, 2);
        assert_eq!(l.posts_today, 2);
        assert_eq!(l.provider_stats["openai"], 1);
        assert_eq!(l.source_stats["TON Live"], 2);
        assert_eq!(l.last_post_time, Some(now));
    }

    #[test]
    fn new_day_resets_only_the_day_counter() {
        let mut l = StatsLedger::default();
        l.record_publish("local", "a", Utc::now(), day(1));
        assert!(!l.roll_day(day(1)));
        assert!(l.roll_day(day(2)));
        assert_eq!(l.posts_today, 0);
        assert_eq!(l.total_posts, 1);
    }

    #[test]
    fn ledger_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let f = StatsFile::new(dir.path().join("stats.json"));
        assert_eq!(f.load(), StatsLedger::default());

        let mut l = StatsLedger::default();
        l.record_publish("groq", "@whale", Utc::now(), day(5));
        f.save(&l).unwrap();
        assert_eq!(f.load(), l);
    }
}
