// src/scheduler/queue.rs
//! Pure pacing logic: no I/O, time passed in by the caller.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ScheduleConfig;
use crate::ingest::types::ItemKey;
use crate::rewrite::RewrittenItem;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub item: RewrittenItem,
    pub publish_at: DateTime<Utc>,
    /// Acceptance order; breaks ties between equal publish times.
    pub seq: u64,
    /// Failed (rate-limited) publish attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl QueueEntry {
    pub fn key(&self) -> &ItemKey {
        &self.item.source.key
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Queued { publish_at: DateTime<Utc>, depth: usize },
    CapReached { published_today: u32, queued: usize },
}

#[derive(Debug, Clone)]
pub struct Pacing {
    pub daily_cap: u32,
    pub min_gap_secs: i64,
    pub max_gap_secs: i64,
    pub first_delay: Duration,
    pub max_attempts: u32,
}

impl From<&ScheduleConfig> for Pacing {
    fn from(c: &ScheduleConfig) -> Self {
        let (lo, hi) = if c.min_interval_minutes <= c.max_interval_minutes {
            (c.min_interval_minutes, c.max_interval_minutes)
        } else {
            (c.max_interval_minutes, c.min_interval_minutes)
        };
        Self {
            daily_cap: c.daily_cap,
            min_gap_secs: i64::from(lo) * 60,
            max_gap_secs: i64::from(hi) * 60,
            first_delay: Duration::seconds(c.first_delay_secs.min(7 * 86_400) as i64),
            max_attempts: c.max_publish_attempts.max(1),
        }
    }
}

/// Entries ordered by (publish_at, seq).
pub struct PublishQueue<R: Rng = StdRng> {
    pacing: Pacing,
    rng: R,
    entries: Vec<QueueEntry>,
    next_seq: u64,
    last_scheduled: Option<DateTime<Utc>>,
}

impl<R: Rng> PublishQueue<R> {
    pub fn new(pacing: Pacing, rng: R) -> Self {
        Self {
            pacing,
            rng,
            entries: Vec::new(),
            next_seq: 0,
            last_scheduled: None,
        }
    }

    pub fn pacing(&self) -> &Pacing {
        &self.pacing
    }

    /// Load persisted entries; `last_publish` anchors spacing for new items.
    pub fn restore(&mut self, mut entries: Vec<QueueEntry>, last_publish: Option<DateTime<Utc>>) {
        entries.sort_by(|a, b| (a.publish_at, a.seq).cmp(&(b.publish_at, b.seq)));
        self.next_seq = entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        self.last_scheduled = entries
            .iter()
            .map(|e| e.publish_at)
            .chain(last_publish)
            .max();
        self.entries = entries;
    }

    /// Assign a publish time, or refuse when the day is full.
    pub fn accept(&mut self, item: RewrittenItem, now: DateTime<Utc>, published_today: u32) -> Admission {
        let queued = self.entries.len();
        if u64::from(published_today) + queued as u64 >= u64::from(self.pacing.daily_cap) {
            return Admission::CapReached {
                published_today,
                queued,
            };
        }

        let publish_at = match self.last_scheduled {
            None => now + self.pacing.first_delay,
            Some(last) => {
                let gap = self
                    .rng
                    .random_range(self.pacing.min_gap_secs..=self.pacing.max_gap_secs);
                (last + Duration::seconds(gap)).max(now)
            }
        };
        self.last_scheduled = Some(self.last_scheduled.map_or(publish_at, |l| l.max(publish_at)));

        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert(QueueEntry {
            item,
            publish_at,
            seq,
            attempts: 0,
        });
        Admission::Queued {
            publish_at,
            depth: self.entries.len(),
        }
    }

    fn insert(&mut self, entry: QueueEntry) {
        let k = (entry.publish_at, entry.seq);
        let pos = self.entries.partition_point(|e| (e.publish_at, e.seq) <= k);
        self.entries.insert(pos, entry);
    }

    /// Remove and return every entry due at `now`, in publish order.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<QueueEntry> {
        let n = self.entries.partition_point(|e| e.publish_at <= now);
        self.entries.drain(..n).collect()
    }

    /// Put an entry back after a rate limit. Returns it as `Err` once it has
    /// used up its attempts.
    pub fn reschedule(&mut self, mut entry: QueueEntry, at: DateTime<Utc>) -> Result<(), QueueEntry> {
        entry.attempts += 1;
        if entry.attempts >= self.pacing.max_attempts {
            return Err(entry);
        }
        entry.publish_at = at;
        self.insert(entry);
        Ok(())
    }

    /// Push entries that were due but not attempted to no earlier than `until`.
    /// Attempts are untouched.
    pub fn defer(&mut self, entries: impl IntoIterator<Item = QueueEntry>, until: DateTime<Utc>) {
        for mut e in entries {
            e.publish_at = e.publish_at.max(until);
            self.insert(e);
        }
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.entries.iter().any(|e| e.key() == key)
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.publish_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{Origin, SourceItem};
    use rand::SeedableRng;

    fn rewritten(id: &str) -> RewrittenItem {
        let source = SourceItem {
            key: ItemKey::new("fixture", id),
            text: format!("text {id}"),
            origin: Origin::default(),
            published_at: Utc::now(),
            engagement: Default::default(),
            media: None,
            kind: Default::default(),
            forwarded: false,
            reply: false,
        };
        RewrittenItem {
            source,
            text: format!("final {id}"),
            backend: "local".into(),
            model: "template".into(),
            processing_ms: 0,
            media: None,
        }
    }

    fn queue(cap: u32) -> PublishQueue<StdRng> {
        let cfg = ScheduleConfig {
            daily_cap: cap,
            ..ScheduleConfig::default()
        };
        PublishQueue::new(Pacing::from(&cfg), StdRng::seed_from_u64(7))
    }

    fn at(q: &Admission) -> DateTime<Utc> {
        match q {
            Admission::Queued { publish_at, .. } => *publish_at,
            other => panic!("expected queued, got {other:?}"),
        }
    }

    #[test]
    fn first_item_uses_short_delay_then_random_gaps() {
        let mut q = queue(24);
        let now = Utc::now();
        let first = at(&q.accept(rewritten("a"), now, 0));
        assert_eq!(first, now + Duration::seconds(60));

        let mut prev = first;
        for i in 0..20 {
            let t = at(&q.accept(rewritten(&format!("b{i}")), now, 0));
            let gap = t - prev;
            assert!(gap >= Duration::minutes(20) && gap <= Duration::minutes(30), "gap {gap}");
            prev = t;
        }
    }

    #[test]
    fn gap_is_measured_from_last_scheduled_not_now() {
        let mut q = queue(24);
        let now = Utc::now();
        let first = at(&q.accept(rewritten("a"), now, 0));
        // second item arrives 5 minutes later
        let second = at(&q.accept(rewritten("b"), now + Duration::minutes(5), 0));
        assert!(second >= first + Duration::minutes(20));
        assert!(second <= first + Duration::minutes(30));
    }

    #[test]
    fn stale_anchor_never_schedules_in_the_past() {
        let mut q = queue(24);
        let long_ago = Utc::now() - Duration::days(2);
        q.restore(Vec::new(), Some(long_ago));
        let now = Utc::now();
        assert_eq!(at(&q.accept(rewritten("a"), now, 0)), now);
    }

    #[test]
    fn cap_counts_published_plus_queued() {
        let mut q = queue(3);
        let now = Utc::now();
        assert!(matches!(q.accept(rewritten("a"), now, 1), Admission::Queued { .. }));
        assert!(matches!(q.accept(rewritten("b"), now, 1), Admission::Queued { .. }));
        assert_eq!(
            q.accept(rewritten("c"), now, 1),
            Admission::CapReached {
                published_today: 1,
                queued: 2
            }
        );
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn due_entries_come_out_in_order() {
        let cfg = ScheduleConfig {
            min_interval_minutes: 0,
            max_interval_minutes: 0,
            first_delay_secs: 0,
            ..ScheduleConfig::default()
        };
        let mut q = PublishQueue::new(Pacing::from(&cfg), StdRng::seed_from_u64(1));
        let now = Utc::now();
        for id in ["a", "b", "c"] {
            q.accept(rewritten(id), now, 0);
        }
        let due: Vec<_> = q.take_due(now).iter().map(|e| e.key().raw_id.clone()).collect();
        assert_eq!(due, vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn reschedule_gives_up_after_max_attempts() {
        let mut q = queue(24);
        let now = Utc::now();
        q.accept(rewritten("a"), now, 0);
        let mut e = q.take_due(now + Duration::hours(1)).remove(0);
        for _ in 0..4 {
            q.reschedule(e, now).unwrap();
            e = q.take_due(now).remove(0);
        }
        let dropped = q.reschedule(e, now).unwrap_err();
        assert_eq!(dropped.attempts, 5);
        assert!(q.is_empty());
    }

    #[test]
    fn deferred_entries_keep_their_order_and_attempts() {
        let mut q = queue(24);
        let now = Utc::now();
        for id in ["a", "b"] {
            q.accept(rewritten(id), now, 0);
        }
        let due = q.take_due(now + Duration::hours(2));
        let until = now + Duration::hours(3);
        q.defer(due, until);
        assert_eq!(q.next_due(), Some(until));
        let order: Vec<_> = q.entries().iter().map(|e| (e.key().raw_id.as_str(), e.attempts)).collect();
        assert_eq!(order, vec![("a", 0), ("b", 0)]);
    }

    #[test]
    fn rate_limited_entry_and_rest_of_batch_move_to_retry_instant() {
        let mut q = queue(24);
        let now = Utc::now();
        for id in ["a", "b", "c"] {
            q.accept(rewritten(id), now, 0);
        }
        // everything due; the first send is rate limited for 90s
        let mut due = q.take_due(now + Duration::hours(2)).into_iter();
        let retry_at = now + Duration::hours(2) + Duration::seconds(90);
        let first = due.next().unwrap();
        q.reschedule(first, retry_at).unwrap();
        q.defer(due, retry_at);

        assert_eq!(q.next_due(), Some(retry_at));
        assert!(q.entries().iter().all(|e| e.publish_at == retry_at));
        let order: Vec<_> = q.entries().iter().map(|e| (e.key().raw_id.as_str(), e.attempts)).collect();
        assert_eq!(order, vec![("a", 1), ("b", 0), ("c", 0)]);
        assert!(q.take_due(retry_at - Duration::seconds(1)).is_empty());
    }

    #[test]
    fn restore_continues_sequence_and_spacing() {
        let mut q = queue(24);
        let now = Utc::now();
        q.accept(rewritten("a"), now, 0);
        let saved = q.entries().to_vec();

        let mut r = queue(24);
        r.restore(saved.clone(), None);
        assert!(r.contains(&ItemKey::new("fixture", "a")));
        let t = at(&r.accept(rewritten("b"), now, 0));
        assert!(t >= saved[0].publish_at + Duration::minutes(20));
        assert_eq!(r.entries()[1].seq, 1);
    }
}
