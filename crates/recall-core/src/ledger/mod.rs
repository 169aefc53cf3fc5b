//! Incremental maintenance of per-owner counters.
//!
//! Every item mutation produces a [`StatsDelta`] that the store applies in
//! the same transaction as the mutation itself. Deltas are never recounted,
//! so a lost or duplicated application drifts the ledger until the
//! reconciliation sampler repairs it.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::engine::is_due;
use crate::types::{Bucket, ItemState, MemoryItem, StatsDelta, StatsLedger};

/// Whether `state` counts toward `due_now_count` at `now`.
///
/// Only practiced items are counted; never-practiced items surface through
/// the new-item window instead.
pub fn counts_as_due(state: &ItemState, now: DateTime<Utc>) -> bool {
    !state.is_unpracticed() && is_due(state, now)
}

fn upcoming_review(state: &ItemState, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if state.is_unpracticed() {
        return None;
    }
    state.next_review_at.filter(|at| *at > now)
}

/// Delta for a newly created (or newly reactivated) item.
pub fn creation_delta(state: &ItemState, now: DateTime<Utc>) -> StatsDelta {
    let mut delta = StatsDelta {
        total_cards: 1,
        next_review_time: upcoming_review(state, now),
        ..Default::default()
    };
    delta.shift_bucket(Bucket::from(state.state), 1);
    if counts_as_due(state, now) {
        delta.due_now_count = 1;
    }
    delta
}

/// Delta for an item leaving the active set (archive, soft or hard delete).
pub fn removal_delta(state: &ItemState, now: DateTime<Utc>) -> StatsDelta {
    let mut delta = StatsDelta {
        total_cards: -1,
        ..Default::default()
    };
    delta.shift_bucket(Bucket::from(state.state), -1);
    if counts_as_due(state, now) {
        delta.due_now_count = -1;
    }
    delta
}

/// Delta for one scheduled response moving `before` to `after`.
///
/// Bucket counters move only when the bucket changes; the due counter moves
/// only when the item crosses the `now` boundary.
pub fn transition_delta(before: &ItemState, after: &ItemState, now: DateTime<Utc>) -> StatsDelta {
    let mut delta = StatsDelta {
        next_review_time: upcoming_review(after, now),
        ..Default::default()
    };

    let (from, to) = (Bucket::from(before.state), Bucket::from(after.state));
    if from != to {
        delta.shift_bucket(from, -1);
        delta.shift_bucket(to, 1);
    }

    delta.due_now_count = match (counts_as_due(before, now), counts_as_due(after, now)) {
        (true, false) => -1,
        (false, true) => 1,
        _ => 0,
    };

    delta
}

/// Delta for a lifecycle change of `item`, given whether it was and will be
/// active. Returns an empty delta when activity does not change.
pub fn activity_delta(item: &MemoryItem, becomes_active: bool, now: DateTime<Utc>) -> StatsDelta {
    match (item.is_active(), becomes_active) {
        (true, false) => removal_delta(&item.state, now),
        (false, true) => creation_delta(&item.state, now),
        _ => StatsDelta::default(),
    }
}

fn clamped(owner_id: &str, field: &str, current: u64, change: i64) -> u64 {
    let next = current as i64 + change;
    if next < 0 {
        debug!(owner_id, field, current, change, "Ledger underflow clamped to zero");
        0
    } else {
        next as u64
    }
}

/// Apply `delta` to the ledger for `owner_id`, bootstrapping it if absent.
///
/// Every counter is clamped at zero and `total_cards` is rewritten as the sum
/// of the buckets, so the result is always consistent. The next-review time
/// keeps the earlier of the stored and candidate values, discarding a stored
/// value that has already passed.
pub fn apply_delta(
    current: Option<&StatsLedger>,
    owner_id: &str,
    delta: &StatsDelta,
    now: DateTime<Utc>,
) -> StatsLedger {
    let mut ledger = current
        .cloned()
        .unwrap_or_else(|| StatsLedger::empty(owner_id, now));

    ledger.new_count = clamped(owner_id, "new_count", ledger.new_count, delta.new_count);
    ledger.learning_count = clamped(
        owner_id,
        "learning_count",
        ledger.learning_count,
        delta.learning_count,
    );
    ledger.mature_count = clamped(owner_id, "mature_count", ledger.mature_count, delta.mature_count);
    ledger.due_now_count = clamped(
        owner_id,
        "due_now_count",
        ledger.due_now_count,
        delta.due_now_count,
    );
    ledger.total_cards = ledger.new_count + ledger.learning_count + ledger.mature_count;

    if let Some(candidate) = delta.next_review_time {
        ledger.next_review_time = match ledger.next_review_time {
            Some(stored) if stored > now => Some(stored.min(candidate)),
            _ => Some(candidate),
        };
    }

    ledger.last_calculated = now;
    ledger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FsrsEngine, MemoryModel};
    use crate::types::CardState;
    use chrono::Duration;

    fn practiced(state: CardState, next: DateTime<Utc>) -> ItemState {
        ItemState {
            state,
            stability: 3.0,
            difficulty: 5.0,
            reps: 2,
            last_review_at: Some(next - Duration::days(3)),
            next_review_at: Some(next),
            ..Default::default()
        }
    }

    #[test]
    fn test_creation_delta_for_new_item() {
        let now = Utc::now();
        let delta = creation_delta(&ItemState::new_at(now), now);
        assert_eq!(delta.total_cards, 1);
        assert_eq!(delta.new_count, 1);
        assert_eq!(delta.due_now_count, 0);
        assert!(delta.next_review_time.is_none());
    }

    #[test]
    fn test_transition_moves_exactly_one_bucket() {
        let now = Utc::now();
        let engine = FsrsEngine::new();
        let before = engine.initialize(now);
        let after = engine.schedule(&before, true, now).state;

        let delta = transition_delta(&before, &after, now);
        assert_eq!(delta.new_count, -1);
        assert_eq!(delta.learning_count, 1);
        assert_eq!(delta.mature_count, 0);
        assert_eq!(delta.total_cards, 0);
        assert_eq!(delta.next_review_time, after.next_review_at);
    }

    #[test]
    fn test_relearning_stays_in_learning_bucket() {
        let now = Utc::now();
        let before = practiced(CardState::Learning, now + Duration::minutes(5));
        let after = practiced(CardState::Relearning, now + Duration::minutes(10));
        let delta = transition_delta(&before, &after, now);
        assert_eq!(delta.learning_count, 0);
        assert_eq!(delta.new_count, 0);
        assert_eq!(delta.mature_count, 0);
    }

    #[test]
    fn test_due_boundary_crossing() {
        let now = Utc::now();
        let due = practiced(CardState::Review, now - Duration::hours(1));
        let later = practiced(CardState::Review, now + Duration::days(4));

        assert_eq!(transition_delta(&due, &later, now).due_now_count, -1);
        assert_eq!(transition_delta(&later, &due, now).due_now_count, 1);
        assert_eq!(transition_delta(&later, &later, now).due_now_count, 0);
    }

    #[test]
    fn test_removal_is_inverse_of_creation() {
        let now = Utc::now();
        let state = practiced(CardState::Review, now - Duration::minutes(1));
        let created = creation_delta(&state, now);
        let removed = removal_delta(&state, now);

        assert_eq!(created.total_cards, -removed.total_cards);
        assert_eq!(created.mature_count, -removed.mature_count);
        assert_eq!(created.due_now_count, -removed.due_now_count);
    }

    #[test]
    fn test_apply_bootstraps_and_clamps() {
        let now = Utc::now();
        let mut delta = StatsDelta::default();
        delta.shift_bucket(Bucket::Mature, -3);
        delta.due_now_count = -7;
        delta.total_cards = -3;

        let ledger = apply_delta(None, "alice", &delta, now);
        assert_eq!(ledger.owner_id, "alice");
        assert_eq!(ledger.mature_count, 0);
        assert_eq!(ledger.due_now_count, 0);
        assert_eq!(ledger.total_cards, 0);
        assert!(ledger.is_consistent());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn logged_at(level: tracing::Level, f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_underflow_is_clamped_quietly() {
        let mut delta = StatsDelta::default();
        delta.due_now_count = -1;
        let underflow = || {
            apply_delta(None, "alice", &delta, Utc::now());
        };

        assert!(logged_at(tracing::Level::INFO, underflow).is_empty());
        assert!(logged_at(tracing::Level::DEBUG, underflow).contains("underflow"));
    }

    #[test]
    fn test_apply_keeps_total_consistent_after_overdecrement() {
        let now = Utc::now();
        let mut ledger = StatsLedger::empty("bob", now);
        ledger.new_count = 1;
        ledger.learning_count = 2;
        ledger.total_cards = 3;

        let mut delta = StatsDelta {
            total_cards: -1,
            ..Default::default()
        };
        delta.shift_bucket(Bucket::New, -2);

        let ledger = apply_delta(Some(&ledger), "bob", &delta, now);
        assert_eq!(ledger.new_count, 0);
        assert_eq!(ledger.total_cards, 2);
        assert!(ledger.is_consistent());
    }

    #[test]
    fn test_next_review_time_takes_earliest_future() {
        let now = Utc::now();
        let mut ledger = StatsLedger::empty("carol", now);
        ledger.next_review_time = Some(now + Duration::hours(5));

        let sooner = StatsDelta {
            next_review_time: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        let ledger = apply_delta(Some(&ledger), "carol", &sooner, now);
        assert_eq!(ledger.next_review_time, Some(now + Duration::hours(1)));

        // The stored value has passed by the time the next delta lands.
        let later = now + Duration::hours(2);
        let candidate = StatsDelta {
            next_review_time: Some(now + Duration::hours(8)),
            ..Default::default()
        };
        let ledger = apply_delta(Some(&ledger), "carol", &candidate, later);
        assert_eq!(ledger.next_review_time, Some(now + Duration::hours(8)));
    }

    #[test]
    fn test_activity_delta_only_on_change() {
        let now = Utc::now();
        let mut item = MemoryItem::new("dave", now);
        assert!(activity_delta(&item, true, now).is_empty());

        let removed = activity_delta(&item, false, now);
        assert_eq!(removed.total_cards, -1);
        assert_eq!(removed.new_count, -1);

        item.archived_at = Some(now);
        assert!(activity_delta(&item, false, now).is_empty());
        assert_eq!(activity_delta(&item, true, now).total_cards, 1);
    }
}
