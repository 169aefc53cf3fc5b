//! Memory model strategy and replay.
//!
//! The active algorithm is an injected [`MemoryModel`] trait object; call
//! sites receive it through their constructors rather than a global.

mod fsrs6;
mod replay;

use chrono::{DateTime, Utc};

use crate::types::{ItemState, ScheduleOutcome};

pub use fsrs6::{FsrsEngine, UNPRACTICED_RETRIEVABILITY};
pub use replay::{InteractionReplay, ReplayOutcome};

/// A forgetting-curve scheduling algorithm.
///
/// Implementations must be deterministic: identical `(state, is_correct,
/// now)` always produce identical output. They never fail; malformed input
/// degrades to a fresh state.
pub trait MemoryModel: Send + Sync {
    /// Short algorithm identifier, recorded in logs.
    fn name(&self) -> &str;

    /// State for a newly created item.
    fn initialize(&self, now: DateTime<Utc>) -> ItemState;

    /// Apply one binary outcome at `now`.
    fn schedule(&self, state: &ItemState, is_correct: bool, now: DateTime<Utc>) -> ScheduleOutcome;

    /// Modeled probability of recall at `now`, in `[0, 1]`.
    fn retrievability(&self, state: &ItemState, now: DateTime<Utc>) -> f64;

    /// Whether the item should be presented at `now`.
    fn is_due(&self, state: &ItemState, now: DateTime<Utc>) -> bool {
        is_due(state, now)
    }
}

/// True when `next_review_at` is unset or not after `now`.
pub fn is_due(state: &ItemState, now: DateTime<Utc>) -> bool {
    match state.next_review_at {
        Some(at) => at <= now,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_due_unset_is_due() {
        let state = ItemState::default();
        assert!(is_due(&state, Utc::now()));
    }

    #[test]
    fn test_is_due_boundary() {
        let now = Utc::now();
        let mut state = ItemState::new_at(now);
        assert!(is_due(&state, now));

        state.next_review_at = Some(now + Duration::seconds(1));
        assert!(!is_due(&state, now));
        assert!(is_due(&state, now + Duration::seconds(1)));
    }
}
