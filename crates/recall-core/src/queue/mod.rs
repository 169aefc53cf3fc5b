//! Review queue prioritization.
//!
//! Scores every candidate and produces one total ordering: never-practiced
//! items in `[-2, -1)` (fresher first), practiced items by retrievability in
//! `[0, 1]`. Lower is more urgent. Items within `urgency_delta` of the most
//! urgent score are shuffled for variety.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::config::QueueConfig;
use crate::engine::MemoryModel;
use crate::types::MemoryItem;

/// Largest score a never-practiced item can take; strictly below -1.
const UNPRACTICED_SCORE_CEILING: f64 = -1.000_000_000_000_000_2;

/// `e^(-h/24)` for `h >= 0`; `1.0` for negative ages (clock skew).
pub fn freshness_decay(hours_since_created: f64) -> f64 {
    if hours_since_created < 0.0 || hours_since_created.is_nan() {
        return 1.0;
    }
    (-hours_since_created / 24.0).exp()
}

/// An item with its urgency score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: MemoryItem,
    pub score: f64,
}

/// Orders candidate items for presentation.
pub struct ReviewQueuePrioritizer {
    model: Arc<dyn MemoryModel>,
    urgency_delta: f64,
}

impl ReviewQueuePrioritizer {
    /// Create a prioritizer over `model`.
    pub fn new(model: Arc<dyn MemoryModel>, config: &QueueConfig) -> Self {
        Self {
            model,
            urgency_delta: config.urgency_delta.max(0.0),
        }
    }

    /// Urgency score of one item at `now`; lower is more urgent.
    pub fn score(&self, item: &MemoryItem, now: DateTime<Utc>) -> f64 {
        if item.state.is_unpracticed() {
            let hours = (now - item.created_at).num_milliseconds() as f64 / 3_600_000.0;
            (-1.0 - freshness_decay(hours)).min(UNPRACTICED_SCORE_CEILING)
        } else {
            self.model.retrievability(&item.state, now)
        }
    }

    /// Score and order every candidate. Nothing is dropped.
    ///
    /// The result is ascending by score except that the prefix within
    /// `urgency_delta` of the minimum is uniformly permuted with `rng`.
    pub fn order<R: Rng + ?Sized>(
        &self,
        candidates: Vec<MemoryItem>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<ScoredItem> {
        let mut scored: Vec<ScoredItem> = candidates
            .into_iter()
            .map(|item| {
                let score = self.score(&item, now);
                ScoredItem { item, score }
            })
            .collect();

        scored.sort_by(|a, b| a.score.total_cmp(&b.score));

        if let Some(min) = scored.first().map(|s| s.score) {
            let tier = scored
                .iter()
                .take_while(|s| s.score - min <= self.urgency_delta)
                .count();
            scored[..tier].shuffle(rng);

            debug!(
                candidates = scored.len(),
                tier,
                min_score = min,
                "Ordered review queue"
            );
        }

        scored
    }

    /// The single item to present next, if any.
    pub fn select_next<R: Rng + ?Sized>(
        &self,
        candidates: Vec<MemoryItem>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<ScoredItem> {
        self.order(candidates, now, rng).into_iter().next()
    }
}
