//! Rebuild memory state from a recorded interaction history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::MemoryModel;
use crate::types::{Interaction, InteractionSnapshot, ItemState};

/// Result of replaying a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    /// State after the last applied interaction.
    pub state: ItemState,
    /// Number of interactions folded in.
    pub applied: usize,
    /// Per-interaction scheduling results, oldest first.
    pub snapshots: Vec<InteractionSnapshot>,
}

impl ReplayOutcome {
    /// Whether the replayed state serializes identically to `stored`.
    pub fn matches(&self, stored: &ItemState) -> bool {
        match (serde_json::to_vec(&self.state), serde_json::to_vec(stored)) {
            (Ok(replayed), Ok(stored)) => replayed == stored,
            _ => false,
        }
    }
}

/// Folds a memory model over an ordered interaction history.
///
/// The model is deterministic, so replaying the same outcomes at the same
/// timestamps reproduces the live state exactly.
pub struct InteractionReplay {
    model: Arc<dyn MemoryModel>,
    limit: Option<usize>,
}

impl InteractionReplay {
    /// Replay every interaction.
    pub fn new(model: Arc<dyn MemoryModel>) -> Self {
        Self { model, limit: None }
    }

    /// Only replay the `limit` most recent interactions.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Replay `interactions` starting from a fresh state created at `created_at`.
    ///
    /// Input order does not matter; interactions are applied by `answered_at`,
    /// keeping the given order among equal timestamps.
    pub fn replay(&self, created_at: DateTime<Utc>, interactions: &[Interaction]) -> ReplayOutcome {
        let mut ordered: Vec<&Interaction> = interactions.iter().collect();
        ordered.sort_by_key(|i| i.answered_at);

        if let Some(limit) = self.limit {
            let skip = ordered.len().saturating_sub(limit);
            ordered.drain(..skip);
        }

        let mut state = self.model.initialize(created_at);
        let mut snapshots = Vec::with_capacity(ordered.len());

        for interaction in &ordered {
            let outcome = self
                .model
                .schedule(&state, interaction.is_correct, interaction.answered_at);
            snapshots.push(InteractionSnapshot {
                scheduled_days: outcome.interval_days,
                next_review_at: outcome.next_review_at(),
                state: outcome.state.state,
                grade: outcome.grade,
            });
            state = outcome.state;
        }

        debug!(
            model = self.model.name(),
            applied = ordered.len(),
            "Replayed interaction history"
        );

        ReplayOutcome {
            state,
            applied: ordered.len(),
            snapshots,
        }
    }

    /// Replay and compare against a stored state.
    pub fn verify(
        &self,
        stored: &ItemState,
        created_at: DateTime<Utc>,
        interactions: &[Interaction],
    ) -> bool {
        self.replay(created_at, interactions).matches(stored)
    }
}
