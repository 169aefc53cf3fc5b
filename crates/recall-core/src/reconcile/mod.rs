//! Sampling-based ledger drift repair.
//!
//! A pass picks a bounded, roughly uniform sample of owners, recounts each
//! owner's items in fixed-size pages and rewrites the ledger when it has
//! drifted past the threshold. Failures are counted per owner and never
//! abort the pass.

mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::error::RecallResult;
use crate::ledger::counts_as_due;
use crate::store::ReviewStore;
use crate::traits::Clock;
use crate::types::{Bucket, StatsLedger};

pub use scheduler::ReconcileScheduler;

/// Overall outcome of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReconcileStatus {
    /// No owner failed.
    Completed,
    /// Some owners failed.
    Partial,
    /// Every owner failed, or the sample could not be drawn.
    Failed,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub status: ReconcileStatus,
    /// Owners sampled, including failed ones.
    pub owners_checked: usize,
    /// Ledgers rewritten.
    pub corrections: usize,
    /// Owners that could not be reconciled.
    pub failures: usize,
    /// One message per failure.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ReconcileReport {
    /// Pass duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Largest absolute difference between two ledgers' bucket counters.
///
/// The due count is left out: it goes stale as soon as an item comes due,
/// with no mutation to record it. See [`due_drift`].
pub fn drift(ledger: &StatsLedger, truth: &StatsLedger) -> u64 {
    [
        (ledger.total_cards, truth.total_cards),
        (ledger.new_count, truth.new_count),
        (ledger.learning_count, truth.learning_count),
        (ledger.mature_count, truth.mature_count),
    ]
    .into_iter()
    .map(|(a, b)| a.abs_diff(b))
    .max()
    .unwrap_or(0)
}

/// Absolute difference between two ledgers' due counts.
pub fn due_drift(ledger: &StatsLedger, truth: &StatsLedger) -> u64 {
    ledger.due_now_count.abs_diff(truth.due_now_count)
}

/// Periodically re-derives ground truth for a sample of owners.
pub struct ReconciliationSampler {
    store: Arc<dyn ReviewStore>,
    clock: Arc<dyn Clock>,
    config: ReconcileConfig,
}

impl ReconciliationSampler {
    pub fn new(store: Arc<dyn ReviewStore>, clock: Arc<dyn Clock>, config: ReconcileConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Recompute an owner's counters from their items.
    ///
    /// Reads at most `ceil(n / batch_size) * batch_size` item documents for
    /// an owner with `n` non-deleted items.
    pub fn recount_owner(&self, owner_id: &str, now: DateTime<Utc>) -> RecallResult<StatsLedger> {
        let batch_size = self.config.batch_size.max(1);
        let mut truth = StatsLedger::empty(owner_id, now);
        let mut cursor = None;

        loop {
            let page = self.store.paginate_items(owner_id, cursor, batch_size)?;

            for item in page.items.iter().filter(|i| i.is_active()) {
                match Bucket::from(item.card_state()) {
                    Bucket::New => truth.new_count += 1,
                    Bucket::Learning => truth.learning_count += 1,
                    Bucket::Mature => truth.mature_count += 1,
                }
                if counts_as_due(&item.state, now) {
                    truth.due_now_count += 1;
                } else if !item.state.is_unpracticed() {
                    truth.next_review_time = match (truth.next_review_time, item.state.next_review_at) {
                        (Some(current), Some(next)) => Some(current.min(next)),
                        (current, next) => current.or(next),
                    };
                }
            }

            if page.is_done || page.items.is_empty() {
                break;
            }
            cursor = page.cursor;
        }

        truth.total_cards = truth.new_count + truth.learning_count + truth.mature_count;
        Ok(truth)
    }

    /// Reconcile one owner. Returns whether the ledger was rewritten.
    ///
    /// Bucket drift above `drift_threshold` triggers a rewrite, as does due
    /// drift above the configured `due_drift_threshold` when one is set. A
    /// rewrite always stores the recounted due count.
    pub fn reconcile_owner(
        &self,
        owner_id: &str,
        drift_threshold: u64,
        now: DateTime<Utc>,
    ) -> RecallResult<bool> {
        let truth = self.recount_owner(owner_id, now)?;
        let current = self
            .store
            .get_ledger(owner_id)?
            .unwrap_or_else(|| StatsLedger::empty(owner_id, now));

        let observed = drift(&current, &truth);
        let due_observed = due_drift(&current, &truth);
        let due_exceeded = self
            .config
            .due_drift_threshold
            .is_some_and(|threshold| due_observed > threshold);
        if observed <= drift_threshold && !due_exceeded {
            debug!(owner_id, drift = observed, due_drift = due_observed, "Ledger within threshold");
            return Ok(false);
        }

        self.store.overwrite_ledger(&truth)?;
        info!(
            owner_id,
            drift = observed,
            due_drift = due_observed,
            total_cards = truth.total_cards,
            "Ledger corrected"
        );
        Ok(true)
    }

    /// Run one pass over up to `sample_size` owners.
    pub fn reconcile<R: Rng + ?Sized>(
        &self,
        sample_size: usize,
        drift_threshold: u64,
        rng: &mut R,
    ) -> ReconcileReport {
        let started_at = self.clock.now();
        let pivot: f64 = rng.gen();

        let owners = match self.store.sample_owners(pivot, sample_size) {
            Ok(owners) => owners,
            Err(e) => {
                warn!(error = %e, "Could not sample owners");
                return ReconcileReport {
                    status: ReconcileStatus::Failed,
                    owners_checked: 0,
                    corrections: 0,
                    failures: 1,
                    errors: vec![e.to_string()],
                    started_at,
                    completed_at: self.clock.now(),
                };
            }
        };

        let mut corrections = 0;
        let mut errors = Vec::new();

        for owner_id in &owners {
            match self.reconcile_owner(owner_id, drift_threshold, self.clock.now()) {
                Ok(true) => corrections += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(owner_id = %owner_id, error = %e, "Reconciliation failed for owner");
                    errors.push(format!("{}: {}", owner_id, e));
                }
            }
        }

        let failures = errors.len();
        let status = if failures == 0 {
            ReconcileStatus::Completed
        } else if failures == owners.len() {
            ReconcileStatus::Failed
        } else {
            ReconcileStatus::Partial
        };

        ReconcileReport {
            status,
            owners_checked: owners.len(),
            corrections,
            failures,
            errors,
            started_at,
            completed_at: self.clock.now(),
        }
    }

    /// Run one pass with the configured sample size and threshold.
    pub fn run(&self) -> ReconcileReport {
        self.reconcile(
            self.config.sample_size,
            self.config.drift_threshold,
            &mut rand::thread_rng(),
        )
    }
}
