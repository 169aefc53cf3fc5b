//! Review service: the entry point request handlers call.
//!
//! Ties the memory model, queue, phrasing policy and ledger to the store.
//! Each write is a single store transaction; the service itself holds no
//! locks beyond its random source.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info};

use crate::config::RecallConfig;
use crate::engine::{InteractionReplay, MemoryModel, ReplayOutcome};
use crate::error::{RecallError, RecallResult};
use crate::ledger;
use crate::phrasing::{select_phrasing, SelectionReason};
use crate::queue::ReviewQueuePrioritizer;
use crate::store::{ItemMutation, ReviewCommit, ReviewStore};
use crate::traits::{Clock, IdentityResolver};
use crate::types::{
    Concept, Interaction, InteractionSnapshot, ItemKind, MemoryItem, Phrasing, ScheduleOutcome,
    StatsDelta, StatsLedger,
};

/// One response submitted by a learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Question or concept id.
    pub subject_id: String,
    /// Phrasing presented; required for concepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrasing_id: Option<String>,
    pub answer: String,
    pub is_correct: bool,
}

impl Answer {
    pub fn new(subject_id: impl Into<String>, answer: impl Into<String>, is_correct: bool) -> Self {
        Self {
            subject_id: subject_id.into(),
            phrasing_id: None,
            answer: answer.into(),
            is_correct,
        }
    }

    pub fn with_phrasing(mut self, phrasing_id: impl Into<String>) -> Self {
        self.phrasing_id = Some(phrasing_id.into());
        self
    }
}

/// Result of [`ReviewService::submit_answer`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub outcome: ScheduleOutcome,
    pub interaction: Interaction,
}

/// What to present next.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewCard {
    pub item: MemoryItem,
    pub score: f64,
    /// Set for concepts.
    pub concept: Option<Concept>,
    pub phrasing: Option<Phrasing>,
    pub reason: Option<SelectionReason>,
}

/// Lifecycle operations available in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BulkOp {
    Archive,
    Unarchive,
    SoftDelete,
    Restore,
    PermanentDelete,
}

/// Result of [`ReviewService::replay_subject`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub outcome: ReplayOutcome,
    /// Whether the replayed state equals the stored one.
    pub matches_stored: bool,
}

/// Transactional façade over the scheduling core.
pub struct ReviewService {
    store: Arc<dyn ReviewStore>,
    model: Arc<dyn MemoryModel>,
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityResolver>,
    prioritizer: ReviewQueuePrioritizer,
    config: RecallConfig,
    rng: Mutex<StdRng>,
}

impl ReviewService {
    /// Create a service with an entropy-seeded random source.
    pub fn new(
        store: Arc<dyn ReviewStore>,
        model: Arc<dyn MemoryModel>,
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityResolver>,
        config: RecallConfig,
    ) -> Self {
        let prioritizer = ReviewQueuePrioritizer::new(model.clone(), &config.queue);
        Self {
            store,
            model,
            clock,
            identity,
            prioritizer,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the random source with a seeded one.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn config(&self) -> &RecallConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<dyn MemoryModel> {
        &self.model
    }

    fn rng(&self) -> RecallResult<std::sync::MutexGuard<'_, StdRng>> {
        self.rng
            .lock()
            .map_err(|_| RecallError::internal("Random source lock poisoned"))
    }

    /// Load an item and check it belongs to `owner_id`.
    fn owned_item(&self, owner_id: &str, item_id: &str) -> RecallResult<MemoryItem> {
        let item = self
            .store
            .get_item(item_id)?
            .ok_or_else(|| RecallError::not_found(item_id))?;
        if item.owner_id != owner_id {
            return Err(RecallError::ownership(item_id, owner_id));
        }
        Ok(item)
    }

    fn owned_concept(&self, owner_id: &str, concept_id: &str) -> RecallResult<Concept> {
        let concept = self
            .store
            .get_concept(concept_id)?
            .ok_or_else(|| RecallError::not_found(concept_id))?;
        if concept.item.owner_id != owner_id {
            return Err(RecallError::ownership(concept_id, owner_id));
        }
        Ok(concept)
    }

    /// Create a question item in the new state.
    pub fn create_item(&self, caller: &str) -> RecallResult<MemoryItem> {
        let owner_id = self.identity.resolve(caller)?;
        let now = self.clock.now();

        let item = MemoryItem::new(owner_id, now).with_state(self.model.initialize(now));
        let delta = ledger::creation_delta(&item.state, now);
        self.store.insert_item(&item, &delta, now)?;

        debug!(item_id = %item.id, "Created item");
        Ok(item)
    }

    /// Create a concept with initial phrasings.
    ///
    /// `canonical` indexes into `phrasings`. A concept created without
    /// phrasings exists but is never presented until one is added.
    pub fn create_concept(
        &self,
        caller: &str,
        title: &str,
        phrasings: &[&str],
        canonical: Option<usize>,
    ) -> RecallResult<(Concept, Vec<Phrasing>)> {
        let owner_id = self.identity.resolve(caller)?;
        if title.trim().is_empty() {
            return Err(RecallError::validation("Concept title must not be empty"));
        }
        if phrasings.iter().any(|text| text.trim().is_empty()) {
            return Err(RecallError::validation("Phrasing text must not be empty"));
        }
        if let Some(index) = canonical.filter(|i| *i >= phrasings.len()) {
            return Err(RecallError::validation_with_suggestion(
                format!("Canonical phrasing index {} is out of range", index),
                format!("Use an index below {}", phrasings.len()),
            ));
        }

        let now = self.clock.now();
        let mut concept = Concept::new(owner_id, title.trim(), now);
        concept.item.state = self.model.initialize(now);

        let variants: Vec<Phrasing> = phrasings
            .iter()
            .enumerate()
            .map(|(order, text)| Phrasing::new(&concept, text.trim(), order as u32, now))
            .collect();
        concept.phrasing_count = variants.len() as u32;
        concept.canonical_phrasing_id = canonical.map(|i| variants[i].id.clone());

        let delta = ledger::creation_delta(&concept.item.state, now);
        self.store.insert_concept(&concept, &variants, &delta, now)?;

        debug!(concept_id = %concept.id(), "Created concept");
        Ok((concept, variants))
    }

    /// Add a phrasing to an existing concept.
    pub fn add_phrasing(&self, caller: &str, concept_id: &str, text: &str) -> RecallResult<Phrasing> {
        let owner_id = self.identity.resolve(caller)?;
        if text.trim().is_empty() {
            return Err(RecallError::validation("Phrasing text must not be empty"));
        }

        let concept = self.owned_concept(&owner_id, concept_id)?;
        let next_order = self
            .store
            .phrasings_for(concept_id)?
            .iter()
            .map(|p| p.creation_order + 1)
            .max()
            .unwrap_or(0);

        let phrasing = Phrasing::new(&concept, text.trim(), next_order, self.clock.now());
        self.store.insert_phrasing(&phrasing)?;
        Ok(phrasing)
    }

    /// Record one answer: schedule, log the interaction and patch the ledger
    /// in a single transaction.
    pub fn submit_answer(&self, caller: &str, answer: &Answer) -> RecallResult<AnswerOutcome> {
        let owner_id = self.identity.resolve(caller)?;
        let item = self.owned_item(&owner_id, &answer.subject_id)?;
        if !item.is_active() {
            return Err(RecallError::inactive(&item.id));
        }

        let now = self.clock.now();

        let phrasing = match (item.kind, &answer.phrasing_id) {
            (ItemKind::Concept, Some(phrasing_id)) => {
                let mut phrasing = self
                    .store
                    .phrasings_for(&item.id)?
                    .into_iter()
                    .find(|p| &p.id == phrasing_id)
                    .ok_or_else(|| RecallError::not_found(phrasing_id))?;
                if !phrasing.is_active() {
                    return Err(RecallError::inactive(phrasing_id));
                }
                phrasing.record_attempt(answer.is_correct, now);
                Some(phrasing)
            }
            (ItemKind::Concept, None) => {
                return Err(RecallError::validation_with_suggestion(
                    "Answers to a concept must name the phrasing presented",
                    "Pass the phrasing id returned by next_review",
                ))
            }
            (ItemKind::Question, Some(_)) => {
                return Err(RecallError::validation("Questions have no phrasings"))
            }
            (ItemKind::Question, None) => None,
        };

        let outcome = self.model.schedule(&item.state, answer.is_correct, now);
        let delta = ledger::transition_delta(&item.state, &outcome.state, now);

        let mut interaction = Interaction::new(
            owner_id.clone(),
            item.id.clone(),
            answer.answer.clone(),
            answer.is_correct,
            now,
        )
        .with_snapshot(InteractionSnapshot {
            scheduled_days: outcome.interval_days,
            next_review_at: outcome.next_review_at(),
            state: outcome.state.state,
            grade: outcome.grade,
        });
        if let Some(p) = &phrasing {
            interaction = interaction.with_phrasing(p.id.clone());
        }

        self.store.commit_review(&ReviewCommit {
            owner_id,
            item_id: item.id.clone(),
            expected_reps: item.state.reps,
            state: outcome.state.clone(),
            interaction: interaction.clone(),
            phrasing,
            delta,
            now,
        })?;

        debug!(
            item_id = %item.id,
            state = %outcome.state.state,
            interval_days = outcome.interval_days,
            "Recorded answer"
        );

        Ok(AnswerOutcome {
            outcome,
            interaction,
        })
    }

    /// The next item to present, with a phrasing chosen for concepts.
    ///
    /// Candidates come from two bounded windows (most overdue practiced items
    /// and newest never-practiced ones); the ordering over them is global.
    /// Concepts with no selectable phrasing are skipped.
    pub fn next_review(&self, caller: &str) -> RecallResult<Option<ReviewCard>> {
        let owner_id = self.identity.resolve(caller)?;
        let now = self.clock.now();

        let mut candidates = self
            .store
            .most_overdue(&owner_id, now, self.config.queue.overdue_window)?;
        candidates.extend(
            self.store
                .newest_unpracticed(&owner_id, self.config.queue.new_item_window)?,
        );

        let ordered = {
            let mut rng = self.rng()?;
            self.prioritizer.order(candidates, now, &mut *rng)
        };

        for scored in ordered {
            if scored.item.kind == ItemKind::Question {
                return Ok(Some(ReviewCard {
                    item: scored.item,
                    score: scored.score,
                    concept: None,
                    phrasing: None,
                    reason: None,
                }));
            }

            let Some(concept) = self.store.get_concept(&scored.item.id)? else {
                continue;
            };
            if !concept.is_selectable() {
                continue;
            }

            let variants = self.store.phrasings_for(concept.id())?;
            let selection = {
                let mut rng = self.rng()?;
                select_phrasing(
                    &variants,
                    concept.canonical_phrasing_id.as_deref(),
                    &self.config.phrasing,
                    &mut *rng,
                )
            };

            match selection.phrasing {
                Some(phrasing) => {
                    let phrasing = phrasing.clone();
                    return Ok(Some(ReviewCard {
                        item: scored.item,
                        score: scored.score,
                        concept: Some(concept),
                        phrasing: Some(phrasing),
                        reason: Some(selection.reason),
                    }));
                }
                None => {
                    debug!(concept_id = %concept.id(), "Skipping concept without active phrasings");
                }
            }
        }

        Ok(None)
    }

    /// Exact number of items presentable now. Never capped.
    pub fn due_count(&self, caller: &str) -> RecallResult<u64> {
        let owner_id = self.identity.resolve(caller)?;
        self.store.count_due(&owner_id, self.clock.now())
    }

    /// Apply one lifecycle operation to many items, all or nothing.
    ///
    /// Every id is checked before anything is written; the first missing or
    /// foreign item aborts the whole batch with an error naming it. Returns
    /// the number of items changed.
    pub fn bulk_update(&self, caller: &str, item_ids: &[String], op: BulkOp) -> RecallResult<usize> {
        let owner_id = self.identity.resolve(caller)?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = item_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let loaded = self.store.get_items(&ids)?;
        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            let item = loaded
                .iter()
                .find(|item| &item.id == id)
                .ok_or_else(|| RecallError::not_found(id))?;
            if item.owner_id != owner_id {
                return Err(RecallError::ownership(id, &owner_id));
            }
            items.push(item);
        }

        let now = self.clock.now();
        let mut mutations = Vec::with_capacity(items.len());
        let mut delta = StatsDelta::default();

        for item in items {
            let Some((mutation, becomes_active)) = Self::plan(item, op, now) else {
                continue;
            };
            delta = delta.merge(ledger::activity_delta(item, becomes_active, now));
            mutations.push(mutation);
        }

        if mutations.is_empty() {
            return Ok(0);
        }

        self.store.commit_bulk(&owner_id, &mutations, &delta, now)?;
        info!(owner_id = %owner_id, op = %op, changed = mutations.len(), "Bulk update applied");
        Ok(mutations.len())
    }

    /// The mutation `op` makes to `item` and whether the item ends up active.
    /// `None` when the item is already in the target state.
    fn plan(item: &MemoryItem, op: BulkOp, now: DateTime<Utc>) -> Option<(ItemMutation, bool)> {
        let item_id = item.id.clone();
        match op {
            BulkOp::Archive if item.archived_at.is_none() => {
                Some((ItemMutation::SetArchived { item_id, at: Some(now) }, false))
            }
            BulkOp::Unarchive if item.archived_at.is_some() => Some((
                ItemMutation::SetArchived { item_id, at: None },
                item.deleted_at.is_none(),
            )),
            BulkOp::SoftDelete if item.deleted_at.is_none() => {
                Some((ItemMutation::SetDeleted { item_id, at: Some(now) }, false))
            }
            BulkOp::Restore if item.deleted_at.is_some() => Some((
                ItemMutation::SetDeleted { item_id, at: None },
                item.archived_at.is_none(),
            )),
            BulkOp::PermanentDelete => Some((ItemMutation::Purge { item_id }, false)),
            _ => None,
        }
    }

    /// Rebuild a subject's state from its interactions and compare with the
    /// stored state. `limit` replays only the most recent interactions.
    pub fn replay_subject(
        &self,
        caller: &str,
        subject_id: &str,
        limit: Option<usize>,
    ) -> RecallResult<ReplayReport> {
        let owner_id = self.identity.resolve(caller)?;
        let item = self.owned_item(&owner_id, subject_id)?;
        let interactions = self.store.interactions_for(subject_id, limit)?;

        let outcome = InteractionReplay::new(self.model.clone()).replay(item.created_at, &interactions);
        let matches_stored = outcome.matches(&item.state);
        if !matches_stored {
            debug!(item_id = %subject_id, applied = outcome.applied, "Replayed state differs from stored state");
        }

        Ok(ReplayReport {
            outcome,
            matches_stored,
        })
    }

    /// The owner's counters; all zero before the first item exists.
    pub fn stats(&self, caller: &str) -> RecallResult<StatsLedger> {
        let owner_id = self.identity.resolve(caller)?;
        Ok(self
            .store
            .get_ledger(&owner_id)?
            .unwrap_or_else(|| StatsLedger::empty(owner_id, self.clock.now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FsrsEngine;
    use crate::store::SqliteReviewStore;
    use crate::traits::{FixedClock, PassthroughIdentity};
    use crate::types::CardState;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-09-02T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn service() -> (ReviewService, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(t0()));
        let service = ReviewService::new(
            Arc::new(SqliteReviewStore::in_memory().unwrap()),
            Arc::new(FsrsEngine::new()),
            clock.clone(),
            Arc::new(PassthroughIdentity),
            RecallConfig::default(),
        )
        .with_seed(5);
        (service, clock)
    }

    #[test]
    fn test_create_and_answer_question() {
        let (service, _clock) = service();
        let item = service.create_item("alice").unwrap();

        let result = service
            .submit_answer("alice", &Answer::new(&item.id, "mitochondria", true))
            .unwrap();
        assert_eq!(result.outcome.state.state, CardState::Learning);
        assert!(result.interaction.snapshot.is_some());

        let stats = service.stats("alice").unwrap();
        assert_eq!(stats.total_cards, 1);
        assert_eq!(stats.new_count, 0);
        assert_eq!(stats.learning_count, 1);
    }

    #[test]
    fn test_answer_by_other_owner_is_rejected() {
        let (service, _clock) = service();
        let item = service.create_item("alice").unwrap();

        let err = service
            .submit_answer("mallory", &Answer::new(&item.id, "x", true))
            .unwrap_err();
        assert!(matches!(err, RecallError::Ownership { .. }));
    }

    #[test]
    fn test_concept_answer_requires_phrasing() {
        let (service, _clock) = service();
        let (concept, phrasings) = service
            .create_concept("alice", "Osmosis", &["What is osmosis?"], None)
            .unwrap();

        let err = service
            .submit_answer("alice", &Answer::new(concept.id(), "x", true))
            .unwrap_err();
        assert!(matches!(err, RecallError::Validation { .. }));

        service
            .submit_answer(
                "alice",
                &Answer::new(concept.id(), "water moves", true).with_phrasing(&phrasings[0].id),
            )
            .unwrap();
        let stored = service.store.phrasings_for(concept.id()).unwrap();
        assert_eq!(stored[0].attempt_count, 1);
        assert_eq!(stored[0].correct_count, 1);
    }

    #[test]
    fn test_create_concept_validates_canonical_index() {
        let (service, _clock) = service();
        let err = service
            .create_concept("alice", "Osmosis", &["a"], Some(3))
            .unwrap_err();
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_add_phrasing_continues_creation_order() {
        let (service, _clock) = service();
        let (concept, _) = service
            .create_concept("alice", "Osmosis", &["a", "b"], Some(0))
            .unwrap();

        let added = service.add_phrasing("alice", concept.id(), "c").unwrap();
        assert_eq!(added.creation_order, 2);
        assert!(service.add_phrasing("bob", concept.id(), "d").is_err());
    }

    #[test]
    fn test_next_review_prefers_new_items() {
        let (service, clock) = service();
        let first = service.create_item("alice").unwrap();
        service
            .submit_answer("alice", &Answer::new(&first.id, "x", false))
            .unwrap();

        clock.advance(Duration::hours(2));
        let fresh = service.create_item("alice").unwrap();

        let card = service.next_review("alice").unwrap().unwrap();
        assert_eq!(card.item.id, fresh.id);
        assert!(card.score < -1.0);
    }

    #[test]
    fn test_next_review_selects_canonical_phrasing() {
        let (service, _clock) = service();
        let (concept, phrasings) = service
            .create_concept("alice", "Osmosis", &["a", "b", "c"], Some(1))
            .unwrap();

        let card = service.next_review("alice").unwrap().unwrap();
        assert_eq!(card.item.id, concept.id());
        assert_eq!(card.phrasing.unwrap().id, phrasings[1].id);
        assert_eq!(card.reason, Some(SelectionReason::Canonical));
    }

    #[test]
    fn test_next_review_skips_concept_without_phrasings() {
        let (service, _clock) = service();
        service.create_concept("alice", "Empty", &[], None).unwrap();
        assert!(service.next_review("alice").unwrap().is_none());
        assert_eq!(service.due_count("alice").unwrap(), 0);
    }

    #[test]
    fn test_bulk_update_rejects_foreign_item_without_changes() {
        let (service, _clock) = service();
        let mine = service.create_item("alice").unwrap();
        let theirs = service.create_item("bob").unwrap();

        let err = service
            .bulk_update("alice", &[mine.id.clone(), theirs.id.clone()], BulkOp::Archive)
            .unwrap_err();
        assert_eq!(err.item_id(), Some(theirs.id.as_str()));

        let stored = service.store.get_item(&mine.id).unwrap().unwrap();
        assert!(stored.archived_at.is_none());
        assert_eq!(service.stats("alice").unwrap().total_cards, 1);
    }

    #[test]
    fn test_bulk_lifecycle_keeps_ledger_consistent() {
        let (service, _clock) = service();
        let ids: Vec<String> = (0..4)
            .map(|_| service.create_item("alice").unwrap().id)
            .collect();

        assert_eq!(service.bulk_update("alice", &ids[..2], BulkOp::Archive).unwrap(), 2);
        assert_eq!(service.stats("alice").unwrap().total_cards, 2);

        // Already archived: nothing to do.
        assert_eq!(service.bulk_update("alice", &ids[..1], BulkOp::Archive).unwrap(), 0);

        service.bulk_update("alice", &ids[..1], BulkOp::SoftDelete).unwrap();
        service.bulk_update("alice", &ids[..1], BulkOp::Unarchive).unwrap();
        // Still deleted, so not counted.
        assert_eq!(service.stats("alice").unwrap().total_cards, 2);

        service.bulk_update("alice", &ids[..1], BulkOp::Restore).unwrap();
        assert_eq!(service.stats("alice").unwrap().total_cards, 3);

        service.bulk_update("alice", &ids[2..], BulkOp::PermanentDelete).unwrap();
        let stats = service.stats("alice").unwrap();
        assert_eq!(stats.total_cards, 1);
        assert!(stats.is_consistent());
        assert!(service.store.get_item(&ids[3]).unwrap().is_none());
    }

    #[test]
    fn test_archived_item_cannot_be_answered() {
        let (service, _clock) = service();
        let item = service.create_item("alice").unwrap();
        service
            .bulk_update("alice", &[item.id.clone()], BulkOp::Archive)
            .unwrap();

        let err = service
            .submit_answer("alice", &Answer::new(&item.id, "x", true))
            .unwrap_err();
        assert!(matches!(err, RecallError::Inactive { .. }));
    }

    #[test]
    fn test_replay_subject_matches_live_state() {
        let (service, clock) = service();
        let item = service.create_item("alice").unwrap();

        for (correct, wait) in [(true, 0), (false, 15), (true, 20), (true, 60 * 24 * 4)] {
            clock.advance(Duration::minutes(wait));
            service
                .submit_answer("alice", &Answer::new(&item.id, "x", correct))
                .unwrap();
        }

        let report = service.replay_subject("alice", &item.id, None).unwrap();
        assert_eq!(report.outcome.applied, 4);
        assert!(report.matches_stored);
    }
}
