//! End-to-end review flows through the service, checked against recounts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use recall_core::reconcile::drift;
use recall_core::{
    Answer, BulkOp, CardState, Clock, FixedClock, FsrsEngine, PassthroughIdentity, RecallConfig,
    ReconcileConfig, ReconciliationSampler, ReviewService, ReviewStore, SelectionReason,
    SqliteReviewStore,
};

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-09-02T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

struct Harness {
    store: Arc<SqliteReviewStore>,
    clock: Arc<FixedClock>,
    service: ReviewService,
    sampler: ReconciliationSampler,
}

fn harness(seed: u64) -> Harness {
    let store = Arc::new(SqliteReviewStore::in_memory().unwrap());
    let clock = Arc::new(FixedClock::new(t0()));
    let service = ReviewService::new(
        store.clone(),
        Arc::new(FsrsEngine::new()),
        clock.clone(),
        Arc::new(PassthroughIdentity),
        RecallConfig::default(),
    )
    .with_seed(seed);
    let sampler = ReconciliationSampler::new(
        store.clone(),
        clock.clone(),
        ReconcileConfig {
            batch_size: 7,
            ..Default::default()
        },
    );
    Harness {
        store,
        clock,
        service,
        sampler,
    }
}

impl Harness {
    /// Ledger counters must match a full recount at the current instant.
    fn assert_ledger_matches(&self, owner: &str) {
        let now = self.clock.now();
        let ledger = self.service.stats(owner).unwrap();
        let truth = self.sampler.recount_owner(owner, now).unwrap();
        assert!(ledger.is_consistent(), "ledger total != bucket sum: {:?}", ledger);
        assert_eq!(drift(&ledger, &truth), 0, "ledger {:?} vs truth {:?}", ledger, truth);
    }
}

#[test]
fn test_concept_review_session() {
    let h = harness(11);
    let (concept, phrasings) = h
        .service
        .create_concept(
            "alice",
            "Photosynthesis",
            &["What does photosynthesis produce?", "Name the outputs of photosynthesis"],
            Some(1),
        )
        .unwrap();
    let question = h.service.create_item("alice").unwrap();
    h.assert_ledger_matches("alice");

    let stats = h.service.stats("alice").unwrap();
    assert_eq!(stats.total_cards, 2);
    assert_eq!(stats.new_count, 2);
    assert_eq!(stats.due_now_count, 0);

    // Both items are new; whichever comes first, concepts get their canonical phrasing.
    let card = h.service.next_review("alice").unwrap().unwrap();
    assert!(card.score < -1.0);
    if card.item.id == concept.id() {
        assert_eq!(card.reason, Some(SelectionReason::Canonical));
        assert_eq!(card.phrasing.as_ref().unwrap().id, phrasings[1].id);
    } else {
        assert_eq!(card.item.id, question.id);
        assert!(card.phrasing.is_none());
    }

    h.service
        .submit_answer(
            "alice",
            &Answer::new(concept.id(), "glucose and oxygen", true).with_phrasing(&phrasings[1].id),
        )
        .unwrap();
    h.service
        .submit_answer("alice", &Answer::new(&question.id, "wrong", false))
        .unwrap();
    h.assert_ledger_matches("alice");

    let stats = h.service.stats("alice").unwrap();
    assert_eq!(stats.new_count, 0);
    assert_eq!(stats.learning_count, 2);
    assert!(stats.next_review_time.unwrap() > h.clock.now());

    // The replayed interaction log reproduces the stored state.
    let report = h.service.replay_subject("alice", concept.id(), None).unwrap();
    assert!(report.matches_stored);
    assert_eq!(report.outcome.applied, 1);
}

#[test]
fn test_ledger_tracks_lifecycle() {
    let h = harness(3);
    let ids: Vec<String> = (0..6)
        .map(|_| h.service.create_item("alice").unwrap().id)
        .collect();

    for id in &ids[..3] {
        h.service
            .submit_answer("alice", &Answer::new(id, "a", true))
            .unwrap();
    }
    h.assert_ledger_matches("alice");

    assert_eq!(
        h.service
            .bulk_update("alice", &ids[..2], BulkOp::Archive)
            .unwrap(),
        2
    );
    h.assert_ledger_matches("alice");

    h.service
        .bulk_update("alice", &ids[2..4], BulkOp::SoftDelete)
        .unwrap();
    h.assert_ledger_matches("alice");

    h.service
        .bulk_update("alice", &ids[..1], BulkOp::Unarchive)
        .unwrap();
    h.service
        .bulk_update("alice", &ids[2..3], BulkOp::Restore)
        .unwrap();
    h.assert_ledger_matches("alice");

    h.service
        .bulk_update("alice", &ids[4..], BulkOp::PermanentDelete)
        .unwrap();
    h.assert_ledger_matches("alice");

    let stats = h.service.stats("alice").unwrap();
    // ids[0] and ids[2] are practiced and active again; ids[1] archived, ids[3] deleted.
    assert_eq!(stats.total_cards, 2);
    assert_eq!(stats.learning_count, 2);
    assert!(h.store.get_item(&ids[5]).unwrap().is_none());
}

#[test]
fn test_bulk_update_is_all_or_nothing() {
    let h = harness(3);
    let mine = h.service.create_item("alice").unwrap();
    let theirs = h.service.create_item("bob").unwrap();
    let before = h.service.stats("alice").unwrap();

    let err = h
        .service
        .bulk_update(
            "alice",
            &[mine.id.clone(), theirs.id.clone()],
            BulkOp::Archive,
        )
        .unwrap_err();
    assert_eq!(err.item_id(), Some(theirs.id.as_str()));

    assert!(h.store.get_item(&mine.id).unwrap().unwrap().is_active());
    let after = h.service.stats("alice").unwrap();
    assert_eq!(after.total_cards, before.total_cards);
}

#[test]
fn test_ledger_never_negative_and_repaired_after_time_passes() {
    let h = harness(9);
    let item = h.service.create_item("alice").unwrap();
    h.service
        .submit_answer("alice", &Answer::new(&item.id, "a", true))
        .unwrap();

    // The item became due without any mutation, so the ledger lags behind.
    h.clock.advance(Duration::hours(2));
    let stale = h.service.stats("alice").unwrap();
    assert_eq!(stale.due_now_count, 0);

    // Answering moves it out of due; the decrement is clamped at zero.
    h.service
        .submit_answer("alice", &Answer::new(&item.id, "a", true))
        .unwrap();
    let stats = h.service.stats("alice").unwrap();
    assert_eq!(stats.due_now_count, 0);
    assert!(stats.is_consistent());

    // Buckets are exact, so a lagging due count alone is not corrected.
    h.clock.advance(Duration::days(30));
    let report = h.sampler.run();
    assert_eq!(report.owners_checked, 1);
    assert_eq!(report.corrections, 0);
    assert_eq!(h.service.stats("alice").unwrap().due_now_count, 0);
    h.assert_ledger_matches("alice");

    let strict = ReconciliationSampler::new(
        h.store.clone(),
        h.clock.clone(),
        ReconcileConfig {
            due_drift_threshold: Some(0),
            ..Default::default()
        },
    );
    assert_eq!(strict.run().corrections, 1);
    let repaired = h.service.stats("alice").unwrap();
    assert_eq!(repaired.due_now_count, 1);
    assert_eq!(repaired.mature_count + repaired.learning_count, 1);
}

fn first_card_position(seed: u64) -> usize {
    let h = harness(seed);
    let ids: Vec<String> = (0..20)
        .map(|_| {
            h.clock.advance(Duration::seconds(1));
            h.service.create_item("alice").unwrap().id
        })
        .collect();
    let card = h.service.next_review("alice").unwrap().unwrap();
    ids.iter().position(|id| *id == card.item.id).unwrap()
}

#[test]
fn test_same_seed_same_queue() {
    assert_eq!(first_card_position(42), first_card_position(42));
}

#[test]
fn test_due_count_is_uncapped() {
    let h = harness(1);
    for _ in 0..1000 {
        h.service.create_item("alice").unwrap();
    }
    assert_eq!(h.service.due_count("alice").unwrap(), 1000);
    assert_eq!(h.service.stats("alice").unwrap().new_count, 1000);
}

#[test]
fn test_answering_archived_item_is_rejected() {
    let h = harness(1);
    let item = h.service.create_item("alice").unwrap();
    h.service
        .bulk_update("alice", &[item.id.clone()], BulkOp::Archive)
        .unwrap();

    let err = h
        .service
        .submit_answer("alice", &Answer::new(&item.id, "a", true))
        .unwrap_err();
    assert!(matches!(err, recall_core::RecallError::Inactive { .. }));
    assert_eq!(
        h.store.get_item(&item.id).unwrap().unwrap().card_state(),
        CardState::New
    );
}

#[test]
fn test_corrupted_state_is_still_answerable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recall.db");
    let store = Arc::new(SqliteReviewStore::new(&path).unwrap());
    let clock = Arc::new(FixedClock::new(t0()));
    let service = ReviewService::new(
        store.clone(),
        Arc::new(FsrsEngine::new()),
        clock.clone(),
        Arc::new(PassthroughIdentity),
        RecallConfig::default(),
    );
    let sampler = ReconciliationSampler::new(store.clone(), clock.clone(), ReconcileConfig::default());

    let item = service.create_item("alice").unwrap();
    service
        .submit_answer("alice", &Answer::new(&item.id, "a", true))
        .unwrap();
    clock.advance(Duration::minutes(15));
    service
        .submit_answer("alice", &Answer::new(&item.id, "a", true))
        .unwrap();
    assert_eq!(service.stats("alice").unwrap().mature_count, 1);

    rusqlite::Connection::open(&path)
        .unwrap()
        .execute(
            "UPDATE items SET state_json = ?2 WHERE id = ?1",
            rusqlite::params![item.id, r#"{"state":"review","reps":2,"stability":-1.0}"#],
        )
        .unwrap();

    let loaded = store.get_item(&item.id).unwrap().unwrap();
    assert_eq!(loaded.card_state(), CardState::Review);
    assert_eq!(loaded.state.reps, 2);

    for _ in 0..3 {
        clock.advance(Duration::minutes(1));
        service
            .submit_answer("alice", &Answer::new(&item.id, "no", false))
            .unwrap();
    }

    // The debit came out of the bucket the ledger actually counted.
    let stats = service.stats("alice").unwrap();
    assert_eq!(stats.mature_count, 0);
    assert_eq!(stats.learning_count, 1);
    assert_eq!(stats.new_count, 0);
    let truth = sampler.recount_owner("alice", clock.now()).unwrap();
    assert_eq!(drift(&stats, &truth), 0);
}
