//! Transactional storage for items, concepts, interactions and ledgers.
//!
//! Every mutating method is one atomic unit: item rows, the interaction row
//! and the ledger delta are written together or not at all.

mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecallResult;
use crate::types::{Concept, Interaction, ItemState, MemoryItem, Phrasing, StatsDelta, StatsLedger};

pub use sqlite::SqliteReviewStore;

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<MemoryItem>,
    /// Pass back to continue after the last returned item.
    pub cursor: Option<String>,
    /// No further pages.
    pub is_done: bool,
}

/// Everything written when one answer is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewCommit {
    pub owner_id: String,
    pub item_id: String,
    /// Repetition count the state was scheduled from; the write fails if it moved.
    pub expected_reps: u32,
    /// Scheduled state replacing the item's current one.
    pub state: ItemState,
    pub interaction: Interaction,
    /// Phrasing with its attempt statistics already updated.
    pub phrasing: Option<Phrasing>,
    pub delta: StatsDelta,
    pub now: DateTime<Utc>,
}

/// A lifecycle change applied by a bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemMutation {
    /// Set or clear `archived_at`.
    SetArchived {
        item_id: String,
        at: Option<DateTime<Utc>>,
    },
    /// Set or clear `deleted_at`.
    SetDeleted {
        item_id: String,
        at: Option<DateTime<Utc>>,
    },
    /// Remove the item and everything attached to it.
    Purge { item_id: String },
}

impl ItemMutation {
    pub fn item_id(&self) -> &str {
        match self {
            Self::SetArchived { item_id, .. }
            | Self::SetDeleted { item_id, .. }
            | Self::Purge { item_id } => item_id,
        }
    }
}

/// Storage collaborator used by the service and the reconciliation sampler.
pub trait ReviewStore: Send + Sync {
    /// Insert a question item and apply its creation delta.
    fn insert_item(&self, item: &MemoryItem, delta: &StatsDelta, now: DateTime<Utc>) -> RecallResult<()>;

    /// Insert a concept with its initial phrasings and apply its creation delta.
    fn insert_concept(
        &self,
        concept: &Concept,
        phrasings: &[Phrasing],
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> RecallResult<()>;

    /// Add a phrasing to an existing concept, bumping its phrasing count.
    fn insert_phrasing(&self, phrasing: &Phrasing) -> RecallResult<()>;

    fn get_item(&self, id: &str) -> RecallResult<Option<MemoryItem>>;

    /// Fetch several items; missing ids are skipped.
    fn get_items(&self, ids: &[String]) -> RecallResult<Vec<MemoryItem>>;

    fn get_concept(&self, id: &str) -> RecallResult<Option<Concept>>;

    /// All phrasings of a concept, in creation order, active or not.
    fn phrasings_for(&self, concept_id: &str) -> RecallResult<Vec<Phrasing>>;

    /// Record one answer atomically.
    fn commit_review(&self, commit: &ReviewCommit) -> RecallResult<()>;

    /// Active practiced items due at `now`, most overdue first.
    fn most_overdue(&self, owner_id: &str, now: DateTime<Utc>, limit: usize) -> RecallResult<Vec<MemoryItem>>;

    /// Active never-practiced items, newest first.
    fn newest_unpracticed(&self, owner_id: &str, limit: usize) -> RecallResult<Vec<MemoryItem>>;

    /// Exact number of presentable items at `now` (due or never practiced).
    fn count_due(&self, owner_id: &str, now: DateTime<Utc>) -> RecallResult<u64>;

    /// Keyset scan over an owner's non-deleted items.
    fn paginate_items(&self, owner_id: &str, cursor: Option<String>, limit: usize) -> RecallResult<Page>;

    /// Interactions for a subject in chronological order; `limit` keeps the most recent.
    fn interactions_for(&self, subject_id: &str, limit: Option<usize>) -> RecallResult<Vec<Interaction>>;

    fn get_ledger(&self, owner_id: &str) -> RecallResult<Option<StatsLedger>>;

    /// Apply a delta on its own, bootstrapping the ledger if needed.
    fn apply_stats_delta(&self, owner_id: &str, delta: &StatsDelta, now: DateTime<Utc>) -> RecallResult<StatsLedger>;

    /// Replace a ledger wholesale.
    fn overwrite_ledger(&self, ledger: &StatsLedger) -> RecallResult<()>;

    /// Apply lifecycle mutations and their combined delta atomically.
    fn commit_bulk(
        &self,
        owner_id: &str,
        mutations: &[ItemMutation],
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> RecallResult<()>;

    /// Up to `limit` owners whose sample key follows `pivot`, wrapping around.
    fn sample_owners(&self, pivot: f64, limit: usize) -> RecallResult<Vec<String>>;
}
