//! Per-owner aggregate counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::item_state::CardState;

/// Counter bucket an item contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Bucket {
    New,
    Learning,
    Mature,
}

impl From<CardState> for Bucket {
    fn from(state: CardState) -> Self {
        match state {
            CardState::New => Bucket::New,
            CardState::Learning | CardState::Relearning => Bucket::Learning,
            CardState::Review => Bucket::Mature,
        }
    }
}

/// Denormalized counters for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsLedger {
    pub owner_id: String,
    pub total_cards: u64,
    pub new_count: u64,
    pub learning_count: u64,
    pub mature_count: u64,
    pub due_now_count: u64,
    /// Earliest upcoming review among practiced items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_time: Option<DateTime<Utc>>,
    /// When the row was last written.
    pub last_calculated: DateTime<Utc>,
}

impl StatsLedger {
    /// An all-zero ledger for `owner_id`.
    pub fn empty(owner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.into(),
            total_cards: 0,
            new_count: 0,
            learning_count: 0,
            mature_count: 0,
            due_now_count: 0,
            next_review_time: None,
            last_calculated: now,
        }
    }

    /// Count held in `bucket`.
    pub fn bucket(&self, bucket: Bucket) -> u64 {
        match bucket {
            Bucket::New => self.new_count,
            Bucket::Learning => self.learning_count,
            Bucket::Mature => self.mature_count,
        }
    }

    /// `total_cards == new + learning + mature`.
    pub fn is_consistent(&self) -> bool {
        self.total_cards == self.new_count + self.learning_count + self.mature_count
    }
}

/// Signed change to a ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsDelta {
    pub total_cards: i64,
    pub new_count: i64,
    pub learning_count: i64,
    pub mature_count: i64,
    pub due_now_count: i64,
    /// Candidate for the ledger's next review time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_time: Option<DateTime<Utc>>,
}

impl StatsDelta {
    /// Whether applying this delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.total_cards == 0
            && self.new_count == 0
            && self.learning_count == 0
            && self.mature_count == 0
            && self.due_now_count == 0
            && self.next_review_time.is_none()
    }

    /// Add `amount` to the counter for `bucket`.
    pub fn shift_bucket(&mut self, bucket: Bucket, amount: i64) {
        match bucket {
            Bucket::New => self.new_count += amount,
            Bucket::Learning => self.learning_count += amount,
            Bucket::Mature => self.mature_count += amount,
        }
    }

    /// Combine two deltas; the earlier next-review candidate wins.
    pub fn merge(mut self, other: StatsDelta) -> Self {
        self.total_cards += other.total_cards;
        self.new_count += other.new_count;
        self.learning_count += other.learning_count;
        self.mature_count += other.mature_count;
        self.due_now_count += other.due_now_count;
        self.next_review_time = match (self.next_review_time, other.next_review_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self
    }
}
