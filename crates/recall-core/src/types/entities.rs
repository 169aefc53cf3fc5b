//! Stored entities: items, concepts, phrasings and interactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::item_state::{CardState, Grade, ItemState};

/// What kind of entity a [`MemoryItem`] carries the memory state for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemKind {
    /// A flat question with a single presentation.
    #[default]
    Question,
    /// A concept presented through one of its phrasings.
    Concept,
}

/// A schedulable unit of practice owned by one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier.
    pub id: String,
    /// The learner this item belongs to.
    pub owner_id: String,
    /// Entity kind.
    pub kind: ItemKind,
    /// Memory-model state.
    pub state: ItemState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set while archived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    /// Set while soft-deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MemoryItem {
    /// Create a never-practiced question due at `now`.
    pub fn new(owner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            kind: ItemKind::Question,
            state: ItemState::new_at(now),
            created_at: now,
            archived_at: None,
            deleted_at: None,
        }
    }

    /// Set the identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the kind.
    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the memory state.
    pub fn with_state(mut self, state: ItemState) -> Self {
        self.state = state;
        self
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Included in the queue and the ledger.
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none() && self.deleted_at.is_none()
    }

    /// Lifecycle state shortcut.
    pub fn card_state(&self) -> CardState {
        self.state.state
    }
}

/// A concept: one idea practiced through several alternative phrasings.
///
/// The memory state lives on the embedded [`MemoryItem`] (kind
/// [`ItemKind::Concept`]), so concepts share the queue, the ledger and the
/// memory model with plain questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    /// Memory-bearing record; its id is the concept id.
    pub item: MemoryItem,
    /// Human-readable title.
    pub title: String,
    /// Number of active phrasings.
    pub phrasing_count: u32,
    /// Preferred phrasing, if designated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_phrasing_id: Option<String>,
    /// Derived signal: how thinly the concept is covered by phrasings.
    #[serde(default)]
    pub thin_score: f64,
    /// Derived signal: how much its phrasings disagree.
    #[serde(default)]
    pub conflict_score: f64,
}

impl Concept {
    /// Create a concept with no phrasings yet.
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            item: MemoryItem::new(owner_id, now).with_kind(ItemKind::Concept),
            title: title.into(),
            phrasing_count: 0,
            canonical_phrasing_id: None,
            thin_score: 0.0,
            conflict_score: 0.0,
        }
    }

    /// Concept id (same as the embedded item id).
    pub fn id(&self) -> &str {
        &self.item.id
    }

    /// Whether the concept may be presented at all.
    pub fn is_selectable(&self) -> bool {
        self.phrasing_count > 0 && self.item.deleted_at.is_none()
    }
}

/// One wording of a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrasing {
    /// Unique identifier.
    pub id: String,
    /// Parent concept.
    pub concept_id: String,
    /// Owner (same as the concept's).
    pub owner_id: String,
    /// Presented text.
    pub text: String,
    /// Times presented and answered.
    pub attempt_count: u32,
    /// Times answered correctly.
    pub correct_count: u32,
    /// Time of the last answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempted_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Monotonic creation sequence within the concept; final tie-breaker.
    pub creation_order: u32,
    /// Set while archived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    /// Set while soft-deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Phrasing {
    /// Create a phrasing for `concept`.
    pub fn new(
        concept: &Concept,
        text: impl Into<String>,
        creation_order: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            concept_id: concept.id().to_string(),
            owner_id: concept.item.owner_id.clone(),
            text: text.into(),
            attempt_count: 0,
            correct_count: 0,
            last_attempted_at: None,
            created_at: now,
            creation_order,
            archived_at: None,
            deleted_at: None,
        }
    }

    /// Eligible for selection.
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none() && self.deleted_at.is_none()
    }

    /// Record one answer against this phrasing.
    pub fn record_attempt(&mut self, is_correct: bool, at: DateTime<Utc>) {
        self.attempt_count += 1;
        if is_correct {
            self.correct_count += 1;
        }
        self.last_attempted_at = Some(at);
    }
}

/// Scheduling result captured alongside an interaction for audit and replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSnapshot {
    /// Interval the model scheduled, in days.
    pub scheduled_days: f64,
    /// Resulting due time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
    /// Resulting lifecycle state.
    pub state: CardState,
    /// Grade fed to the model.
    pub grade: Grade,
}

/// Immutable record of one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Unique identifier.
    pub id: String,
    /// Owner of the subject.
    pub owner_id: String,
    /// Item or concept answered.
    pub subject_id: String,
    /// Phrasing presented, for concepts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phrasing_id: Option<String>,
    /// Learner's answer.
    pub answer: String,
    /// Whether it was correct.
    pub is_correct: bool,
    /// When it was given.
    pub answered_at: DateTime<Utc>,
    /// Derived scheduling snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<InteractionSnapshot>,
}

impl Interaction {
    /// Create an interaction without a snapshot.
    pub fn new(
        owner_id: impl Into<String>,
        subject_id: impl Into<String>,
        answer: impl Into<String>,
        is_correct: bool,
        answered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            subject_id: subject_id.into(),
            phrasing_id: None,
            answer: answer.into(),
            is_correct,
            answered_at,
            snapshot: None,
        }
    }

    /// Attach the phrasing presented.
    pub fn with_phrasing(mut self, phrasing_id: impl Into<String>) -> Self {
        self.phrasing_id = Some(phrasing_id.into());
        self
    }

    /// Attach the scheduling snapshot.
    pub fn with_snapshot(mut self, snapshot: InteractionSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_active_and_new() {
        let now = Utc::now();
        let item = MemoryItem::new("alice", now);
        assert!(item.is_active());
        assert_eq!(item.card_state(), CardState::New);
        assert_eq!(item.kind, ItemKind::Question);
        assert_eq!(item.created_at, now);
    }

    #[test]
    fn test_concept_selectable_requires_phrasings() {
        let now = Utc::now();
        let mut concept = Concept::new("alice", "Photosynthesis", now);
        assert!(!concept.is_selectable());

        concept.phrasing_count = 2;
        assert!(concept.is_selectable());

        concept.item.deleted_at = Some(now);
        assert!(!concept.is_selectable());
    }

    #[test]
    fn test_phrasing_record_attempt() {
        let now = Utc::now();
        let concept = Concept::new("alice", "Mitosis", now);
        let mut phrasing = Phrasing::new(&concept, "What is mitosis?", 0, now);

        phrasing.record_attempt(true, now);
        phrasing.record_attempt(false, now);

        assert_eq!(phrasing.attempt_count, 2);
        assert_eq!(phrasing.correct_count, 1);
        assert_eq!(phrasing.last_attempted_at, Some(now));
        assert_eq!(phrasing.owner_id, "alice");
        assert_eq!(phrasing.concept_id, concept.id());
    }
}
