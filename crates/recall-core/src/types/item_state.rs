//! Memory state record shared by every practiced entity.
//!
//! Questions and concepts both adapt to and from [`ItemState`] at their
//! boundary, so there is exactly one state machine in the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a practiced item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CardState {
    /// Never practiced.
    #[default]
    New,
    /// Working through the initial short-term steps.
    Learning,
    /// Graduated; scheduled in whole days.
    Review,
    /// Forgotten after graduating; working through relearning steps.
    Relearning,
}

impl CardState {
    /// Whether this state works through short-term steps.
    pub fn is_stepping(self) -> bool {
        matches!(self, CardState::Learning | CardState::Relearning)
    }
}

/// Grade fed to the memory model (maps to fsrs rating values 1-4).
///
/// Outcomes are binary: a correct answer is always `Good` and an incorrect
/// answer is always `Again`. `Hard` and `Easy` exist so stored grades from
/// the model's rating scale stay representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Grade {
    /// Failed recall.
    Again = 1,
    /// Successful but difficult recall.
    Hard = 2,
    /// Normal successful recall.
    Good = 3,
    /// Effortless recall.
    Easy = 4,
}

impl Grade {
    /// Map a binary outcome onto the rating scale.
    pub fn from_outcome(is_correct: bool) -> Self {
        if is_correct {
            Grade::Good
        } else {
            Grade::Again
        }
    }

    /// Convert to fsrs rating value (u8).
    pub fn to_rating(self) -> u8 {
        self as u8
    }

    /// Create from fsrs rating value.
    pub fn from_rating(rating: u8) -> Option<Self> {
        match rating {
            1 => Some(Grade::Again),
            2 => Some(Grade::Hard),
            3 => Some(Grade::Good),
            4 => Some(Grade::Easy),
            _ => None,
        }
    }
}

/// Memory-model state of one item.
///
/// Every field has a serde default so partially stored records still load;
/// [`ItemState::is_well_formed`] decides whether the loaded values are usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemState {
    /// Lifecycle state.
    pub state: CardState,
    /// Days for retrievability to drop to the target retention.
    pub stability: f64,
    /// 1.0-10.0 once practiced (higher = harder); 0 while new.
    pub difficulty: f64,
    /// Days between the previous two reviews.
    pub elapsed_days: f64,
    /// Days until the next review, as scheduled by the last review.
    pub scheduled_days: f64,
    /// Number of responses recorded.
    pub reps: u32,
    /// Number of times a graduated item was forgotten.
    pub lapses: u32,
    /// Index into the learning or relearning step list.
    pub learning_step: u32,
    /// Time of the last response.
    pub last_review_at: Option<DateTime<Utc>>,
    /// When the item is next due. Unset means due now.
    pub next_review_at: Option<DateTime<Utc>>,
}

impl Default for ItemState {
    fn default() -> Self {
        Self {
            state: CardState::New,
            stability: 0.0,
            difficulty: 0.0,
            elapsed_days: 0.0,
            scheduled_days: 0.0,
            reps: 0,
            lapses: 0,
            learning_step: 0,
            last_review_at: None,
            next_review_at: None,
        }
    }
}

impl ItemState {
    /// A fresh, never-practiced state due at `now`.
    pub fn new_at(now: DateTime<Utc>) -> Self {
        Self {
            next_review_at: Some(now),
            ..Default::default()
        }
    }

    /// Whether the item has never been practiced.
    pub fn is_unpracticed(&self) -> bool {
        self.reps == 0
    }

    /// Whether the stored values can be fed to the memory model as-is.
    pub fn is_well_formed(&self) -> bool {
        let finite_non_negative = |v: f64| v.is_finite() && v >= 0.0;

        if !(finite_non_negative(self.stability)
            && finite_non_negative(self.difficulty)
            && finite_non_negative(self.elapsed_days)
            && finite_non_negative(self.scheduled_days))
        {
            return false;
        }

        // A state that claims practice history must be consistent with it.
        match self.state {
            CardState::New => self.reps == 0,
            _ => self.reps > 0 && self.stability > 0.0 && self.last_review_at.is_some(),
        }
    }

    /// Parse a stored JSON document.
    ///
    /// Missing fields take defaults. Returns `None` when the document is
    /// unreadable or the values are not [well formed](Self::is_well_formed).
    pub fn parse_stored(raw: &str) -> Option<Self> {
        serde_json::from_str::<ItemState>(raw)
            .ok()
            .filter(|state| state.is_well_formed())
    }
}

/// Result of scheduling one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    /// The updated state.
    pub state: ItemState,
    /// Grade fed to the model.
    pub grade: Grade,
    /// Time until the next review, in (fractional) days.
    pub interval_days: f64,
}

impl ScheduleOutcome {
    /// When the item is next due.
    pub fn next_review_at(&self) -> Option<DateTime<Utc>> {
        self.state.next_review_at
    }
}
