//! Core types for recall.

mod entities;
mod item_state;
mod ledger;

pub use entities::*;
pub use item_state::{CardState, Grade, ItemState, ScheduleOutcome};
pub use ledger::{Bucket, StatsDelta, StatsLedger};
