//! recall-core - Core library for recall.
//!
//! Scheduling core for a recall-practice application: a memory model that
//! decides when each item is due, a review queue that picks what to show
//! next, a phrasing policy for multi-phrasing concepts, an incremental
//! per-owner stats ledger and a sampler that repairs ledger drift.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use recall_core::{
//!     Answer, FsrsEngine, PassthroughIdentity, RecallConfig, ReviewService,
//!     SqliteReviewStore, SystemClock,
//! };
//!
//! let service = ReviewService::new(
//!     Arc::new(SqliteReviewStore::in_memory()?),
//!     Arc::new(FsrsEngine::new()),
//!     Arc::new(SystemClock),
//!     Arc::new(PassthroughIdentity),
//!     RecallConfig::default(),
//! );
//!
//! let item = service.create_item("user1")?;
//! let card = service.next_review("user1")?;
//! service.submit_answer("user1", &Answer::new(item.id.clone(), "42", true))?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod phrasing;
pub mod queue;
pub mod reconcile;
pub mod runtime;
pub mod service;
pub mod store;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{PhrasingConfig, QueueConfig, RecallConfig, ReconcileConfig, SchedulingConfig};
pub use engine::{FsrsEngine, InteractionReplay, MemoryModel, ReplayOutcome};
pub use error::{ErrorCode, RecallError, RecallResult};
pub use phrasing::{select_phrasing, PhrasingSelection, SelectionReason};
pub use queue::{ReviewQueuePrioritizer, ScoredItem};
pub use reconcile::{ReconcileReport, ReconcileScheduler, ReconcileStatus, ReconciliationSampler};
pub use runtime::{BackgroundRuntime, RuntimeConfig};
pub use service::{Answer, AnswerOutcome, BulkOp, ReplayReport, ReviewCard, ReviewService};
pub use store::{ReviewStore, SqliteReviewStore};
pub use traits::{Clock, FixedClock, IdentityResolver, PassthroughIdentity, SystemClock};
pub use types::{
    Bucket, CardState, Concept, Grade, Interaction, ItemKind, ItemState, MemoryItem, Phrasing,
    ScheduleOutcome, StatsDelta, StatsLedger,
};
