//! Collaborator traits: time source and caller identity.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::{RecallError, RecallResult};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Maps a caller to the owner whose items it may touch.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, caller: &str) -> RecallResult<String>;
}

/// Treats the caller string as the owner id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughIdentity;

impl IdentityResolver for PassthroughIdentity {
    fn resolve(&self, caller: &str) -> RecallResult<String> {
        let owner = caller.trim();
        if owner.is_empty() {
            return Err(RecallError::validation_with_suggestion(
                "Caller has no owner identity",
                "Authenticate before calling review operations",
            ));
        }
        Ok(owner.to_string())
    }
}
