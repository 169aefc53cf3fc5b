//! Periodic scheduler for ledger reconciliation.
//!
//! Runs a sampling pass at a fixed interval. A pass that is still running
//! when the next tick fires causes that tick to be skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use super::{ReconcileReport, ReconcileStatus, ReconciliationSampler};
use crate::error::RecallResult;

/// Releases the in-flight flag when a pass ends, even on panic.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run_pass(sampler: &ReconciliationSampler, in_flight: &AtomicBool) -> Option<ReconcileReport> {
    let Some(_guard) = PassGuard::acquire(in_flight) else {
        debug!("Reconciliation pass already running, skipping");
        return None;
    };

    let report = sampler.run();
    match report.status {
        ReconcileStatus::Completed => info!(
            owners_checked = report.owners_checked,
            corrections = report.corrections,
            duration_ms = report.duration_ms(),
            "Reconciliation complete"
        ),
        _ => warn!(
            status = %report.status,
            owners_checked = report.owners_checked,
            corrections = report.corrections,
            failures = report.failures,
            duration_ms = report.duration_ms(),
            "Reconciliation finished with failures"
        ),
    }
    Some(report)
}

/// Runs [`ReconciliationSampler`] passes on an interval.
pub struct ReconcileScheduler {
    scheduler: JobScheduler,
    sampler: Arc<ReconciliationSampler>,
    in_flight: Arc<AtomicBool>,
}

impl ReconcileScheduler {
    /// Create a scheduler. Call `start()` to begin periodic passes.
    pub async fn new(sampler: Arc<ReconciliationSampler>) -> RecallResult<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            sampler,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn sampler(&self) -> &Arc<ReconciliationSampler> {
        &self.sampler
    }

    /// Whether a pass is currently running.
    pub fn is_running_pass(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn start(&self) -> RecallResult<()> {
        let config = self.sampler.config().clone();
        let interval_secs = config.interval_minutes.max(1) * 60;

        let sampler = self.sampler.clone();
        let in_flight = self.in_flight.clone();
        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval_secs),
            move |_uuid, _lock| {
                let sampler = sampler.clone();
                let in_flight = in_flight.clone();
                Box::pin(async move {
                    debug!("Starting periodic reconciliation");
                    run_pass(&sampler, &in_flight);
                })
            },
        )?;

        self.scheduler.add(job).await?;

        if config.run_on_start {
            debug!("Running initial reconciliation on start");
            self.run_now();
        }

        self.scheduler.start().await?;

        info!(
            interval_minutes = config.interval_minutes,
            sample_size = config.sample_size,
            "Reconciliation scheduler started"
        );

        Ok(())
    }

    pub async fn shutdown(&mut self) -> RecallResult<()> {
        info!("Shutting down reconciliation scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Run a pass immediately. Returns `None` if one is already in progress.
    pub fn run_now(&self) -> Option<ReconcileReport> {
        run_pass(&self.sampler, &self.in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileConfig;
    use crate::store::SqliteReviewStore;
    use crate::traits::SystemClock;

    fn sampler() -> Arc<ReconciliationSampler> {
        Arc::new(ReconciliationSampler::new(
            Arc::new(SqliteReviewStore::in_memory().unwrap()),
            Arc::new(SystemClock),
            ReconcileConfig::default(),
        ))
    }

    #[test]
    fn test_guard_prevents_overlap() {
        let flag = AtomicBool::new(false);
        let first = PassGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(PassGuard::acquire(&flag).is_none());
        drop(first);
        assert!(PassGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_overlapping_pass_is_skipped() {
        let sampler = sampler();
        let flag = AtomicBool::new(true);
        assert!(run_pass(&sampler, &flag).is_none());
        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_run_now_and_shutdown() {
        let mut scheduler = ReconcileScheduler::new(sampler()).await.unwrap();
        scheduler.start().await.unwrap();

        let report = scheduler.run_now().unwrap();
        assert_eq!(report.status, ReconcileStatus::Completed);
        assert!(!scheduler.is_running_pass());

        scheduler.shutdown().await.unwrap();
    }
}
