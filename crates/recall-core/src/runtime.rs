//! Background runtime for the reconciliation scheduler.
//!
//! Owns the shared store, builds the scheduler on top of it and gives the
//! host process one start/shutdown pair.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RecallConfig;
use crate::engine::FsrsEngine;
use crate::error::RecallResult;
use crate::reconcile::{ReconcileScheduler, ReconciliationSampler};
use crate::service::ReviewService;
use crate::store::SqliteReviewStore;
use crate::traits::{PassthroughIdentity, SystemClock};

/// Configuration for the BackgroundRuntime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Scheduling, queue and reconciliation settings.
    pub recall: RecallConfig,
    /// Whether to run the reconciliation scheduler (default: true).
    pub enable_reconcile: bool,
    /// SQLite database path (default: None = in-memory).
    pub database_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recall: RecallConfig::default(),
            enable_reconcile: true,
            database_path: None,
        }
    }
}

impl RuntimeConfig {
    pub fn with_reconcile_interval(mut self, minutes: u64) -> Self {
        self.recall.reconcile.interval_minutes = minutes.max(1);
        self
    }

    /// Run a pass as soon as the scheduler starts.
    pub fn with_run_on_start(mut self) -> Self {
        self.recall.reconcile.run_on_start = true;
        self
    }

    pub fn without_reconcile(mut self) -> Self {
        self.enable_reconcile = false;
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Create config from environment variables.
    ///
    /// Reads everything [`RecallConfig::from_env`] reads, plus:
    /// - `RECALL_RECONCILE_RUN_ON_START` (default: false)
    /// - `RECALL_DISABLE_RECONCILE` (default: enabled)
    ///
    /// The store is file-backed at `recall.database_path`, which
    /// `RECALL_DATABASE_PATH` overrides.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let recall = RecallConfig::from_vars(&var);
        let mut config = Self {
            database_path: Some(recall.database_path.clone()),
            recall,
            ..Self::default()
        };

        if var("RECALL_RECONCILE_RUN_ON_START").is_some() {
            config.recall.reconcile.run_on_start = true;
        }

        if var("RECALL_DISABLE_RECONCILE").is_some() {
            config.enable_reconcile = false;
        }

        config
    }
}

/// Hosts the store and the reconciliation scheduler.
///
/// # Example
///
/// ```ignore
/// use recall_core::{BackgroundRuntime, RuntimeConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut runtime = BackgroundRuntime::new(RuntimeConfig::from_env()).await?;
///     runtime.start().await?;
///
///     // ... serve requests through runtime.service() ...
///
///     runtime.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct BackgroundRuntime {
    store: Arc<SqliteReviewStore>,
    reconcile_scheduler: Option<ReconcileScheduler>,
    config: RuntimeConfig,
}

impl BackgroundRuntime {
    /// Open the store and build the scheduler without starting it.
    pub async fn new(config: RuntimeConfig) -> RecallResult<Self> {
        debug!(
            reconcile_enabled = config.enable_reconcile,
            reconcile_interval = config.recall.reconcile.interval_minutes,
            "Creating BackgroundRuntime"
        );

        let store = match &config.database_path {
            Some(path) => {
                debug!(path = %path.display(), "Creating file-backed review store");
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Arc::new(SqliteReviewStore::new(path)?)
            }
            None => {
                debug!("Creating in-memory review store");
                Arc::new(SqliteReviewStore::in_memory()?)
            }
        };

        let reconcile_scheduler = if config.enable_reconcile {
            let sampler = Arc::new(ReconciliationSampler::new(
                store.clone(),
                Arc::new(SystemClock),
                config.recall.reconcile.clone(),
            ));
            Some(ReconcileScheduler::new(sampler).await?)
        } else {
            None
        };

        Ok(Self {
            store,
            reconcile_scheduler,
            config,
        })
    }

    pub async fn start(&self) -> RecallResult<()> {
        if let Some(ref scheduler) = self.reconcile_scheduler {
            scheduler.start().await?;
        }

        info!("Background schedulers started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> RecallResult<()> {
        if let Some(ref mut scheduler) = self.reconcile_scheduler {
            scheduler.shutdown().await?;
            debug!("Reconciliation scheduler stopped");
        }

        info!("Background schedulers stopped");
        Ok(())
    }

    /// A review service over the runtime's store.
    pub fn service(&self) -> ReviewService {
        let engine = FsrsEngine::with_config(self.config.recall.scheduling.clone());
        ReviewService::new(
            self.store.clone(),
            Arc::new(engine),
            Arc::new(SystemClock),
            Arc::new(PassthroughIdentity),
            self.config.recall.clone(),
        )
    }

    pub fn store(&self) -> Arc<SqliteReviewStore> {
        self.store.clone()
    }

    pub fn reconcile_scheduler(&self) -> Option<&ReconcileScheduler> {
        self.reconcile_scheduler.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.enable_reconcile);
        assert!(config.database_path.is_none());
        assert!(!config.recall.reconcile.run_on_start);
    }

    #[test]
    fn test_runtime_config_builder() {
        let config = RuntimeConfig::default()
            .with_reconcile_interval(0)
            .with_run_on_start()
            .with_database_path("/tmp/recall.db");

        assert_eq!(config.recall.reconcile.interval_minutes, 1);
        assert!(config.recall.reconcile.run_on_start);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/recall.db")));
    }

    #[test]
    fn test_env_config_falls_back_to_default_database() {
        let config = RuntimeConfig::from_vars(|_| None);
        assert_eq!(
            config.database_path,
            Some(RecallConfig::default().database_path)
        );
        assert!(config.enable_reconcile);

        let config = RuntimeConfig::from_vars(|key| match key {
            "RECALL_DATABASE_PATH" => Some("/var/lib/recall/recall.db".to_string()),
            "RECALL_DISABLE_RECONCILE" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/recall/recall.db"))
        );
        assert_eq!(config.recall.database_path, PathBuf::from("/var/lib/recall/recall.db"));
        assert!(!config.enable_reconcile);
    }

    #[tokio::test]
    async fn test_runtime_without_reconcile() {
        let runtime = BackgroundRuntime::new(RuntimeConfig::default().without_reconcile())
            .await
            .unwrap();
        assert!(runtime.reconcile_scheduler().is_none());
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let mut runtime = BackgroundRuntime::new(RuntimeConfig::default()).await.unwrap();
        runtime.start().await.unwrap();

        let service = runtime.service();
        service.create_item("alice").unwrap();
        assert_eq!(service.stats("alice").unwrap().total_cards, 1);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_runtime_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("recall.db");
        let runtime = BackgroundRuntime::new(
            RuntimeConfig::default().without_reconcile().with_database_path(&path),
        )
        .await
        .unwrap();

        runtime.service().create_item("alice").unwrap();
        assert!(path.exists());
    }
}
