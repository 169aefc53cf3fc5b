//! Configuration system for recall.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RecallError, RecallResult};

/// Memory model and state machine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Target probability of recall at the scheduled review.
    pub desired_retention: f64,
    /// Short-term steps for items that have never graduated, in seconds.
    pub learning_steps_secs: Vec<u64>,
    /// Short-term steps after a lapse, in seconds.
    pub relearning_steps_secs: Vec<u64>,
    /// Upper bound on review intervals, in days.
    pub maximum_interval_days: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            desired_retention: 0.9,
            learning_steps_secs: vec![60, 600],
            relearning_steps_secs: vec![600],
            maximum_interval_days: 36500,
        }
    }
}

impl SchedulingConfig {
    /// Clamp values into usable ranges; step lists become strictly ascending.
    ///
    /// A step list left empty falls back to its default.
    pub fn normalized(mut self) -> Self {
        if !self.desired_retention.is_finite() {
            self.desired_retention = Self::default().desired_retention;
        }
        self.desired_retention = self.desired_retention.clamp(0.7, 0.99);
        self.maximum_interval_days = self.maximum_interval_days.max(1);
        for steps in [&mut self.learning_steps_secs, &mut self.relearning_steps_secs] {
            steps.retain(|secs| *secs > 0);
            steps.sort_unstable();
            steps.dedup();
        }
        let defaults = Self::default();
        if self.learning_steps_secs.is_empty() {
            self.learning_steps_secs = defaults.learning_steps_secs;
        }
        if self.relearning_steps_secs.is_empty() {
            self.relearning_steps_secs = defaults.relearning_steps_secs;
        }
        self
    }
}

/// Review queue parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Items scoring within this distance of the most urgent one are shuffled.
    pub urgency_delta: f64,
    /// How many of the most-overdue practiced items one fetch reads.
    pub overdue_window: usize,
    /// How many of the newest never-practiced items one fetch reads.
    pub new_item_window: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            urgency_delta: 0.05,
            overdue_window: 500,
            new_item_window: 50,
        }
    }
}

/// Phrasing selection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhrasingConfig {
    /// Prefer the least-practiced phrasing; random when disabled.
    pub prefer_least_seen: bool,
}

impl Default for PhrasingConfig {
    fn default() -> Self {
        Self {
            prefer_least_seen: true,
        }
    }
}

/// Drift reconciliation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Owners checked per pass.
    pub sample_size: usize,
    /// Largest tolerated bucket difference before the ledger is rewritten.
    pub drift_threshold: u64,
    /// Largest tolerated due-count difference. The due count lags whenever
    /// items come due, so it is ignored unless set.
    pub due_drift_threshold: Option<u64>,
    /// Items read per page while recounting.
    pub batch_size: usize,
    /// Minutes between scheduled passes.
    pub interval_minutes: u64,
    /// Whether to run a pass when the scheduler starts.
    pub run_on_start: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sample_size: 50,
            drift_threshold: 0,
            due_drift_threshold: None,
            batch_size: 100,
            interval_minutes: 60,
            run_on_start: false,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    pub scheduling: SchedulingConfig,
    pub queue: QueueConfig,
    pub phrasing: PhrasingConfig,
    pub reconcile: ReconcileConfig,
    /// SQLite database path.
    pub database_path: PathBuf,
}

impl Default for RecallConfig {
    fn default() -> Self {
        let recall_dir = dirs::home_dir()
            .map(|h| h.join(".recall"))
            .unwrap_or_else(|| PathBuf::from(".recall"));

        Self {
            scheduling: SchedulingConfig::default(),
            queue: QueueConfig::default(),
            phrasing: PhrasingConfig::default(),
            reconcile: ReconcileConfig::default(),
            database_path: recall_dir.join("recall.db"),
        }
    }
}

impl RecallConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> RecallResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| RecallError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| RecallError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| RecallError::Configuration(e.to_string()))?,
            _ => {
                return Err(RecallError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };

        Ok(config.normalized())
    }

    /// Load configuration from environment variables over the defaults.
    ///
    /// Reads:
    /// - `RECALL_DATABASE_PATH`
    /// - `RECALL_DESIRED_RETENTION`
    /// - `RECALL_MAXIMUM_INTERVAL_DAYS`
    /// - `RECALL_URGENCY_DELTA`
    /// - `RECALL_PREFER_LEAST_SEEN` (`true`/`false`)
    /// - `RECALL_RECONCILE_SAMPLE_SIZE`
    /// - `RECALL_RECONCILE_DRIFT_THRESHOLD`
    /// - `RECALL_RECONCILE_DUE_DRIFT_THRESHOLD`
    /// - `RECALL_RECONCILE_BATCH_SIZE`
    /// - `RECALL_RECONCILE_INTERVAL_MINUTES`
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.apply_env(var);
        config.normalized()
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
            raw.and_then(|v| v.trim().parse().ok())
        }

        if let Some(path) = var("RECALL_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(retention) = parsed(var("RECALL_DESIRED_RETENTION")) {
            self.scheduling.desired_retention = retention;
        }
        if let Some(days) = parsed(var("RECALL_MAXIMUM_INTERVAL_DAYS")) {
            self.scheduling.maximum_interval_days = days;
        }
        if let Some(delta) = parsed(var("RECALL_URGENCY_DELTA")) {
            self.queue.urgency_delta = delta;
        }
        if let Some(prefer) = parsed(var("RECALL_PREFER_LEAST_SEEN")) {
            self.phrasing.prefer_least_seen = prefer;
        }
        if let Some(size) = parsed(var("RECALL_RECONCILE_SAMPLE_SIZE")) {
            self.reconcile.sample_size = size;
        }
        if let Some(threshold) = parsed(var("RECALL_RECONCILE_DRIFT_THRESHOLD")) {
            self.reconcile.drift_threshold = threshold;
        }
        if let Some(threshold) = parsed(var("RECALL_RECONCILE_DUE_DRIFT_THRESHOLD")) {
            self.reconcile.due_drift_threshold = Some(threshold);
        }
        if let Some(size) = parsed(var("RECALL_RECONCILE_BATCH_SIZE")) {
            self.reconcile.batch_size = size;
        }
        if let Some(minutes) = parsed(var("RECALL_RECONCILE_INTERVAL_MINUTES")) {
            self.reconcile.interval_minutes = minutes;
        }
    }

    /// Clamp out-of-range values into their usable ranges.
    pub fn normalized(mut self) -> Self {
        self.scheduling = self.scheduling.normalized();

        let queue = &mut self.queue;
        if !queue.urgency_delta.is_finite() || queue.urgency_delta < 0.0 {
            queue.urgency_delta = QueueConfig::default().urgency_delta;
        }
        queue.overdue_window = queue.overdue_window.max(1);
        queue.new_item_window = queue.new_item_window.max(1);

        let reconcile = &mut self.reconcile;
        reconcile.sample_size = reconcile.sample_size.max(1);
        reconcile.batch_size = reconcile.batch_size.max(1);
        reconcile.interval_minutes = reconcile.interval_minutes.max(1);

        self
    }
}
