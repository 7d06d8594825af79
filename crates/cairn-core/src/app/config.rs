//! Config - 設定の読み込み
//!
//! 優先順位（後勝ち）:
//! 1. 組み込みデフォルト
//! 2. TOML ファイル（任意）
//! 3. `CAIRN_*` 環境変数
//! 4. CLI フラグ（バイナリ側で上書き）
//!
//! 上限を超える値は拒否せず、warn を出して上限に丸める。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::impls::WorkerCommand;

/// Hard ceiling for concurrently running ingestion jobs.
pub const SCHEDULER_MAX_CONCURRENT_CEILING: usize = 2;

/// Hard ceiling for concurrent retrievals.
pub const RETRIEVAL_MAX_CONCURRENT_CEILING: usize = 5;

/// Hard ceiling for retrievals per rolling minute.
pub const RETRIEVAL_RATE_PER_MINUTE_CEILING: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub scheduler: SchedulerConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub notifications: NotificationConfig,
}

impl CairnConfig {
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text, &path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Apply `CAIRN_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map).
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CAIRN_WORKSPACE") {
            self.storage.workspace_dir = PathBuf::from(v);
        }
        if let Some(v) = get("CAIRN_WORKER_PROGRAM") {
            self.worker.program = v;
        }
        if let Some(v) = get("CAIRN_WORKER_ENABLED") {
            self.worker.enabled = parse_bool("CAIRN_WORKER_ENABLED", &v)?;
        }
        if let Some(v) = get("CAIRN_MAX_CONCURRENT") {
            self.scheduler.max_concurrent = parse_num("CAIRN_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = get("CAIRN_MAX_QUEUED") {
            self.scheduler.max_queued = parse_num("CAIRN_MAX_QUEUED", &v)?;
        }
        if let Some(v) = get("CAIRN_INGEST_TIMEOUT_MS") {
            self.scheduler.ingest_timeout_ms = parse_num("CAIRN_INGEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CAIRN_RETRIEVAL_MAX_CONCURRENT") {
            self.retrieval.max_concurrent = parse_num("CAIRN_RETRIEVAL_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = get("CAIRN_RETRIEVAL_RATE_PER_MINUTE") {
            self.retrieval.rate_per_minute = parse_num("CAIRN_RETRIEVAL_RATE_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("CAIRN_RETRIEVAL_TIMEOUT_MS") {
            self.retrieval.timeout_ms = parse_num("CAIRN_RETRIEVAL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("CAIRN_SUCCESS_THROTTLE_MS") {
            self.notifications.success_throttle_ms = parse_num("CAIRN_SUCCESS_THROTTLE_MS", &v)?;
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Raise zero to one, with a warning.
fn at_least_one(name: &str, value: usize) -> usize {
    if value == 0 {
        tracing::warn!(setting = name, "0 is not allowed, using 1");
        1
    } else {
        value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub max_queued: usize,
    pub ingest_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub completed_retention_hours: u64,
    pub other_retention_hours: u64,
    pub backlog_retry_after_ms: u64,
    pub status_poll_interval_ms: u64,
    /// Defaults to `ingest_timeout_ms`.
    pub status_poll_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_queued: 3,
            ingest_timeout_ms: 120_000,
            shutdown_grace_ms: 5_000,
            completed_retention_hours: 24,
            other_retention_hours: 168,
            backlog_retry_after_ms: 30_000,
            status_poll_interval_ms: 1_000,
            status_poll_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    /// Clamp to the hard ceiling. Never fails.
    pub fn normalized(mut self) -> Self {
        if self.max_concurrent > SCHEDULER_MAX_CONCURRENT_CEILING {
            tracing::warn!(
                requested = self.max_concurrent,
                ceiling = SCHEDULER_MAX_CONCURRENT_CEILING,
                "scheduler.max_concurrent above ceiling, clamping"
            );
            self.max_concurrent = SCHEDULER_MAX_CONCURRENT_CEILING;
        }
        self.max_concurrent = at_least_one("scheduler.max_concurrent", self.max_concurrent);
        self.status_poll_interval_ms = self.status_poll_interval_ms.max(1);
        self
    }

    /// Running + pending ceiling.
    pub fn backlog_capacity(&self) -> usize {
        self.max_concurrent + self.max_queued
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn status_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.status_poll_timeout_ms.unwrap_or(self.ingest_timeout_ms))
    }

    pub fn completed_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.completed_retention_hours as i64)
    }

    pub fn other_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.other_retention_hours as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_concurrent: usize,
    pub rate_per_minute: usize,
    pub max_queue_size: usize,
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            rate_per_minute: 10,
            max_queue_size: 5,
            timeout_ms: 15_000,
        }
    }
}

impl RetrievalConfig {
    /// Clamp to the hard ceilings. Never fails.
    pub fn clamped(mut self) -> Self {
        if self.max_concurrent > RETRIEVAL_MAX_CONCURRENT_CEILING {
            tracing::warn!(
                requested = self.max_concurrent,
                ceiling = RETRIEVAL_MAX_CONCURRENT_CEILING,
                "retrieval.max_concurrent above ceiling, clamping"
            );
            self.max_concurrent = RETRIEVAL_MAX_CONCURRENT_CEILING;
        }
        if self.rate_per_minute > RETRIEVAL_RATE_PER_MINUTE_CEILING {
            tracing::warn!(
                requested = self.rate_per_minute,
                ceiling = RETRIEVAL_RATE_PER_MINUTE_CEILING,
                "retrieval.rate_per_minute above ceiling, clamping"
            );
            self.rate_per_minute = RETRIEVAL_RATE_PER_MINUTE_CEILING;
        }
        self.max_concurrent = at_least_one("retrieval.max_concurrent", self.max_concurrent);
        self.rate_per_minute = at_least_one("retrieval.rate_per_minute", self.rate_per_minute);
        self.max_queue_size = at_least_one("retrieval.max_queue_size", self.max_queue_size);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One ledger per workspace directory.
    pub workspace_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from(".cairn"),
        }
    }
}

impl StorageConfig {
    pub fn ledger_dir(&self) -> PathBuf {
        self.workspace_dir.clone()
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.workspace_dir.join("payloads")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.workspace_dir.join("status")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: String::new(),
            args: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// `None` when disabled or no program is configured.
    pub fn command(&self) -> Option<WorkerCommand> {
        if !self.enabled || self.program.trim().is_empty() {
            return None;
        }
        Some(WorkerCommand {
            program: self.program.clone(),
            args: self.args.clone(),
            env: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub success_throttle_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            success_throttle_ms: 60_000,
        }
    }
}

impl NotificationConfig {
    pub fn success_throttle(&self) -> Duration {
        Duration::from_millis(self.success_throttle_ms)
    }
}
