use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_job_name_len")]
    pub max_job_name_len: usize,
    #[serde(default = "default_min_sorter_in_memory_records")]
    pub min_sorter_in_memory_records: u32,
    #[serde(default = "default_persist_max_attempts")]
    pub persist_max_attempts: u32,
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8390
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_max_job_name_len() -> usize {
    40
}

fn default_min_sorter_in_memory_records() -> u32 {
    10_000
}

fn default_persist_max_attempts() -> u32 {
    3
}

fn default_persist_backoff_ms() -> u64 {
    50
}

fn default_broadcast_capacity() -> usize {
    1024
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_job_name_len: default_max_job_name_len(),
            min_sorter_in_memory_records: default_min_sorter_in_memory_records(),
            persist_max_attempts: default_persist_max_attempts(),
            persist_backoff_ms: default_persist_backoff_ms(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl CoordinatorConfig {
    pub fn submission_limits(&self) -> SubmissionLimits {
        SubmissionLimits {
            max_job_name_len: self.max_job_name_len,
            min_sorter_in_memory_records: self.min_sorter_in_memory_records,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.persist_max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.persist_backoff_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Bounds applied when validating a job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionLimits {
    pub max_job_name_len: usize,
    pub min_sorter_in_memory_records: u32,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        CoordinatorConfig::default().submission_limits()
    }
}

/// Bounded exponential backoff for transient persistence failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        CoordinatorConfig::default().retry_policy()
    }
}
