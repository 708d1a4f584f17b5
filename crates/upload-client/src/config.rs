//! Upload tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::BackoffPolicy;
use crate::error::UploadError;

/// Hard limit on concurrent in-flight parts.
pub const MAX_CONCURRENCY: usize = 8;

/// Retry, recovery and timing limits for one upload.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// Attempts per part before the upload fails.
    pub max_attempts: u32,
    /// Attempts per part that came back empty before escalating.
    pub empty_chunk_max_attempts: u32,
    /// Attempts for the completion call.
    pub completion_attempts: u32,
    /// Session recoveries allowed per upload.
    pub max_recoveries: u32,
    /// Parts in flight at once.
    pub concurrency: usize,
    /// Send a SHA-256 checksum with every part.
    pub checksums: bool,
    /// Requested chunk size in bytes; the planner picks one when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub chunk_timeout_secs: u64,
    pub abort_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            empty_chunk_max_attempts: 2,
            completion_attempts: 3,
            max_recoveries: 3,
            concurrency: 1,
            checksums: true,
            chunk_size: None,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            chunk_timeout_secs: 120,
            abort_timeout_secs: 10,
        }
    }
}

impl UploadConfig {
    /// Rejects values the orchestrator cannot work with.
    pub fn validate(&self) -> Result<(), UploadError> {
        let positive = [
            ("maxAttempts", self.max_attempts as u64),
            ("emptyChunkMaxAttempts", self.empty_chunk_max_attempts as u64),
            ("completionAttempts", self.completion_attempts as u64),
            ("concurrency", self.concurrency as u64),
            ("chunkTimeoutSecs", self.chunk_timeout_secs),
            ("abortTimeoutSecs", self.abort_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(UploadError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(UploadError::Config(format!(
                "concurrency {} exceeds the maximum of {MAX_CONCURRENCY}",
                self.concurrency
            )));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(UploadError::Config(format!(
                "backoffBaseMs ({}) is larger than backoffMaxMs ({})",
                self.backoff_base_ms, self.backoff_max_ms
            )));
        }
        if self.chunk_size == Some(0) {
            return Err(UploadError::Config("chunkSize must not be zero".into()));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_secs(self.abort_timeout_secs)
    }
}
