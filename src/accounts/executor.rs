use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::state::AccountClaimState;
use crate::models::{ClaimDecision, EntryId};

/// Upper bound on any retry or remote backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Classified failure of a remote claim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("entry is already owned")]
    AlreadyOwned,

    #[error("remote rate limit reached")]
    RateLimitedByRemote { retry_after: Option<Duration> },

    #[error("claim rejected: {0}")]
    PermanentRejection(String),

    #[error("transient claim failure: {0}")]
    TransientFailure(String),
}

/// Remote claim boundary.
#[async_trait]
pub trait ClaimService: Send + Sync {
    async fn claim(&self, account_id: &str, entry_id: EntryId) -> Result<(), ClaimError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Attempts per entry before a transient failure becomes final.
    pub max_attempts: u32,
    /// Delay before the first transient retry; doubles each attempt.
    pub initial_backoff_ms: u64,
    /// Pause after a remote rate limit that carried no retry hint.
    pub remote_backoff_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 30_000,
            remote_backoff_ms: 30 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Terminal outcome for this entry.
    Done {
        decision: ClaimDecision,
        detail: Option<String>,
    },
    /// Transient failure with attempts left.
    RetryAfter(Duration),
    /// The remote throttled the account; nothing was consumed locally.
    RemoteBackoff(Duration),
}

pub struct ClaimExecutor {
    service: Arc<dyn ClaimService>,
    config: ExecutorConfig,
}

impl ClaimExecutor {
    pub fn new(service: Arc<dyn ClaimService>, config: ExecutorConfig) -> Self {
        Self { service, config }
    }

    /// Attempt one claim and update the account's bookkeeping.
    ///
    /// `attempt` counts previous transient failures for this entry.
    pub async fn execute(
        &self,
        account_id: &str,
        state: &mut AccountClaimState,
        entry_id: EntryId,
        attempt: u32,
    ) -> ExecutionResult {
        match self.service.claim(account_id, entry_id).await {
            Ok(()) => {
                state.owned.insert(entry_id);
                state.window.record(Instant::now());
                ExecutionResult::Done {
                    decision: ClaimDecision::Claimed,
                    detail: None,
                }
            }
            Err(ClaimError::AlreadyOwned) => {
                state.owned.insert(entry_id);
                ExecutionResult::Done {
                    decision: ClaimDecision::AlreadyOwned,
                    detail: None,
                }
            }
            Err(ClaimError::RateLimitedByRemote { retry_after }) => ExecutionResult::RemoteBackoff(
                retry_after
                    .unwrap_or(Duration::from_millis(self.config.remote_backoff_ms))
                    .min(MAX_BACKOFF),
            ),
            Err(ClaimError::PermanentRejection(reason)) => {
                state.rejected.insert(entry_id);
                ExecutionResult::Done {
                    decision: ClaimDecision::Rejected,
                    detail: Some(reason),
                }
            }
            Err(ClaimError::TransientFailure(reason)) => {
                if attempt + 1 >= self.config.max_attempts {
                    ExecutionResult::Done {
                        decision: ClaimDecision::Failed,
                        detail: Some(format!("gave up after {} attempts: {}", attempt + 1, reason)),
                    }
                } else {
                    ExecutionResult::RetryAfter(self.backoff(attempt))
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.initial_backoff_ms)
            .checked_mul(2u32.pow(attempt.min(10)))
            .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
    }
}
