use serde::{Deserialize, Serialize};

use super::claim::ClaimDecision;
use super::filter::FilterRule;

/// Validated claim settings for one account, replaced wholesale on reconfiguration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub rules: Vec<FilterRule>,
    /// Claims allowed per rolling 60-minute window. `None` is unlimited.
    pub hourly_limit: Option<u32>,
    pub pause_on_activity: bool,
}

/// Lifecycle state of a running orchestrator.
///
/// `Disabled` is represented by the absence of an orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Active,
    Paused,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

/// Foreground activity reported for an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Idle,
    Busy,
}

/// Snapshot of one account's claim state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountStatus {
    pub account_id: String,
    pub state: OrchestratorState,
    pub hourly_limit: Option<u32>,
    pub claims_in_window: usize,
    pub queued: usize,
    pub owned: usize,
    pub rejected: usize,
    pub rules: usize,
    pub last_decision: Option<ClaimDecision>,
}

/// Combined view of the stream cursor and every enabled account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub cursor: super::cursor::CursorSummary,
    pub accounts: Vec<AccountStatus>,
}
