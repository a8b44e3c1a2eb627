use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::EntryId;

/// What happened to a claimable entry on one account.
///
/// Every entry routed to an account ends in exactly one terminal decision;
/// `DeferredRateLimited` is recorded once when an entry starts waiting on the
/// rolling window and is followed by a terminal decision later.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDecision {
    Claimed,
    AlreadyOwned,
    Rejected,
    Failed,
    SkippedDuplicate,
    SkippedFiltered,
    DeferredRateLimited,
    Cancelled,
}

impl ClaimDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::AlreadyOwned => "already_owned",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::SkippedFiltered => "skipped_filtered",
            Self::DeferredRateLimited => "deferred_rate_limited",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "claimed" => Some(Self::Claimed),
            "already_owned" => Some(Self::AlreadyOwned),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            "skipped_duplicate" => Some(Self::SkippedDuplicate),
            "skipped_filtered" => Some(Self::SkippedFiltered),
            "deferred_rate_limited" => Some(Self::DeferredRateLimited),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A journal row describing one decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimRecord {
    pub id: Uuid,
    pub account_id: String,
    pub entry_id: EntryId,
    pub decision: ClaimDecision,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ClaimRecord {
    pub fn new(
        account_id: impl Into<String>,
        entry_id: EntryId,
        decision: ClaimDecision,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            entry_id,
            decision,
            detail,
            created_at: Utc::now(),
        }
    }
}
