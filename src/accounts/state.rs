use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{AccountSettings, EntryId, FilterRule};

/// Length of the rolling claim window.
pub const CLAIM_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Sliding window of successful claim times.
#[derive(Debug, Clone)]
pub struct ClaimWindow {
    window: Duration,
    claims: VecDeque<Instant>,
}

impl ClaimWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            claims: VecDeque::new(),
        }
    }

    /// Drop claims that fell out of the window.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.claims.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.claims.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.claims.len()
    }

    pub fn has_capacity(&mut self, limit: Option<u32>, now: Instant) -> bool {
        match limit {
            Some(limit) => self.count(now) < limit as usize,
            None => true,
        }
    }

    /// Claims still allowed right now. `None` when unlimited.
    pub fn remaining(&mut self, limit: Option<u32>, now: Instant) -> Option<usize> {
        limit.map(|limit| (limit as usize).saturating_sub(self.count(now)))
    }

    pub fn record(&mut self, now: Instant) {
        self.claims.push_back(now);
    }

    /// When the next claim becomes allowed, or `None` if one is allowed now.
    pub fn next_free_at(&mut self, limit: Option<u32>, now: Instant) -> Option<Instant> {
        let limit = limit? as usize;
        let count = self.count(now);
        if count < limit {
            return None;
        }
        // With `count` claims counted, one must expire per slot over the limit.
        self.claims
            .get(count - limit)
            .map(|&claimed_at| claimed_at + self.window)
    }
}

impl Default for ClaimWindow {
    fn default() -> Self {
        Self::new(CLAIM_WINDOW)
    }
}

/// Everything one orchestrator knows about its account.
#[derive(Debug, Clone, Default)]
pub struct AccountClaimState {
    pub rules: Vec<FilterRule>,
    pub hourly_limit: Option<u32>,
    pub pause_on_activity: bool,
    pub window: ClaimWindow,
    pub owned: HashSet<EntryId>,
    /// Entries the remote refused permanently; never retried.
    pub rejected: HashSet<EntryId>,
}

impl AccountClaimState {
    pub fn new(settings: AccountSettings) -> Self {
        let mut state = Self::default();
        state.apply_settings(settings);
        state
    }

    /// Replace rules and limits; ownership and the window carry over.
    pub fn apply_settings(&mut self, settings: AccountSettings) {
        self.rules = settings.rules;
        self.hourly_limit = settings.hourly_limit;
        self.pause_on_activity = settings.pause_on_activity;
    }

    pub fn knows(&self, entry_id: &EntryId) -> bool {
        self.owned.contains(entry_id) || self.rejected.contains(entry_id)
    }
}
