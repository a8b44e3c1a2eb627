use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use super::registry::AccountRegistry;
use crate::models::ActivityState;

/// Foreground activity change reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySignal {
    pub account_id: String,
    pub state: ActivityState,
}

/// Remembers the latest activity per account and forwards changes to the
/// account's orchestrator. The state survives an account being disabled
/// and re-enabled, so a fresh orchestrator starts paused if it should.
#[derive(Clone)]
pub struct ActivityTracker {
    registry: AccountRegistry,
    states: Arc<Mutex<HashMap<String, ActivityState>>>,
}

impl ActivityTracker {
    pub fn new(registry: AccountRegistry) -> Self {
        Self {
            registry,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a signal. Repeated signals with the same state are ignored.
    pub fn observe(&self, account_id: &str, state: ActivityState) {
        let previous = self
            .states
            .lock()
            .expect("activity lock poisoned")
            .insert(account_id.to_string(), state);
        if previous == Some(state) {
            return;
        }
        debug!(account = account_id, state = ?state, "Activity changed");
        self.registry.set_activity(account_id, state);
    }

    pub fn current(&self, account_id: &str) -> ActivityState {
        self.states
            .lock()
            .expect("activity lock poisoned")
            .get(account_id)
            .copied()
            .unwrap_or(ActivityState::Idle)
    }

    /// Push the remembered state to a newly started orchestrator.
    pub fn replay(&self, account_id: &str) {
        if self.current(account_id) == ActivityState::Busy {
            self.registry.set_activity(account_id, ActivityState::Busy);
        }
    }

    pub fn forget(&self, account_id: &str) {
        self.states
            .lock()
            .expect("activity lock poisoned")
            .remove(account_id);
    }

    /// Consume signals until every sender is dropped.
    pub async fn run(self, mut signals: mpsc::Receiver<ActivitySignal>) {
        while let Some(signal) = signals.recv().await {
            self.observe(&signal.account_id, signal.state);
        }
    }
}
