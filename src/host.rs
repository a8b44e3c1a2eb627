//! Host lifecycle boundary.
//!
//! [`FreePackages`] is what a host process talks to: it owns the database,
//! the account registry and the activity tracker, and turns host callbacks
//! into calls on them.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::accounts::{
    AccountRegistry, ActivityTracker, ClaimExecutor, ClaimService, ExecutorConfig,
};
use crate::classify::DiffClassifier;
use crate::config::{AccountConfig, ConfigError};
use crate::db::{CursorStore, Database, StoreError};
use crate::models::*;
use crate::stream::{ChangeFeed, ChangeListener};

/// Journal rows older than this are pruned at startup.
const CLAIM_LOG_RETENTION_DAYS: i64 = 30;

#[derive(Clone)]
pub struct FreePackages {
    db: Database,
    registry: AccountRegistry,
    tracker: ActivityTracker,
}

impl FreePackages {
    pub fn new(db: Database, claims: Arc<dyn ClaimService>, executor: ExecutorConfig) -> Self {
        let executor = Arc::new(ClaimExecutor::new(claims, executor));
        let registry = AccountRegistry::new(executor, Arc::new(db.clone()));
        let tracker = ActivityTracker::new(registry.clone());
        Self {
            db,
            registry,
            tracker,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    /// Load the cursor (resetting it if corrupt) and prune old journal rows.
    pub fn on_init(&self) -> Result<CursorState, StoreError> {
        let cursor = self.db.load_or_reset()?;
        let cutoff = Utc::now() - ChronoDuration::days(CLAIM_LOG_RETENTION_DAYS);
        match self.db.prune_claims(cutoff) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Pruned old claim journal rows"),
            Err(e) => warn!(error = %e, "Failed to prune claim journal"),
        }
        info!(
            last_sequence = cursor.last_sequence,
            categorized = cursor.known_entries.len(),
            pending = cursor.pending_entries.len(),
            "Loaded change cursor"
        );
        Ok(cursor)
    }

    /// Build the stream pipeline wired to this host's store and accounts.
    pub fn listener<F: ChangeFeed>(
        &self,
        feed: F,
        classifier: DiffClassifier,
        cursor: CursorState,
    ) -> ChangeListener<F> {
        ChangeListener::new(
            feed,
            classifier,
            Arc::new(self.db.clone()),
            Arc::new(self.registry.clone()),
            cursor,
        )
    }

    /// Apply an account's module configuration.
    ///
    /// Returns whether the account is enabled afterwards. A malformed
    /// configuration fails only this account and leaves any running
    /// orchestrator untouched.
    pub async fn on_account_module_init(
        &self,
        account_id: &str,
        config: &serde_json::Value,
    ) -> Result<bool, ConfigError> {
        let parsed = AccountConfig::from_value(config).and_then(|c| {
            let enabled = c.enabled;
            c.into_settings().map(|settings| (enabled, settings))
        });
        let (enabled, settings) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(account = account_id, error = %e, "Ignoring invalid account configuration");
                return Err(e);
            }
        };

        if !enabled {
            info!(account = account_id, "Free package claiming is disabled");
            self.registry.disable(account_id).await;
            return Ok(false);
        }

        let rules = serde_json::to_string(&settings.rules).unwrap_or_default();
        info!(
            account = account_id,
            hourly_limit = ?settings.hourly_limit,
            pause_on_activity = settings.pause_on_activity,
            %rules,
            "Free package claiming configured"
        );

        if self.registry.enable(account_id, settings) {
            self.tracker.replay(account_id);
        }
        Ok(true)
    }

    /// The account's session ended; its orchestrator is discarded and
    /// rebuilt from current ownership when it comes back.
    pub async fn on_account_disconnected(&self, account_id: &str) {
        if self.registry.disable(account_id).await {
            info!(account = account_id, "Account disconnected, claiming stopped");
        }
        self.tracker.forget(account_id);
    }

    /// Replace the account's owned entries with its current license list.
    pub fn on_license_list(&self, account_id: &str, entries: Vec<EntryId>) -> bool {
        self.registry.update_licenses(account_id, entries)
    }

    pub fn on_activity(&self, account_id: &str, state: ActivityState) {
        self.tracker.observe(account_id, state);
    }

    pub async fn status_report(&self) -> Result<StatusReport, StoreError> {
        Ok(StatusReport {
            cursor: self.db.cursor_summary()?,
            accounts: self.registry.statuses().await,
        })
    }

    /// Stop every orchestrator, cancelling queued claims.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
