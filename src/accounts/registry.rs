use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::executor::ClaimExecutor;
use super::orchestrator::{
    request_queue, request_status, AccountCommand, AccountHandle, AccountOrchestrator,
};
use crate::db::ClaimJournal;
use crate::models::*;
use crate::stream::EntrySink;

/// Set of enabled accounts, keyed by account id.
///
/// Accounts can be enabled and disabled while the stream is running; each
/// dispatch goes to the accounts enabled at that moment.
#[derive(Clone)]
pub struct AccountRegistry {
    accounts: Arc<RwLock<HashMap<String, AccountHandle>>>,
    executor: Arc<ClaimExecutor>,
    journal: Arc<dyn ClaimJournal>,
}

impl AccountRegistry {
    pub fn new(executor: Arc<ClaimExecutor>, journal: Arc<dyn ClaimJournal>) -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            executor,
            journal,
        }
    }

    /// Start an orchestrator for the account, or replace the settings of a
    /// running one. Returns `true` when a new orchestrator was started.
    pub fn enable(&self, account_id: &str, settings: AccountSettings) -> bool {
        let mut accounts = self.accounts.write().expect("registry lock poisoned");
        if let Some(handle) = accounts.get(account_id) {
            if handle.send(AccountCommand::Reconfigure(settings.clone())) {
                return false;
            }
            debug!(account = account_id, "Replacing stopped orchestrator");
        }

        let orchestrator = AccountOrchestrator::new(
            account_id,
            settings,
            Arc::clone(&self.executor),
            Arc::clone(&self.journal),
        );
        accounts.insert(account_id.to_string(), orchestrator.spawn());
        true
    }

    /// Stop the account's orchestrator and wait until it has cancelled its
    /// queue. Returns `false` if the account was not enabled.
    pub async fn disable(&self, account_id: &str) -> bool {
        let handle = self
            .accounts
            .write()
            .expect("registry lock poisoned")
            .remove(account_id);
        match handle {
            Some(handle) => {
                handle.shutdown().await;
                info!(account = account_id, "Account removed from claiming");
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, account_id: &str) -> bool {
        self.accounts
            .read()
            .expect("registry lock poisoned")
            .contains_key(account_id)
    }

    fn send(&self, account_id: &str, command: AccountCommand) -> bool {
        self.accounts
            .read()
            .expect("registry lock poisoned")
            .get(account_id)
            .is_some_and(|handle| handle.send(command))
    }

    pub fn set_activity(&self, account_id: &str, activity: ActivityState) -> bool {
        self.send(account_id, AccountCommand::Activity(activity))
    }

    pub fn update_licenses(&self, account_id: &str, entries: Vec<EntryId>) -> bool {
        self.send(account_id, AccountCommand::Licenses(entries))
    }

    pub async fn status(&self, account_id: &str) -> Option<AccountStatus> {
        let sender = self
            .accounts
            .read()
            .expect("registry lock poisoned")
            .get(account_id)
            .map(AccountHandle::sender)?;
        request_status(&sender).await
    }

    pub async fn queue(&self, account_id: &str) -> Option<Vec<EntryId>> {
        let sender = self
            .accounts
            .read()
            .expect("registry lock poisoned")
            .get(account_id)
            .map(AccountHandle::sender)?;
        request_queue(&sender).await
    }

    /// Status of every enabled account, ordered by account id.
    ///
    /// Every orchestrator is asked before any reply is awaited, so an account
    /// with a claim in flight delays the report only by its own claim.
    pub async fn statuses(&self) -> Vec<AccountStatus> {
        let replies: Vec<_> = self
            .accounts
            .read()
            .expect("registry lock poisoned")
            .values()
            .filter_map(|handle| {
                let (tx, rx) = oneshot::channel();
                handle.send(AccountCommand::Status(tx)).then_some(rx)
            })
            .collect();

        let mut statuses = Vec::with_capacity(replies.len());
        for reply in replies {
            if let Ok(status) = reply.await {
                statuses.push(status);
            }
        }
        statuses.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        statuses
    }

    /// Disable every account, waiting for each to drain.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self
            .accounts
            .write()
            .expect("registry lock poisoned")
            .drain()
            .collect();
        for (account_id, handle) in handles {
            handle.shutdown().await;
            debug!(account = %account_id, "Account stopped");
        }
    }
}

impl EntrySink for AccountRegistry {
    fn dispatch(&self, entry: &ClassifiedEntry) {
        let accounts = self.accounts.read().expect("registry lock poisoned");
        for (account_id, handle) in accounts.iter() {
            if !handle.send(AccountCommand::Entry(entry.clone())) {
                warn!(account = %account_id, entry = %entry.entry_id, "Account orchestrator stopped, entry not offered");
            }
        }
    }
}
