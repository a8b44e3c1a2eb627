//! Per-account claim orchestrator.
//!
//! Each account runs as its own task that owns the account's claim state.
//! Commands arrive over an unbounded channel, so fan-out from the stream
//! never blocks and per-account order matches classification order. Claims
//! execute one at a time inside the task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::executor::{ClaimExecutor, ExecutionResult, MAX_BACKOFF};
use super::state::AccountClaimState;
use crate::db::ClaimJournal;
use crate::models::*;

pub enum AccountCommand {
    Entry(ClassifiedEntry),
    Activity(ActivityState),
    /// Current license list; replaces the owned set.
    Licenses(Vec<EntryId>),
    Reconfigure(AccountSettings),
    Status(oneshot::Sender<AccountStatus>),
    /// Entries waiting for execution, in claim order.
    Queue(oneshot::Sender<Vec<EntryId>>),
}

struct PendingClaim {
    entry: ClassifiedEntry,
    attempts: u32,
    not_before: Option<Instant>,
}

pub struct AccountOrchestrator {
    account_id: String,
    state: AccountClaimState,
    busy: bool,
    queue: VecDeque<PendingClaim>,
    remote_backoff_until: Option<Instant>,
    last_decision: Option<ClaimDecision>,
    executor: Arc<ClaimExecutor>,
    journal: Arc<dyn ClaimJournal>,
}

/// Handle to a running orchestrator. Dropping the last sender disables it.
pub struct AccountHandle {
    commands: mpsc::UnboundedSender<AccountCommand>,
    task: JoinHandle<()>,
}

impl AccountHandle {
    /// Returns `false` if the orchestrator has already stopped.
    pub fn send(&self, command: AccountCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AccountCommand> {
        self.commands.clone()
    }

    pub async fn status(&self) -> Option<AccountStatus> {
        request_status(&self.commands).await
    }

    /// Close the command channel and wait for the task to finish. An
    /// in-flight claim completes first; queued claims are cancelled.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Account orchestrator task failed");
        }
    }
}

pub(crate) async fn request_status(
    commands: &mpsc::UnboundedSender<AccountCommand>,
) -> Option<AccountStatus> {
    let (tx, rx) = oneshot::channel();
    commands.send(AccountCommand::Status(tx)).ok()?;
    rx.await.ok()
}

pub(crate) async fn request_queue(
    commands: &mpsc::UnboundedSender<AccountCommand>,
) -> Option<Vec<EntryId>> {
    let (tx, rx) = oneshot::channel();
    commands.send(AccountCommand::Queue(tx)).ok()?;
    rx.await.ok()
}

impl AccountOrchestrator {
    pub fn new(
        account_id: impl Into<String>,
        settings: AccountSettings,
        executor: Arc<ClaimExecutor>,
        journal: Arc<dyn ClaimJournal>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            state: AccountClaimState::new(settings),
            busy: false,
            queue: VecDeque::new(),
            remote_backoff_until: None,
            last_decision: None,
            executor,
            journal,
        }
    }

    pub fn spawn(self) -> AccountHandle {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(receiver));
        AccountHandle { commands, task }
    }

    pub fn lifecycle(&self) -> OrchestratorState {
        if self.state.pause_on_activity && self.busy {
            OrchestratorState::Paused
        } else {
            OrchestratorState::Active
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<AccountCommand>) {
        info!(
            account = %self.account_id,
            hourly_limit = ?self.state.hourly_limit,
            pause_on_activity = self.state.pause_on_activity,
            rules = self.state.rules.len(),
            "Claiming enabled"
        );

        loop {
            let wake = self.next_wakeup(Instant::now());
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = wait_until(wake) => self.execute_next().await,
            }
        }

        while let Some(pending) = self.queue.pop_front() {
            self.decide(
                pending.entry.entry_id,
                ClaimDecision::Cancelled,
                Some("account disabled".to_string()),
            );
        }
        info!(account = %self.account_id, "Claiming disabled");
    }

    fn handle(&mut self, command: AccountCommand) {
        match command {
            AccountCommand::Entry(entry) => self.offer(entry),
            AccountCommand::Activity(activity) => self.set_activity(activity),
            AccountCommand::Licenses(entries) => self.replace_licenses(entries),
            AccountCommand::Reconfigure(settings) => self.reconfigure(settings),
            AccountCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            AccountCommand::Queue(reply) => {
                let _ = reply.send(self.queue.iter().map(|p| p.entry.entry_id).collect());
            }
        }
    }

    fn offer(&mut self, entry: ClassifiedEntry) {
        let entry_id = entry.entry_id;
        let queued = self.queue.iter().any(|p| p.entry.entry_id == entry_id);
        if queued || self.state.knows(&entry_id) {
            self.decide(entry_id, ClaimDecision::SkippedDuplicate, None);
            return;
        }
        if !any_rule_matches(&self.state.rules, &entry.metadata) {
            self.decide(entry_id, ClaimDecision::SkippedFiltered, None);
            return;
        }

        self.queue.push_back(PendingClaim {
            entry,
            attempts: 0,
            not_before: None,
        });

        let now = Instant::now();
        let remaining = self.state.window.remaining(self.state.hourly_limit, now);
        match remaining {
            Some(remaining) if self.queue.len() > remaining => {
                let counted = self.state.window.count(now);
                self.decide(
                    entry_id,
                    ClaimDecision::DeferredRateLimited,
                    Some(format!("{} claims in the last hour", counted)),
                );
            }
            _ => debug!(account = %self.account_id, entry = %entry_id, "Queued claim"),
        }
    }

    fn set_activity(&mut self, activity: ActivityState) {
        let before = self.lifecycle();
        self.busy = activity == ActivityState::Busy;
        let after = self.lifecycle();
        if before != after {
            info!(
                account = %self.account_id,
                state = after.as_str(),
                queued = self.queue.len(),
                "Claiming {}",
                if after == OrchestratorState::Paused { "paused" } else { "resumed" }
            );
        }
    }

    fn replace_licenses(&mut self, entries: Vec<EntryId>) {
        self.state.owned = entries.into_iter().collect();
        debug!(account = %self.account_id, owned = self.state.owned.len(), "License list updated");

        let owned_now = &self.state.owned;
        let (owned, keep): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|p| owned_now.contains(&p.entry.entry_id));
        self.queue = keep.into();
        for pending in owned {
            self.decide(
                pending.entry.entry_id,
                ClaimDecision::SkippedDuplicate,
                Some("acquired outside of claiming".to_string()),
            );
        }
    }

    fn reconfigure(&mut self, settings: AccountSettings) {
        self.state.apply_settings(settings);
        info!(
            account = %self.account_id,
            hourly_limit = ?self.state.hourly_limit,
            pause_on_activity = self.state.pause_on_activity,
            rules = self.state.rules.len(),
            "Claim settings replaced"
        );

        let rules = &self.state.rules;
        let (keep, filtered): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|p| any_rule_matches(rules, &p.entry.metadata));
        self.queue = keep.into();
        for pending in filtered {
            self.decide(pending.entry.entry_id, ClaimDecision::SkippedFiltered, None);
        }
    }

    /// When the head of the queue may run next. `None` while paused, idle or
    /// limited to zero claims per hour.
    fn next_wakeup(&mut self, now: Instant) -> Option<Instant> {
        if self.lifecycle() == OrchestratorState::Paused || self.state.hourly_limit == Some(0) {
            return None;
        }
        let head = self.queue.front()?;

        let mut at = now;
        if let Some(not_before) = head.not_before {
            at = at.max(not_before);
        }
        if let Some(until) = self.remote_backoff_until {
            at = at.max(until);
        }
        if let Some(free_at) = self.state.window.next_free_at(self.state.hourly_limit, now) {
            at = at.max(free_at);
        }
        Some(at)
    }

    /// Run the claim at the head of the queue if everything allows it now.
    /// Limits are evaluated here, at execution time.
    async fn execute_next(&mut self) {
        let now = Instant::now();
        if self.lifecycle() == OrchestratorState::Paused {
            return;
        }
        if self.remote_backoff_until.is_some_and(|until| until > now) {
            return;
        }
        if !self.state.window.has_capacity(self.state.hourly_limit, now) {
            return;
        }
        match self.queue.front() {
            Some(head) if head.not_before.is_some_and(|t| t > now) => return,
            Some(_) => {}
            None => return,
        }
        let Some(mut pending) = self.queue.pop_front() else {
            return;
        };
        self.remote_backoff_until = None;

        let entry_id = pending.entry.entry_id;
        let result = self
            .executor
            .execute(&self.account_id, &mut self.state, entry_id, pending.attempts)
            .await;

        match result {
            ExecutionResult::Done { decision, detail } => self.decide(entry_id, decision, detail),
            ExecutionResult::RetryAfter(delay) => {
                pending.attempts += 1;
                pending.not_before = Some(after(delay));
                warn!(
                    account = %self.account_id,
                    entry = %entry_id,
                    attempt = pending.attempts,
                    retry_in_secs = delay.as_secs(),
                    "Claim failed, will retry"
                );
                self.queue.push_front(pending);
            }
            ExecutionResult::RemoteBackoff(delay) => {
                self.remote_backoff_until = Some(after(delay));
                warn!(
                    account = %self.account_id,
                    entry = %entry_id,
                    backoff_secs = delay.as_secs(),
                    "Remote rate limit hit, backing off"
                );
                self.queue.push_front(pending);
            }
        }
    }

    fn decide(&mut self, entry_id: EntryId, decision: ClaimDecision, detail: Option<String>) {
        match decision {
            ClaimDecision::Claimed => {
                info!(account = %self.account_id, entry = %entry_id, "Claimed free entry")
            }
            ClaimDecision::Failed | ClaimDecision::Rejected => warn!(
                account = %self.account_id,
                entry = %entry_id,
                decision = decision.as_str(),
                detail = detail.as_deref().unwrap_or(""),
                "Claim unsuccessful"
            ),
            _ => debug!(
                account = %self.account_id,
                entry = %entry_id,
                decision = decision.as_str(),
                detail = detail.as_deref().unwrap_or(""),
                "Claim decision"
            ),
        }

        self.last_decision = Some(decision);
        let record = ClaimRecord::new(self.account_id.clone(), entry_id, decision, detail);
        if let Err(e) = self.journal.record(&record) {
            warn!(account = %self.account_id, error = %e, "Failed to journal claim decision");
        }
    }

    fn status(&mut self) -> AccountStatus {
        let now = Instant::now();
        AccountStatus {
            account_id: self.account_id.clone(),
            state: self.lifecycle(),
            hourly_limit: self.state.hourly_limit,
            claims_in_window: self.state.window.count(now),
            queued: self.queue.len(),
            owned: self.state.owned.len(),
            rejected: self.state.rejected.len(),
            rules: self.state.rules.len(),
            last_decision: self.last_decision,
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// `delay` from now, capped so remote values cannot overflow the clock.
fn after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(MAX_BACKOFF)).unwrap_or(now)
}
