//! Scripted stand-ins for the remote catalog, shared by the integration suites.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use free_packages::accounts::{ClaimError, ClaimService};
use free_packages::classify::{LookupError, MetadataLookup};
use free_packages::db::{ClaimJournal, StoreError};
use free_packages::models::*;
use free_packages::stream::{ChangeFeed, EntrySink, FeedEvent, StreamError};

pub fn metadata(id: u32, hash: u64) -> EntryMetadata {
    EntryMetadata {
        id: EntryId(id),
        kind: EntryKind::Package,
        name: Some(format!("Entry {}", id)),
        price_cents: Some(0),
        free_license: true,
        categories: BTreeSet::new(),
        tags: BTreeSet::new(),
        regions: None,
        has_collectibles: false,
        metadata_hash: hash,
    }
}

pub fn paid(id: u32, hash: u64) -> EntryMetadata {
    EntryMetadata {
        price_cents: Some(999),
        free_license: false,
        ..metadata(id, hash)
    }
}

pub fn classified(metadata: EntryMetadata) -> ClassifiedEntry {
    ClassifiedEntry {
        entry_id: metadata.id,
        sequence: 1,
        classification: Classification {
            tags: BTreeSet::from(["free".to_string()]),
            claimable: true,
            metadata_hash: metadata.metadata_hash,
        },
        metadata,
    }
}

pub fn change(id: u32, hash: u64) -> EntryChange {
    EntryChange {
        entry_id: EntryId(id),
        prior_hash: None,
        new_hash: hash,
    }
}

pub fn batch(sequence: u64, changes: Vec<EntryChange>) -> FeedEvent {
    FeedEvent::Batch(ChangeBatch {
        sequence,
        changes,
        is_full_resync: false,
    })
}

// ============================================================
// Change feed
// ============================================================

/// Replays a fixed script of events, then ends.
pub struct ScriptedFeed {
    script: VecDeque<Result<FeedEvent, StreamError>>,
    pub subscriptions: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedFeed {
    pub fn new(script: Vec<Result<FeedEvent, StreamError>>) -> Self {
        Self {
            script: script.into(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn of(events: Vec<FeedEvent>) -> Self {
        Self::new(events.into_iter().map(Ok).collect())
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn subscribe(&mut self, start_sequence: u64) -> Result<(), StreamError> {
        self.subscriptions.lock().unwrap().push(start_sequence);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<FeedEvent>, StreamError> {
        match self.script.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

// ============================================================
// Metadata lookup
// ============================================================

#[derive(Default)]
pub struct FakeLookup {
    entries: Mutex<HashMap<EntryId, EntryMetadata>>,
    failures: Mutex<u32>,
    pub requests: Mutex<Vec<Vec<EntryId>>>,
}

impl FakeLookup {
    pub fn with(entries: Vec<EntryMetadata>) -> Self {
        let lookup = Self::default();
        for entry in entries {
            lookup.insert(entry);
        }
        lookup
    }

    pub fn insert(&self, entry: EntryMetadata) {
        self.entries.lock().unwrap().insert(entry.id, entry);
    }

    /// Fail the next `count` lookups.
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock().unwrap() = count;
    }

    pub fn requested(&self) -> Vec<EntryId> {
        self.requests.lock().unwrap().iter().flatten().copied().collect()
    }
}

#[async_trait]
impl MetadataLookup for FakeLookup {
    async fn lookup(&self, ids: &[EntryId]) -> Result<Vec<EntryMetadata>, LookupError> {
        self.requests.lock().unwrap().push(ids.to_vec());
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(LookupError::Unavailable("scripted failure".to_string()));
            }
        }
        let entries = self.entries.lock().unwrap();
        Ok(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }
}

// ============================================================
// Claims
// ============================================================

/// Succeeds unless an outcome was scripted for the entry.
#[derive(Default)]
pub struct FakeClaims {
    outcomes: Mutex<HashMap<EntryId, VecDeque<Result<(), ClaimError>>>>,
    latency: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<(String, EntryId)>>,
}

impl FakeClaims {
    pub fn script(&self, entry: u32, outcomes: Vec<Result<(), ClaimError>>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(EntryId(entry), outcomes.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn calls_for(&self, entry: u32) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, id)| *id == EntryId(entry))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ClaimService for FakeClaims {
    async fn claim(&self, account_id: &str, entry_id: EntryId) -> Result<(), ClaimError> {
        self.calls
            .lock()
            .unwrap()
            .push((account_id.to_string(), entry_id));
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .get_mut(&entry_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

// ============================================================
// Sinks
// ============================================================

#[derive(Default)]
pub struct RecordingSink {
    pub entries: Mutex<Vec<ClassifiedEntry>>,
}

impl RecordingSink {
    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.lock().unwrap().iter().map(|e| e.entry_id).collect()
    }
}

impl EntrySink for RecordingSink {
    fn dispatch(&self, entry: &ClassifiedEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

#[derive(Default)]
pub struct MemoryJournal {
    pub records: Mutex<Vec<ClaimRecord>>,
}

impl MemoryJournal {
    pub fn decisions_for(&self, entry: u32) -> Vec<ClaimDecision> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.entry_id == EntryId(entry))
            .map(|r| r.decision)
            .collect()
    }

    pub fn count(&self, decision: ClaimDecision) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.decision == decision)
            .count()
    }
}

impl ClaimJournal for MemoryJournal {
    fn record(&self, record: &ClaimRecord) -> Result<(), StoreError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
