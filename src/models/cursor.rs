use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::{EntryId, EntryMetadata};

/// Stable classification derived from an entry's metadata.
///
/// Derivation is a pure function of the metadata, so a cached classification is
/// valid for as long as the metadata hash it was computed from is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub tags: BTreeSet<String>,
    pub claimable: bool,
    pub metadata_hash: u64,
}

impl Classification {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// A classified, claimable entry routed to every active account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedEntry {
    pub entry_id: EntryId,
    /// Sequence number of the batch the entry arrived in.
    pub sequence: u64,
    pub metadata: EntryMetadata,
    pub classification: Classification,
}

/// Process-wide cursor over the remote change stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorState {
    /// Last change batch whose effects are durably committed.
    pub last_sequence: u64,
    pub known_entries: HashMap<EntryId, Classification>,
    /// Entries whose metadata lookup failed; retried with the next batch.
    pub pending_entries: BTreeSet<EntryId>,
}

impl CursorState {
    /// Mirror a successful commit into the in-memory state.
    pub fn apply(&mut self, sequence: u64, delta: &ClassificationDelta) {
        if sequence <= self.last_sequence {
            return;
        }
        self.absorb(delta);
        self.last_sequence = sequence;
    }

    /// Fold cache and pending changes in without moving the sequence.
    pub fn absorb(&mut self, delta: &ClassificationDelta) {
        for (id, classification) in &delta.upserts {
            self.known_entries.insert(*id, classification.clone());
        }
        for id in &delta.resolved {
            self.pending_entries.remove(id);
        }
        self.pending_entries.extend(delta.pending.iter().copied());
    }
}

/// Cache changes produced by classifying one batch, committed together with
/// the batch's sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationDelta {
    pub upserts: BTreeMap<EntryId, Classification>,
    /// Entries that could not be classified and must be retried.
    pub pending: BTreeSet<EntryId>,
    /// Previously pending entries that are now settled.
    pub resolved: BTreeSet<EntryId>,
}

impl ClassificationDelta {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.pending.is_empty() && self.resolved.is_empty()
    }
}

/// Cheap read-only view of the cursor for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSummary {
    pub last_sequence: u64,
    pub categorized_entries: usize,
    pub pending_entries: usize,
    pub updated_at: Option<DateTime<Utc>>,
}
