//! Incremental diff classification.
//!
//! For every changed entry in a batch, decide whether the cached
//! classification still holds or the entry must be looked up and classified
//! again, then emit the claimable ones and the cache delta to commit.

mod policy;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub use policy::{classify, EligibilityPolicy, FreeEntryPolicy};

use crate::models::*;

/// Default number of ids sent per metadata lookup request.
pub const DEFAULT_LOOKUP_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("metadata service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed metadata response: {0}")]
    Malformed(String),
}

/// Source of entry metadata.
///
/// Entries missing from the response are treated as deleted or hidden and
/// therefore not claimable.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup(&self, ids: &[EntryId]) -> Result<Vec<EntryMetadata>, LookupError>;
}

/// Counters describing what happened to one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub full_resync: bool,
    pub changed: usize,
    pub unchanged: usize,
    pub reclassified: usize,
    pub claimable: usize,
    /// Lookups that failed; the entries are retried with a later batch.
    pub deferred: usize,
    /// Lookups that failed during a resync where the cached value was kept.
    pub kept_cached: usize,
    /// Resync results that disagreed with the cache for the same metadata.
    pub drifted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifiedBatch {
    pub sequence: u64,
    pub claimable: Vec<ClassifiedEntry>,
    pub delta: ClassificationDelta,
    pub report: BatchReport,
}

pub struct DiffClassifier {
    lookup: Arc<dyn MetadataLookup>,
    policy: Arc<dyn EligibilityPolicy>,
    chunk_size: usize,
}

impl DiffClassifier {
    pub fn new(lookup: Arc<dyn MetadataLookup>, policy: Arc<dyn EligibilityPolicy>) -> Self {
        Self {
            lookup,
            policy,
            chunk_size: DEFAULT_LOOKUP_CHUNK,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Classify one batch against the current cursor.
    ///
    /// With `full_resync` every entry in the batch is looked up again; the
    /// cache is only used as a fallback when a lookup fails. Never fails:
    /// lookup errors turn into pending entries in the returned delta.
    pub async fn classify_batch(
        &self,
        batch: &ChangeBatch,
        cursor: &CursorState,
        full_resync: bool,
    ) -> ClassifiedBatch {
        let mut out = ClassifiedBatch {
            sequence: batch.sequence,
            report: BatchReport {
                full_resync,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut seen = HashSet::with_capacity(batch.changes.len());
        let mut targets = Vec::new();
        for change in &batch.changes {
            if !seen.insert(change.entry_id) {
                continue;
            }
            out.report.changed += 1;

            let stale = match cursor.known_entries.get(&change.entry_id) {
                Some(cached) => cached.metadata_hash != change.new_hash,
                None => true,
            };
            if full_resync || stale {
                targets.push(change.entry_id);
            } else {
                out.report.unchanged += 1;
            }
        }
        for id in &cursor.pending_entries {
            if seen.insert(*id) {
                targets.push(*id);
            }
        }

        for chunk in targets.chunks(self.chunk_size) {
            match self.lookup.lookup(chunk).await {
                Ok(found) => self.absorb(chunk, found, cursor, full_resync, &mut out),
                Err(e) => {
                    warn!(
                        sequence = batch.sequence,
                        entries = chunk.len(),
                        error = %e,
                        "Metadata lookup failed"
                    );
                    for id in chunk {
                        let cached = cursor.known_entries.contains_key(id)
                            && !cursor.pending_entries.contains(id);
                        if full_resync && cached {
                            out.report.kept_cached += 1;
                        } else {
                            out.delta.pending.insert(*id);
                            out.report.deferred += 1;
                        }
                    }
                }
            }
        }

        out.report.claimable = out.claimable.len();
        out
    }

    fn absorb(
        &self,
        chunk: &[EntryId],
        found: Vec<EntryMetadata>,
        cursor: &CursorState,
        full_resync: bool,
        out: &mut ClassifiedBatch,
    ) {
        let mut by_id: HashMap<EntryId, EntryMetadata> =
            found.into_iter().map(|m| (m.id, m)).collect();

        for id in chunk {
            if cursor.pending_entries.contains(id) {
                out.delta.resolved.insert(*id);
            }

            let Some(metadata) = by_id.remove(id) else {
                debug!(entry = %id, "No metadata returned, treating entry as unclaimable");
                continue;
            };

            let classification = classify(&metadata, self.policy.as_ref());
            if full_resync {
                if let Some(cached) = cursor.known_entries.get(id) {
                    if cached.metadata_hash == classification.metadata_hash
                        && cached != &classification
                    {
                        out.report.drifted += 1;
                        debug!(entry = %id, "Cached classification drifted, replacing");
                    }
                }
            }
            out.report.reclassified += 1;

            if classification.claimable {
                out.claimable.push(ClassifiedEntry {
                    entry_id: *id,
                    sequence: out.sequence,
                    metadata,
                    classification: classification.clone(),
                });
            }
            out.delta.upserts.insert(*id, classification);
        }
    }
}
