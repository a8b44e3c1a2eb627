//! Change stream listener.
//!
//! Drives the single-writer pipeline: feed → classifier → fan-out → cursor
//! commit. A batch is fully classified, dispatched and committed before the
//! next one is read from the feed.

mod http;

pub use http::{ClientError, HttpCatalogClient};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify::{BatchReport, DiffClassifier};
use crate::db::{CursorStore, StoreError};
use crate::models::*;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Transport gave up; the host should reconnect and resume from the cursor.
    #[error("change stream disconnected: {0}")]
    Disconnected(String),

    #[error("change stream rejected our credentials")]
    Unauthorized,

    #[error("change stream protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Signals delivered by the remote change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Batch(ChangeBatch),
    /// The remote invalidated its state; a full resynchronization follows.
    Restart { sequence: u64 },
}

/// Remote change-notification stream.
#[async_trait]
pub trait ChangeFeed: Send {
    /// (Re)start delivery after `start_sequence`.
    async fn subscribe(&mut self, start_sequence: u64) -> Result<(), StreamError>;

    /// Wait for the next event. `Ok(None)` means the feed ended cleanly.
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, StreamError>;
}

/// Receiver of claimable entries, in classification order.
pub trait EntrySink: Send + Sync {
    fn dispatch(&self, entry: &ClassifiedEntry);
}

pub struct ChangeListener<F> {
    feed: F,
    classifier: DiffClassifier,
    store: Arc<dyn CursorStore>,
    sink: Arc<dyn EntrySink>,
    cursor: CursorState,
    resync_pending: bool,
}

impl<F: ChangeFeed> ChangeListener<F> {
    pub fn new(
        feed: F,
        classifier: DiffClassifier,
        store: Arc<dyn CursorStore>,
        sink: Arc<dyn EntrySink>,
        cursor: CursorState,
    ) -> Self {
        Self {
            feed,
            classifier,
            store,
            sink,
            cursor,
            resync_pending: false,
        }
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    /// Subscribe from the last committed sequence and process events until
    /// the feed ends or fails. Safe to call again after an error.
    pub async fn run(&mut self) -> Result<(), StreamError> {
        let start = self.cursor.last_sequence;
        info!(start_sequence = start, "Subscribing to change stream");
        self.feed.subscribe(start).await?;

        while let Some(event) = self.feed.next_event().await? {
            match event {
                FeedEvent::Batch(batch) => {
                    self.process_batch(batch).await?;
                }
                FeedEvent::Restart { sequence } => {
                    warn!(
                        remote_sequence = sequence,
                        resume_from = self.cursor.last_sequence,
                        "Change stream restarted, next batch is a full resync"
                    );
                    self.resync_pending = true;
                    self.feed.subscribe(self.cursor.last_sequence).await?;
                }
            }
        }

        info!(last_sequence = self.cursor.last_sequence, "Change stream ended");
        Ok(())
    }

    /// Classify, dispatch and commit one batch.
    ///
    /// Returns `None` when an incremental batch at or below the committed
    /// sequence was skipped.
    pub async fn process_batch(
        &mut self,
        batch: ChangeBatch,
    ) -> Result<Option<BatchReport>, StreamError> {
        let full_resync = batch.is_full_resync || self.resync_pending;
        if !full_resync && batch.sequence <= self.cursor.last_sequence {
            debug!(
                sequence = batch.sequence,
                committed = self.cursor.last_sequence,
                "Skipping already applied batch"
            );
            return Ok(None);
        }

        let classified = self
            .classifier
            .classify_batch(&batch, &self.cursor, full_resync)
            .await;

        for entry in &classified.claimable {
            self.sink.dispatch(entry);
        }

        if self.store.commit(batch.sequence, &classified.delta)? {
            self.cursor.apply(batch.sequence, &classified.delta);
        } else if !classified.delta.is_empty() {
            debug!(
                sequence = batch.sequence,
                committed = self.cursor.last_sequence,
                pending = classified.delta.pending.len(),
                "Batch did not advance the cursor, keeping its classifications"
            );
            self.store.merge(&classified.delta)?;
            self.cursor.absorb(&classified.delta);
        }
        self.resync_pending = false;

        let report = classified.report;
        info!(
            sequence = batch.sequence,
            full_resync,
            changed = report.changed,
            reclassified = report.reclassified,
            claimable = report.claimable,
            deferred = report.deferred,
            "Processed change batch"
        );
        Ok(Some(report))
    }
}
