use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a catalog entry as assigned by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u32);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntryId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// The kind of thing a catalog entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A license bundle that can be added to an account.
    Package,
    /// A standalone application.
    App,
    /// Downloadable content attached to an application.
    Dlc,
    Demo,
    Other,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::App => "app",
            Self::Dlc => "dlc",
            Self::Demo => "demo",
            Self::Other => "other",
        }
    }
}

/// One changed entry inside a change batch.
///
/// The hashes are the remote's digest of the entry metadata before and after
/// the change. `prior_hash` is absent for entries the remote just created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryChange {
    pub entry_id: EntryId,
    #[serde(default)]
    pub prior_hash: Option<u64>,
    pub new_hash: u64,
}

/// A batch of catalog mutations delivered by the change stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub sequence: u64,
    pub changes: Vec<EntryChange>,
    /// Set when the remote rebuilt its state and this batch is a fresh baseline.
    #[serde(default)]
    pub is_full_resync: bool,
}

/// Metadata for a catalog entry, as returned by the metadata lookup service.
///
/// Never persisted in full; only the derived [`Classification`](super::Classification)
/// survives in the cursor store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub id: EntryId,
    pub kind: EntryKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Listed price in cents. `None` when the entry is not for sale.
    #[serde(default)]
    pub price_cents: Option<u32>,
    /// The remote explicitly grants this entry as a no-cost license.
    #[serde(default)]
    pub free_license: bool,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Regions the entry is restricted to. `None` means available everywhere.
    #[serde(default)]
    pub regions: Option<BTreeSet<String>>,
    #[serde(default)]
    pub has_collectibles: bool,
    /// The remote's digest of this metadata, same value space as [`EntryChange::new_hash`].
    pub metadata_hash: u64,
}

impl EntryMetadata {
    pub fn is_available_in(&self, region: &str) -> bool {
        match &self.regions {
            Some(regions) => regions.iter().any(|r| r.eq_ignore_ascii_case(region)),
            None => true,
        }
    }
}
