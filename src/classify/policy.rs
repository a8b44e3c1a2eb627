//! Free-eligibility policy and the pure classification function.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{Classification, EntryKind, EntryMetadata};

/// Decides whether an entry can be acquired at no cost.
///
/// Implementations must be pure: the same metadata always yields the same
/// answer, otherwise cached classifications go stale silently.
pub trait EligibilityPolicy: Send + Sync {
    fn is_claimable(&self, entry: &EntryMetadata) -> bool;
}

/// Configurable free-eligibility rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FreeEntryPolicy {
    /// Entry kinds that can be claimed as a license.
    pub claimable_kinds: BTreeSet<EntryKind>,
    /// Highest listed price still considered free.
    pub max_price_cents: u32,
    /// Only accept entries the remote explicitly marks as free licenses.
    pub require_free_license: bool,
}

impl Default for FreeEntryPolicy {
    fn default() -> Self {
        Self {
            claimable_kinds: BTreeSet::from([EntryKind::Package]),
            max_price_cents: 0,
            require_free_license: false,
        }
    }
}

impl EligibilityPolicy for FreeEntryPolicy {
    fn is_claimable(&self, entry: &EntryMetadata) -> bool {
        if !self.claimable_kinds.contains(&entry.kind) {
            return false;
        }
        if entry.free_license {
            return true;
        }
        if self.require_free_license {
            return false;
        }
        matches!(entry.price_cents, Some(price) if price <= self.max_price_cents)
    }
}

/// Derive the stable classification for an entry.
pub fn classify(entry: &EntryMetadata, policy: &dyn EligibilityPolicy) -> Classification {
    let mut tags = BTreeSet::new();
    tags.insert(format!("kind:{}", entry.kind.as_str()));
    if entry.free_license || entry.price_cents == Some(0) {
        tags.insert("free".to_string());
    }
    if entry.has_collectibles {
        tags.insert("collectibles".to_string());
    }
    if entry.regions.is_some() {
        tags.insert("region_locked".to_string());
    }
    for category in &entry.categories {
        tags.insert(format!("category:{}", category));
    }

    Classification {
        tags,
        claimable: policy.is_claimable(entry),
        metadata_hash: entry.metadata_hash,
    }
}
