use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::entry::{EntryId, EntryKind, EntryMetadata};

/// A named predicate over entry metadata.
///
/// Every configured condition must hold for the rule to match. Conditions that
/// are left unset do not constrain the entry. An account matches an entry when
/// any one of its rules matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "Types", skip_serializing_if = "BTreeSet::is_empty")]
    pub types: BTreeSet<EntryKind>,
    #[serde(default, alias = "IgnoredTypes", skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_types: BTreeSet<EntryKind>,
    #[serde(default, alias = "Categories", skip_serializing_if = "BTreeSet::is_empty")]
    pub categories: BTreeSet<String>,
    #[serde(default, alias = "IgnoredCategories", skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_categories: BTreeSet<String>,
    #[serde(default, alias = "Tags", skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, alias = "IgnoredTags", skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_tags: BTreeSet<String>,
    #[serde(default, alias = "IgnoredAppIDs", skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_entries: BTreeSet<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price_cents: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, alias = "RequireCards")]
    pub require_collectibles: bool,
}

impl FilterRule {
    pub fn matches(&self, entry: &EntryMetadata) -> bool {
        if !self.types.is_empty() && !self.types.contains(&entry.kind) {
            return false;
        }
        if self.ignored_types.contains(&entry.kind) {
            return false;
        }
        if self.ignored_entries.contains(&entry.id) {
            return false;
        }
        if !self.categories.is_empty() && self.categories.is_disjoint(&entry.categories) {
            return false;
        }
        if !self.ignored_categories.is_disjoint(&entry.categories) {
            return false;
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&entry.tags) {
            return false;
        }
        if !self.ignored_tags.is_disjoint(&entry.tags) {
            return false;
        }
        if let Some(max) = self.max_price_cents {
            if entry.price_cents.unwrap_or(0) > max {
                return false;
            }
        }
        if let Some(region) = &self.region {
            if !entry.is_available_in(region) {
                return false;
            }
        }
        if self.require_collectibles && !entry.has_collectibles {
            return false;
        }
        true
    }
}

/// Logical OR across rules. An empty rule set behaves as a single match-all rule.
pub fn any_rule_matches(rules: &[FilterRule], entry: &EntryMetadata) -> bool {
    rules.is_empty() || rules.iter().any(|rule| rule.matches(entry))
}
