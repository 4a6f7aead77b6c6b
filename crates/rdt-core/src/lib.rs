//! Core domain model for the retail display tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "rdt-core";

/// Identity of one tracked store/location.
///
/// Every field is an opaque string: ids can carry leading zeros or
/// non-numeric tokens and must never be coerced to numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    pub entity_id: String,
    pub dealer_id: String,
    pub channel: String,
    pub store_name: String,
}

impl StoreKey {
    pub fn new(
        entity_id: impl Into<String>,
        dealer_id: impl Into<String>,
        channel: impl Into<String>,
        store_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            dealer_id: dealer_id.into(),
            channel: channel.into(),
            store_name: store_name.into(),
        }
    }

    /// A key with every field blank cannot join against anything.
    pub fn is_blank(&self) -> bool {
        self.entity_id.trim().is_empty()
            && self.dealer_id.trim().is_empty()
            && self.channel.trim().is_empty()
            && self.store_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Increase,
    Decrease,
}

/// One detected delta for a (store, model) pair in one period.
///
/// Only materialized when the store was observed this period and the
/// observed value differs from the prior one; zero diffs never exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(flatten)]
    pub store: StoreKey,
    pub model: String,
    pub previous: i64,
    pub current: i64,
    pub difference: i64,
    pub change_type: ChangeKind,
}

impl ChangeRecord {
    pub fn is_decrease(&self) -> bool {
        self.change_type == ChangeKind::Decrease
    }
}

/// Per-model aggregate of changes across all stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub previous: i64,
    pub current: i64,
    pub difference: i64,
}

/// Global statistics over decrease records only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecreaseStats {
    /// Distinct stores with at least one decrease record.
    pub stores_affected: usize,
    /// Sum of absolute differences over all decrease records.
    pub total_decrease: i64,
    /// Distinct models with at least one decrease record.
    pub models_decreased: usize,
}

/// Responsible-party record resolved through the contact lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub display_name: String,
}

/// Synchronous query boundary to the external contacts datastore.
///
/// Overlapping records are allowed; implementations return the first
/// match in their own storage order.
pub trait ContactLookup: Send + Sync {
    fn by_entity_id(&self, entity_id: &str) -> Option<Contact>;
    fn by_store_name(&self, store_name: &str) -> Option<Contact>;
}

/// All decrease records for one store, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDecreases {
    pub store: StoreKey,
    pub decreases: Vec<ChangeRecord>,
}

/// One recipient's consolidated view of decreases across their stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientBundle {
    pub email: String,
    pub display_name: String,
    pub stores: Vec<StoreDecreases>,
}

/// Full change summary for one reconciliation run.
///
/// Persisted as the weekly alert document; recipient bundles are
/// rebuilt from scratch on every run and live only inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub generated_at: DateTime<Utc>,
    pub week: u32,
    pub total_models_tracked: usize,
    pub models_increased: usize,
    pub models_decreased: usize,
    pub models_unchanged: usize,
    pub top_increases: Vec<ModelSummary>,
    pub top_decreases: Vec<ModelSummary>,
    pub increases: Vec<ModelSummary>,
    pub decreases: Vec<ModelSummary>,
    pub all_changes: Vec<ChangeRecord>,
    pub decrease_stats: DecreaseStats,
    pub recipients: Vec<RecipientBundle>,
}

impl AlertSummary {
    pub fn recipient(&self, email: &str) -> Option<&RecipientBundle> {
        self.recipients.iter().find(|r| r.email == email)
    }

    /// Decrease records only, in change-set order.
    pub fn decrease_records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.all_changes.iter().filter(|c| c.is_decrease())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_key_requires_all_fields_empty() {
        assert!(StoreKey::new("", " ", "", "").is_blank());
        assert!(!StoreKey::new("007", "", "", "").is_blank());
    }

    #[test]
    fn change_record_serializes_with_flat_key_fields() {
        let record = ChangeRecord {
            store: StoreKey::new("007", "D1", "Retail", "Main St"),
            model: "X100".to_string(),
            previous: 2,
            current: 1,
            difference: -1,
            change_type: ChangeKind::Decrease,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entity_id"], "007");
        assert_eq!(json["model"], "X100");
        assert_eq!(json["change_type"], "Decrease");
    }
}
