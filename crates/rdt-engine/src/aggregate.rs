//! Summarizes a change set into model-level totals, decrease
//! statistics, and per-recipient decrease bundles.

use std::collections::HashMap;

use chrono::Utc;
use rdt_core::{
    AlertSummary, ChangeRecord, Contact, ContactLookup, DecreaseStats, ModelSummary,
    RecipientBundle, StoreDecreases, StoreKey,
};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_TOP_INCREASES: usize = 15;
pub const DEFAULT_TOP_DECREASES: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub top_increases: usize,
    pub top_decreases: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            top_increases: DEFAULT_TOP_INCREASES,
            top_decreases: DEFAULT_TOP_DECREASES,
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("summing {field} for model {model:?} overflowed")]
    Overflow { model: String, field: &'static str },
}

pub fn aggregate(
    changes: &[ChangeRecord],
    models_tracked: usize,
    contacts: &dyn ContactLookup,
    week: u32,
) -> Result<AlertSummary, AggregationError> {
    aggregate_with(changes, models_tracked, contacts, week, AggregateOptions::default())
}

pub fn aggregate_with(
    changes: &[ChangeRecord],
    models_tracked: usize,
    contacts: &dyn ContactLookup,
    week: u32,
    options: AggregateOptions,
) -> Result<AlertSummary, AggregationError> {
    let summaries = summarize_models(changes)?;

    let mut increases: Vec<ModelSummary> = summaries
        .iter()
        .filter(|s| s.difference > 0)
        .cloned()
        .collect();
    let mut decreases: Vec<ModelSummary> = summaries
        .iter()
        .filter(|s| s.difference < 0)
        .cloned()
        .collect();
    // Stable sorts keep first-seen order on ties.
    increases.sort_by(|a, b| b.difference.cmp(&a.difference));
    decreases.sort_by(|a, b| a.difference.cmp(&b.difference));

    Ok(AlertSummary {
        generated_at: Utc::now(),
        week,
        total_models_tracked: models_tracked,
        models_increased: increases.len(),
        models_decreased: decreases.len(),
        models_unchanged: models_tracked.saturating_sub(summaries.len()),
        top_increases: increases.iter().take(options.top_increases).cloned().collect(),
        top_decreases: decreases.iter().take(options.top_decreases).cloned().collect(),
        increases,
        decreases,
        all_changes: changes.to_vec(),
        decrease_stats: decrease_stats(changes),
        recipients: group_recipients(changes, contacts),
    })
}

/// Groups the change set by model in first-seen order, summing
/// previous/current/difference across stores.
fn summarize_models(changes: &[ChangeRecord]) -> Result<Vec<ModelSummary>, AggregationError> {
    let mut summaries: Vec<ModelSummary> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for change in changes {
        let pos = match positions.get(change.model.as_str()) {
            Some(&pos) => pos,
            None => {
                positions.insert(&change.model, summaries.len());
                summaries.push(ModelSummary {
                    model: change.model.clone(),
                    previous: 0,
                    current: 0,
                    difference: 0,
                });
                summaries.len() - 1
            }
        };
        let entry = &mut summaries[pos];
        entry.previous = checked_sum(entry.previous, change.previous, &change.model, "previous")?;
        entry.current = checked_sum(entry.current, change.current, &change.model, "current")?;
        entry.difference =
            checked_sum(entry.difference, change.difference, &change.model, "difference")?;
    }
    Ok(summaries)
}

fn checked_sum(
    acc: i64,
    value: i64,
    model: &str,
    field: &'static str,
) -> Result<i64, AggregationError> {
    acc.checked_add(value).ok_or_else(|| AggregationError::Overflow {
        model: model.to_string(),
        field,
    })
}

fn decrease_stats(changes: &[ChangeRecord]) -> DecreaseStats {
    let mut stores: Vec<&StoreKey> = Vec::new();
    let mut models: Vec<&str> = Vec::new();
    let mut total = 0i64;

    for change in changes.iter().filter(|c| c.is_decrease()) {
        if !stores.contains(&&change.store) {
            stores.push(&change.store);
        }
        if !models.contains(&change.model.as_str()) {
            models.push(&change.model);
        }
        total += change.difference.abs();
    }

    DecreaseStats {
        stores_affected: stores.len(),
        total_decrease: total,
        models_decreased: models.len(),
    }
}

/// Builds the per-recipient decrease bundles in one grouped pass:
/// decreases by store first, each store resolved to a contact, then
/// stores collected per recipient. Both levels keep first-encounter
/// order. Stores with no resolvable contact are dropped from the
/// grouping only; their decreases stay in the model-level views.
fn group_recipients(changes: &[ChangeRecord], contacts: &dyn ContactLookup) -> Vec<RecipientBundle> {
    let mut stores: Vec<StoreDecreases> = Vec::new();
    let mut store_pos: HashMap<&StoreKey, usize> = HashMap::new();

    for change in changes.iter().filter(|c| c.is_decrease()) {
        match store_pos.get(&change.store) {
            Some(&pos) => stores[pos].decreases.push(change.clone()),
            None => {
                store_pos.insert(&change.store, stores.len());
                stores.push(StoreDecreases {
                    store: change.store.clone(),
                    decreases: vec![change.clone()],
                });
            }
        }
    }

    let mut bundles: Vec<RecipientBundle> = Vec::new();
    let mut bundle_pos: HashMap<String, usize> = HashMap::new();

    for store in stores {
        let Some(contact) = resolve_contact(contacts, &store.store) else {
            warn!(
                entity_id = %store.store.entity_id,
                store_name = %store.store.store_name,
                "no contact for store; dropped from recipient grouping"
            );
            continue;
        };
        match bundle_pos.get(&contact.email) {
            Some(&pos) => bundles[pos].stores.push(store),
            None => {
                bundle_pos.insert(contact.email.clone(), bundles.len());
                bundles.push(RecipientBundle {
                    email: contact.email,
                    display_name: contact.display_name,
                    stores: vec![store],
                });
            }
        }
    }
    bundles
}

/// Lookup by entity id first, store name second; first match wins.
fn resolve_contact(contacts: &dyn ContactLookup, key: &StoreKey) -> Option<Contact> {
    contacts
        .by_entity_id(&key.entity_id)
        .or_else(|| contacts.by_store_name(&key.store_name))
}
