//! Merges the prior cumulative report with the pivoted raw snapshot
//! under the binary-presence rule.
//!
//! A store absent from this week's raw snapshot carries its prior
//! values forward unchanged; a store that appears overwrites every
//! raw-table model with the observed value, zero included. Change
//! records exist only where an observed value differs from the prior
//! one.

use std::collections::HashSet;

use rdt_core::{ChangeKind, ChangeRecord, StoreKey};
use rdt_tabular::{WideRow, WideTable};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{side} table row {row} has a fully blank identity key")]
    BlankIdentity { side: &'static str, row: usize },
}

/// Prior/current cell pair for one (store, model).
///
/// `add` is `Some` exactly when the store appeared in this week's raw
/// snapshot and the model is a raw-table column. This replaces the
/// upstream export's `_old`/`_add` column-suffix convention with an
/// explicit structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePair {
    pub old: i64,
    pub add: Option<i64>,
}

impl ValuePair {
    /// The new cumulative value: the observed value when the store was
    /// seen this week, the prior value otherwise.
    pub fn updated(self) -> i64 {
        self.add.unwrap_or(self.old)
    }
}

#[derive(Debug)]
pub struct Reconciliation {
    /// Identity columns plus one updated value per model; becomes the
    /// next run's prior report.
    pub updated: WideTable,
    /// Non-zero deltas for observed (store, model) pairs, in row-major
    /// first-seen order.
    pub changes: Vec<ChangeRecord>,
}

/// Outer-joins `prior` and `raw` on the store key and derives the
/// updated report plus the change set.
pub fn merge(prior: &WideTable, raw: &WideTable) -> Result<Reconciliation, MergeError> {
    validate_keys(prior, "prior")?;
    validate_keys(raw, "raw")?;

    // Union model list: prior columns first, then raw-only columns.
    let mut models = prior.models().to_vec();
    let prior_models: HashSet<&str> = prior.models().iter().map(String::as_str).collect();
    for model in raw.models() {
        if !prior_models.contains(model.as_str()) {
            models.push(model.clone());
        }
    }

    let id_headers = if prior.id_headers().is_empty() {
        raw.id_headers().to_vec()
    } else {
        prior.id_headers().to_vec()
    };
    let mut updated = WideTable::with_columns(id_headers, models.clone());
    let mut changes = Vec::new();

    // Prior stores in input order, then stores new this week.
    for row in prior.rows() {
        merge_row(&models, &row.key, Some(row), prior, raw, &mut updated, &mut changes);
    }
    for row in raw.rows() {
        if !prior.contains_key(&row.key) {
            merge_row(&models, &row.key, None, prior, raw, &mut updated, &mut changes);
        }
    }

    info!(
        rows = updated.rows().len(),
        models = updated.models().len(),
        changes = changes.len(),
        "merged prior report with raw snapshot"
    );
    Ok(Reconciliation { updated, changes })
}

fn merge_row(
    models: &[String],
    key: &StoreKey,
    prior_row: Option<&WideRow>,
    prior: &WideTable,
    raw: &WideTable,
    updated: &mut WideTable,
    changes: &mut Vec<ChangeRecord>,
) {
    let raw_row = raw.get(key);
    let mut values = Vec::with_capacity(models.len());

    for model in models {
        let pair = ValuePair {
            old: prior_row
                .and_then(|row| prior.model_position(model).map(|i| row.values[i]))
                .unwrap_or(0),
            add: raw_row.and_then(|row| raw.model_position(model).map(|i| row.values[i])),
        };
        values.push(pair.updated());

        if let Some(current) = pair.add {
            let difference = current - pair.old;
            if difference != 0 {
                changes.push(ChangeRecord {
                    store: key.clone(),
                    model: model.clone(),
                    previous: pair.old,
                    current,
                    difference,
                    change_type: if difference > 0 {
                        ChangeKind::Increase
                    } else {
                        ChangeKind::Decrease
                    },
                });
            }
        }
    }
    updated.push_row(key.clone(), values);
}

fn validate_keys(table: &WideTable, side: &'static str) -> Result<(), MergeError> {
    for (i, row) in table.rows().iter().enumerate() {
        if row.key.is_blank() {
            return Err(MergeError::BlankIdentity { side, row: i + 1 });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdt_tabular::{load_prior_from_reader, load_raw_from_reader};

    fn prior_one_store() -> WideTable {
        load_prior_from_reader(
            "Elux ID,Dealer ID,Channel,Store_name,M1,M2\nS1,D1,Retail,Alpha,1,0\n".as_bytes(),
        )
        .unwrap()
    }

    fn raw(records: &str) -> WideTable {
        let input = format!("Elux ID,Dealer ID,Channel,Store_name,Model,Value\n{records}");
        load_raw_from_reader(input.as_bytes()).unwrap()
    }

    fn key(entity: &str) -> StoreKey {
        StoreKey::new(entity, "D1", "Retail", "Alpha")
    }

    #[test]
    fn observed_zero_overwrites_and_absent_model_carries_forward() {
        // S1 reports M1=0 and M3=1 this week; M2 is not a raw column.
        let prior = prior_one_store();
        let raw = raw("S1,D1,Retail,Alpha,M1,0\nS1,D1,Retail,Alpha,M3,1\n");
        let rec = merge(&prior, &raw).unwrap();

        let row = rec.updated.get(&key("S1")).unwrap();
        let value = |m: &str| row.values[rec.updated.model_position(m).unwrap()];
        assert_eq!(value("M1"), 0);
        assert_eq!(value("M2"), 0);
        assert_eq!(value("M3"), 1);

        assert_eq!(rec.changes.len(), 2);
        assert_eq!(rec.changes[0].model, "M1");
        assert_eq!(rec.changes[0].previous, 1);
        assert_eq!(rec.changes[0].current, 0);
        assert_eq!(rec.changes[0].change_type, ChangeKind::Decrease);
        assert_eq!(rec.changes[1].model, "M3");
        assert_eq!(rec.changes[1].previous, 0);
        assert_eq!(rec.changes[1].current, 1);
        assert_eq!(rec.changes[1].change_type, ChangeKind::Increase);
    }

    #[test]
    fn store_absent_from_raw_is_unchanged_with_no_records() {
        let prior = prior_one_store();
        let raw = raw("S9,D9,Online,Beta,M1,5\n");
        let rec = merge(&prior, &raw).unwrap();

        let row = rec.updated.get(&key("S1")).unwrap();
        assert_eq!(row.values[rec.updated.model_position("M1").unwrap()], 1);
        assert!(rec.changes.iter().all(|c| c.store.entity_id != "S1"));
    }

    #[test]
    fn new_store_defaults_prior_to_zero() {
        let prior = prior_one_store();
        let raw = raw("S2,D2,Online,Beta,M1,4\n");
        let rec = merge(&prior, &raw).unwrap();

        let new_row = rec
            .updated
            .get(&StoreKey::new("S2", "D2", "Online", "Beta"))
            .unwrap();
        assert_eq!(new_row.values[rec.updated.model_position("M1").unwrap()], 4);

        let change = rec
            .changes
            .iter()
            .find(|c| c.store.entity_id == "S2")
            .unwrap();
        assert_eq!(change.previous, 0);
        assert_eq!(change.current, 4);
        assert_eq!(change.change_type, ChangeKind::Increase);
    }

    #[test]
    fn prior_only_model_never_produces_changes() {
        let prior = load_prior_from_reader(
            "Elux ID,Dealer ID,Channel,Store_name,M1,Legacy\nS1,D1,Retail,Alpha,1,9\n".as_bytes(),
        )
        .unwrap();
        let raw = raw("S1,D1,Retail,Alpha,M1,1\n");
        let rec = merge(&prior, &raw).unwrap();

        let row = rec.updated.get(&key("S1")).unwrap();
        assert_eq!(row.values[rec.updated.model_position("Legacy").unwrap()], 9);
        assert!(rec.changes.is_empty());
    }

    #[test]
    fn zero_diff_pairs_are_never_materialized() {
        let prior = prior_one_store();
        let raw = raw("S1,D1,Retail,Alpha,M1,1\nS1,D1,Retail,Alpha,M2,0\n");
        let rec = merge(&prior, &raw).unwrap();
        assert!(rec.changes.is_empty());
    }

    #[test]
    fn raw_only_models_extend_the_updated_schema() {
        let prior = prior_one_store();
        let raw = raw("S1,D1,Retail,Alpha,M3,2\n");
        let rec = merge(&prior, &raw).unwrap();
        assert_eq!(rec.updated.models(), ["M1", "M2", "M3"]);
    }

    #[test]
    fn blank_identity_key_is_fatal() {
        let prior = load_prior_from_reader(
            "Elux ID,Dealer ID,Channel,Store_name,M1\n,,,,3\n".as_bytes(),
        )
        .unwrap();
        let raw = raw("S1,D1,Retail,Alpha,M1,1\n");
        let err = merge(&prior, &raw).unwrap_err();
        assert!(matches!(
            err,
            MergeError::BlankIdentity { side: "prior", row: 1 }
        ));
    }

    #[test]
    fn merge_is_deterministic_across_runs() {
        let prior = prior_one_store();
        let raw = raw("S2,D2,Online,Beta,M9,1\nS1,D1,Retail,Alpha,M1,2\n");
        let first = merge(&prior, &raw).unwrap();
        let second = merge(&prior, &raw).unwrap();
        assert_eq!(first.updated, second.updated);
        assert_eq!(first.changes, second.changes);
    }
}
