//! CSV loading and pivoting for prior reports and raw observation logs.
//!
//! Two input shapes exist. The prior cumulative report is wide: the
//! first four columns are the store identity key, every remaining
//! column is a model. The raw observation log is long: identity key
//! columns plus `Model` and `Value`, pivoted here into the same wide
//! shape with duplicate (store, model) rows summed.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use rdt_core::StoreKey;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "rdt-tabular";

/// Number of leading identity-key columns in every tabular input.
pub const ID_COLUMNS: usize = 4;

const MODEL_COLUMN: &str = "Model";
const VALUE_COLUMN: &str = "Value";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("opening {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("header has {found} columns, need at least {need}")]
    TooFewColumns { found: usize, need: usize },
    #[error("missing required column {name:?}")]
    MissingColumn { name: &'static str },
    #[error("row {row}, column {column:?}: cannot parse {value:?} as a count")]
    BadNumber {
        row: usize,
        column: String,
        value: String,
    },
}

/// One row of a wide table: a store key plus one value per model,
/// aligned with the owning table's model list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideRow {
    pub key: StoreKey,
    pub values: Vec<i64>,
}

/// Normalized wide form shared by the prior report, the pivoted raw
/// snapshot, and the updated report. Model and row order is first-seen
/// and deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideTable {
    id_headers: Vec<String>,
    models: Vec<String>,
    rows: Vec<WideRow>,
    index: HashMap<StoreKey, usize>,
}

impl WideTable {
    pub fn with_columns(id_headers: Vec<String>, models: Vec<String>) -> Self {
        Self {
            id_headers,
            models,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn id_headers(&self) -> &[String] {
        &self.id_headers
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn rows(&self) -> &[WideRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn model_position(&self, model: &str) -> Option<usize> {
        self.models.iter().position(|m| m == model)
    }

    pub fn get(&self, key: &StoreKey) -> Option<&WideRow> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    pub fn contains_key(&self, key: &StoreKey) -> bool {
        self.index.contains_key(key)
    }

    /// Appends a row whose values are already aligned to `models()`.
    /// A duplicate key replaces the earlier row's values in place.
    pub fn push_row(&mut self, key: StoreKey, mut values: Vec<i64>) {
        values.resize(self.models.len(), 0);
        match self.index.get(&key) {
            Some(&i) => self.rows[i].values = values,
            None => {
                self.index.insert(key.clone(), self.rows.len());
                self.rows.push(WideRow { key, values });
            }
        }
    }

    /// Adds one long-form observation, summing into any existing cell.
    /// Unseen models extend every row with a 0 cell first.
    pub fn add_observation(&mut self, key: StoreKey, model: &str, value: i64) {
        let model_pos = match self.model_position(model) {
            Some(pos) => pos,
            None => {
                self.models.push(model.to_string());
                for row in &mut self.rows {
                    row.values.push(0);
                }
                self.models.len() - 1
            }
        };
        let row_pos = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.index.insert(key.clone(), self.rows.len());
                self.rows.push(WideRow {
                    key,
                    values: vec![0; self.models.len()],
                });
                self.rows.len() - 1
            }
        };
        self.rows[row_pos].values[model_pos] += value;
    }

    /// Serializes the table back to the prior-report CSV schema.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        let header: Vec<&str> = self
            .id_headers
            .iter()
            .chain(self.models.iter())
            .map(String::as_str)
            .collect();
        wtr.write_record(&header)?;
        for row in &self.rows {
            let mut record = vec![
                row.key.entity_id.clone(),
                row.key.dealer_id.clone(),
                row.key.channel.clone(),
                row.key.store_name.clone(),
            ];
            record.extend(row.values.iter().map(i64::to_string));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Loads the prior cumulative report. Identity columns stay strings;
/// model cells are coerced to counts with the no-display sentinel
/// normalized to 0.
pub fn load_prior(path: impl AsRef<Path>) -> Result<WideTable, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let table = load_prior_from_reader(file)?;
    info!(
        path = %path.display(),
        rows = table.rows().len(),
        models = table.models().len(),
        "loaded prior report"
    );
    Ok(table)
}

pub fn load_prior_from_reader<R: Read>(reader: R) -> Result<WideTable, LoadError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    if headers.len() < ID_COLUMNS {
        return Err(LoadError::TooFewColumns {
            found: headers.len(),
            need: ID_COLUMNS,
        });
    }

    let id_headers: Vec<String> = headers.iter().take(ID_COLUMNS).map(str::to_string).collect();
    let models: Vec<String> = headers.iter().skip(ID_COLUMNS).map(str::to_string).collect();
    let mut table = WideTable::with_columns(id_headers, models);

    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let row = line + 2;
        let key = key_from_record(&record);
        let mut values = Vec::with_capacity(table.models().len());
        for (offset, cell) in record.iter().skip(ID_COLUMNS).enumerate() {
            values.push(parse_count(cell, row, &headers[ID_COLUMNS + offset])?);
        }
        table.push_row(key, values);
    }
    Ok(table)
}

/// Loads the raw weekly observation log and pivots it to wide form.
/// Duplicate (store, model) rows sum; unrecorded combinations fill 0
/// within this table only.
pub fn load_raw(path: impl AsRef<Path>) -> Result<WideTable, LoadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| LoadError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let table = load_raw_from_reader(file)?;
    info!(
        path = %path.display(),
        rows = table.rows().len(),
        models = table.models().len(),
        "loaded and pivoted raw observations"
    );
    Ok(table)
}

pub fn load_raw_from_reader<R: Read>(reader: R) -> Result<WideTable, LoadError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    if headers.len() < ID_COLUMNS + 2 {
        return Err(LoadError::TooFewColumns {
            found: headers.len(),
            need: ID_COLUMNS + 2,
        });
    }

    let model_pos = find_column(&headers, MODEL_COLUMN)?;
    let value_pos = find_column(&headers, VALUE_COLUMN)?;
    let id_headers: Vec<String> = headers.iter().take(ID_COLUMNS).map(str::to_string).collect();
    let mut table = WideTable::with_columns(id_headers, Vec::new());

    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let row = line + 2;
        let key = key_from_record(&record);
        let model = record.get(model_pos).unwrap_or_default().trim().to_string();
        let raw_value = record.get(value_pos).unwrap_or_default();
        let value = raw_value
            .trim()
            .parse::<i64>()
            .map_err(|_| LoadError::BadNumber {
                row,
                column: VALUE_COLUMN.to_string(),
                value: raw_value.to_string(),
            })?;
        table.add_observation(key, &model, value);
    }
    Ok(table)
}

fn key_from_record(record: &csv::StringRecord) -> StoreKey {
    StoreKey::new(
        record.get(0).unwrap_or_default(),
        record.get(1).unwrap_or_default(),
        record.get(2).unwrap_or_default(),
        record.get(3).unwrap_or_default(),
    )
}

fn find_column(headers: &csv::StringRecord, name: &'static str) -> Result<usize, LoadError> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or(LoadError::MissingColumn { name })
}

/// Coerces a report cell to a count. The upstream export writes a
/// dash placeholder (`" -   "` and variants) for "no display"; that
/// and empty cells normalize to 0.
fn parse_count(cell: &str, row: usize, column: &str) -> Result<i64, LoadError> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '-') {
        return Ok(0);
    }
    trimmed.parse::<i64>().map_err(|_| LoadError::BadNumber {
        row,
        column: column.to_string(),
        value: cell.to_string(),
    })
}
