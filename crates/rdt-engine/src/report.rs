//! Persists one run's artifacts: the updated report, the model-level
//! increases table, the store-level decreases detail, the alert
//! summary document, and a checksummed manifest over all of them.
//!
//! Writes are best-effort per artifact: a failure is recorded without
//! rolling back siblings, and every write is an idempotent overwrite.

use std::fs;
use std::path::{Path, PathBuf};

use rdt_core::{AlertSummary, ChangeRecord, ModelSummary};
use rdt_tabular::WideTable;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding {name}: {source}")]
    Csv {
        name: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("serializing {name}: {source}")]
    Json {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Serialize)]
struct ArtifactManifest<'a> {
    schema_version: u32,
    week: u32,
    files: &'a [ArtifactEntry],
}

/// Per-artifact outcome of one write pass.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub written: Vec<ArtifactEntry>,
    pub failures: Vec<(String, WriteError)>,
}

impl WriteOutcome {
    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn artifact_paths(&self) -> Vec<String> {
        self.written.iter().map(|a| a.path.clone()).collect()
    }

    pub fn failure_messages(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|(name, err)| format!("{name}: {err}"))
            .collect()
    }
}

pub fn updated_report_filename(week: u32) -> String {
    format!("report-week-{week}.csv")
}

pub fn alert_summary_filename(week: u32) -> String {
    format!("alerts-week-{week}.json")
}

/// Writes all artifacts for one run into `dir`, attempting every
/// artifact even after a failure.
pub fn write_artifacts(
    dir: &Path,
    week: u32,
    updated: &WideTable,
    summary: &AlertSummary,
) -> WriteOutcome {
    let mut outcome = WriteOutcome::default();

    if let Err(source) = fs::create_dir_all(dir) {
        outcome.failures.push((
            "reports directory".to_string(),
            WriteError::Io {
                path: dir.display().to_string(),
                source,
            },
        ));
        return outcome;
    }

    let artifacts: Vec<(String, Result<Vec<u8>, WriteError>)> = vec![
        (updated_report_filename(week), encode_updated_report(updated)),
        (
            format!("increases-week-{week}.csv"),
            encode_model_table(&summary.increases),
        ),
        (
            format!("decreases-week-{week}.csv"),
            encode_decrease_detail(summary),
        ),
        (alert_summary_filename(week), encode_alert_summary(summary)),
    ];

    for (name, encoded) in artifacts {
        let result = encoded.and_then(|bytes| persist(dir, &name, &bytes));
        match result {
            Ok(entry) => outcome.written.push(entry),
            Err(err) => {
                warn!(artifact = %name, error = %err, "artifact write failed");
                outcome.failures.push((name, err));
            }
        }
    }

    // Manifest covers whatever actually landed on disk.
    let manifest_name = format!("manifest-week-{week}.json");
    let manifest = ArtifactManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        week,
        files: &outcome.written,
    };
    let manifest_result = serde_json::to_vec_pretty(&manifest)
        .map_err(|source| WriteError::Json {
            name: "manifest",
            source,
        })
        .and_then(|bytes| persist(dir, &manifest_name, &bytes));
    match manifest_result {
        Ok(entry) => outcome.written.push(entry),
        Err(err) => {
            warn!(artifact = %manifest_name, error = %err, "artifact write failed");
            outcome.failures.push((manifest_name, err));
        }
    }

    info!(
        week,
        written = outcome.written.len(),
        failed = outcome.failures.len(),
        dir = %dir.display(),
        "persisted weekly artifacts"
    );
    outcome
}

fn persist(dir: &Path, name: &str, bytes: &[u8]) -> Result<ArtifactEntry, WriteError> {
    let path: PathBuf = dir.join(name);
    fs::write(&path, bytes).map_err(|source| WriteError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(ArtifactEntry {
        name: name.to_string(),
        path: path.display().to_string(),
        sha256: sha256_hex(bytes),
        bytes: bytes.len() as u64,
    })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn encode_updated_report(updated: &WideTable) -> Result<Vec<u8>, WriteError> {
    let mut buf = Vec::new();
    updated.write_csv(&mut buf).map_err(|source| WriteError::Csv {
        name: "updated report",
        source,
    })?;
    Ok(buf)
}

fn encode_model_table(rows: &[ModelSummary]) -> Result<Vec<u8>, WriteError> {
    let mut buf = Vec::new();
    let encode = |buf: &mut Vec<u8>| -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(buf);
        wtr.write_record(["Model", "Previous", "Current", "Difference"])?;
        for row in rows {
            wtr.write_record([
                row.model.as_str(),
                &row.previous.to_string(),
                &row.current.to_string(),
                &row.difference.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    };
    encode(&mut buf).map_err(|source| WriteError::Csv {
        name: "model table",
        source,
    })?;
    Ok(buf)
}

/// Store-level decrease rows from the full change set, not the
/// model-level summary.
fn encode_decrease_detail(summary: &AlertSummary) -> Result<Vec<u8>, WriteError> {
    let mut buf = Vec::new();
    let encode = |buf: &mut Vec<u8>| -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(buf);
        wtr.write_record([
            "Entity ID",
            "Dealer ID",
            "Channel",
            "Store Name",
            "Model",
            "Previous",
            "Current",
            "Difference",
        ])?;
        for change in summary.decrease_records() {
            write_change_row(&mut wtr, change)?;
        }
        wtr.flush()?;
        Ok(())
    };
    encode(&mut buf).map_err(|source| WriteError::Csv {
        name: "decreases detail",
        source,
    })?;
    Ok(buf)
}

fn write_change_row<W: std::io::Write>(
    wtr: &mut csv::Writer<W>,
    change: &ChangeRecord,
) -> Result<(), csv::Error> {
    wtr.write_record([
        change.store.entity_id.as_str(),
        change.store.dealer_id.as_str(),
        change.store.channel.as_str(),
        change.store.store_name.as_str(),
        change.model.as_str(),
        &change.previous.to_string(),
        &change.current.to_string(),
        &change.difference.to_string(),
    ])
}

fn encode_alert_summary(summary: &AlertSummary) -> Result<Vec<u8>, WriteError> {
    serde_json::to_vec_pretty(summary).map_err(|source| WriteError::Json {
        name: "alert summary",
        source,
    })
}
