//! End-to-end weekly run: load both tables, merge, aggregate, persist.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rdt_core::ContactLookup;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::aggregate::{self, AggregateOptions, AggregationError};
use crate::reconcile::{self, MergeError};
use crate::report::{self, ArtifactEntry};

const DEFAULT_REPORTS_DIR: &str = "./reports";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] rdt_tabular::LoadError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Aggregate(#[from] AggregationError),
    #[error("{} artifact(s) failed to write", .summary.failed_artifacts.len())]
    PartialWrite { summary: Box<RunSummary> },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub reports_dir: PathBuf,
    pub options: AggregateOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            options: AggregateOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads `RDT_REPORTS_DIR`, `RDT_TOP_INCREASES` and
    /// `RDT_TOP_DECREASES`, falling back to defaults when unset or
    /// unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = env::var("RDT_REPORTS_DIR") {
            if !dir.trim().is_empty() {
                config.reports_dir = PathBuf::from(dir);
            }
        }
        if let Some(n) = env_usize("RDT_TOP_INCREASES") {
            config.options.top_increases = n;
        }
        if let Some(n) = env_usize("RDT_TOP_DECREASES") {
            config.options.top_decreases = n;
        }
        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// One week's inputs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub raw_path: PathBuf,
    pub prior_path: PathBuf,
    pub week: u32,
}

/// What a completed run produced, kept alongside the job record and
/// echoed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub week: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stores: usize,
    pub models_tracked: usize,
    pub models_increased: usize,
    pub models_decreased: usize,
    pub total_changes: usize,
    pub artifacts: Vec<ArtifactEntry>,
    pub failed_artifacts: Vec<String>,
}

pub struct Pipeline {
    config: PipelineConfig,
    contacts: Arc<dyn ContactLookup>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, contacts: Arc<dyn ContactLookup>) -> Self {
        Self { config, contacts }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one full week: both loads, the merge, aggregation, and the
    /// artifact writes. A partial artifact write surfaces as
    /// `PipelineError::PartialWrite` carrying the summary, so callers
    /// can still record what did land.
    pub fn run_once(&self, request: &RunRequest) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        info!(
            week = request.week,
            raw = %request.raw_path.display(),
            prior = %request.prior_path.display(),
            "starting weekly run"
        );

        let prior = rdt_tabular::load_prior(&request.prior_path)?;
        let raw = rdt_tabular::load_raw(&request.raw_path)?;
        let reconciliation = reconcile::merge(&prior, &raw)?;
        let summary = aggregate::aggregate_with(
            &reconciliation.changes,
            reconciliation.updated.models().len(),
            self.contacts.as_ref(),
            request.week,
            self.config.options,
        )?;
        let outcome = report::write_artifacts(
            &self.config.reports_dir,
            request.week,
            &reconciliation.updated,
            &summary,
        );

        let run = RunSummary {
            week: request.week,
            started_at,
            finished_at: Utc::now(),
            stores: reconciliation.updated.rows().len(),
            models_tracked: summary.total_models_tracked,
            models_increased: summary.models_increased,
            models_decreased: summary.models_decreased,
            total_changes: reconciliation.changes.len(),
            artifacts: outcome.written.clone(),
            failed_artifacts: outcome.failure_messages(),
        };

        if outcome.all_ok() {
            info!(week = run.week, changes = run.total_changes, "weekly run complete");
            Ok(run)
        } else {
            Err(PipelineError::PartialWrite {
                summary: Box::new(run),
            })
        }
    }
}
