//! Weekly reconciliation pipeline: merge, aggregate, persist.

pub mod aggregate;
pub mod jobs;
pub mod pipeline;
pub mod reconcile;
pub mod report;

pub const CRATE_NAME: &str = "rdt-engine";

pub use pipeline::{Pipeline, PipelineConfig, PipelineError, RunRequest, RunSummary};
