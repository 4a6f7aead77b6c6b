//! In-process tracking for background runs.
//!
//! The registry is injected wherever runs are launched; callers hold an
//! `Arc<JobRegistry>` and poll records by id. Terminal states never
//! regress.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::pipeline::{Pipeline, PipelineError, RunRequest, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub week: u32,
    pub status: JobStatus,
    pub progress: u8,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    inner: Mutex<HashMap<Uuid, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, week: u32) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let record = JobRecord {
            id,
            week,
            status: JobStatus::Queued,
            progress: 0,
            submitted_at: now,
            updated_at: now,
            summary: None,
            error: None,
        };
        self.lock().insert(id, record);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.lock().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.lock().values().cloned().collect();
        records.sort_by_key(|r| r.submitted_at);
        records
    }

    pub fn mark_running(&self, id: Uuid, progress: u8) {
        self.update(id, |record| {
            record.status = JobStatus::Running;
            record.progress = progress;
        });
    }

    pub fn mark_completed(&self, id: Uuid, summary: RunSummary) {
        self.update(id, |record| {
            record.status = JobStatus::Completed;
            record.progress = 100;
            record.summary = Some(summary);
        });
    }

    pub fn mark_failed(&self, id: Uuid, message: String) {
        self.update(id, |record| {
            record.status = JobStatus::Failed;
            record.error = Some(message);
        });
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut JobRecord)) {
        let mut jobs = self.lock();
        if let Some(record) = jobs.get_mut(&id) {
            if record.status.is_terminal() {
                return;
            }
            apply(record);
            record.updated_at = Utc::now();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JobRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Launches one run on a background thread, tracked in `registry`.
/// Returns the job id immediately.
pub fn spawn_run(
    registry: Arc<JobRegistry>,
    pipeline: Arc<Pipeline>,
    request: RunRequest,
) -> Uuid {
    let id = registry.submit(request.week);
    thread::spawn(move || run_tracked(&registry, &pipeline, id, &request));
    id
}

/// Executes one run and records its lifecycle. Progress checkpoints:
/// 10 after launch, 100 on completion.
pub fn run_tracked(
    registry: &JobRegistry,
    pipeline: &Pipeline,
    id: Uuid,
    request: &RunRequest,
) {
    registry.mark_running(id, 10);
    match pipeline.run_once(request) {
        Ok(summary) => {
            info!(job = %id, week = request.week, "background run completed");
            registry.mark_completed(id, summary);
        }
        Err(PipelineError::PartialWrite { summary }) => {
            // Artifacts partially landed; keep the summary but flag the job.
            error!(job = %id, week = request.week, "background run wrote a partial artifact set");
            registry.update(id, |record| {
                record.status = JobStatus::Failed;
                record.summary = Some(*summary);
                record.error = Some("partial artifact write".to_string());
            });
        }
        Err(err) => {
            error!(job = %id, week = request.week, error = %err, "background run failed");
            registry.mark_failed(id, err.to_string());
        }
    }
}
