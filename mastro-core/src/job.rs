use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::AudioAnalysis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Populated once, when a job completes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub input: AudioAnalysis,
    pub output: AudioAnalysis,
    pub gain_db: f64,
    pub voice_tag_added: bool,
    pub preset: String,
    pub master_file: String,
    pub distribution_file: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress_percent: 0,
            stage: "queued".to_string(),
            message: "waiting for pipeline".to_string(),
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// The only mutable state shared across concurrent job tasks. Pipeline code
/// never touches the map directly; everything goes through this narrow
/// create/get/update/remove interface.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Job {
        let job = Job::new(Uuid::new_v4());
        let mut jobs = self.inner.write().unwrap();
        jobs.insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        let jobs = self.inner.read().unwrap();
        jobs.get(&id).cloned()
    }

    /// Applies a mutation unless the job has already reached a terminal
    /// state; complete and failed jobs are immutable. Returns whether the
    /// mutation ran.
    pub fn update<F>(&self, id: Uuid, mutate: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.inner.write().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                mutate(job);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: Uuid) {
        let mut jobs = self.inner.write().unwrap();
        jobs.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
