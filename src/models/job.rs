use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle stage of an image job.
///
/// Jobs only move forward: `pending -> captioned -> done`, and either
/// non-terminal stage may drop to `failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Captioned,
    Done,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Captioned,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether a record currently in `self` may move to `next`.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Captioned)
                | (JobStatus::Captioned, JobStatus::Done)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Captioned, JobStatus::Failed)
        )
    }

    /// Statuses from which `self` can be reached in one step.
    pub fn predecessors(self) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_advance_to(self))
            .collect()
    }
}

/// An image job as persisted in the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub email: String,
    pub source_image_ref: String,
    pub caption: Option<String>,
    pub result_image_ref: Option<String>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the submission path when creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub email: String,
    pub source_image_ref: String,
}

/// A forward step of the job state machine together with the fields it sets.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Captioned { caption: String },
    Done { result_image_ref: String },
    Failed { error: String },
}

impl Transition {
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Captioned { .. } => JobStatus::Captioned,
            Transition::Done { .. } => JobStatus::Done,
            Transition::Failed { .. } => JobStatus::Failed,
        }
    }

    /// Apply to an in-memory record. Returns false and leaves the job untouched
    /// when the transition is not legal from its current status.
    pub fn apply_to(&self, job: &mut Job) -> bool {
        if !job.status.can_advance_to(self.target()) {
            return false;
        }

        match self {
            Transition::Captioned { caption } => {
                job.caption = Some(caption.clone());
            }
            Transition::Done { result_image_ref } => {
                job.result_image_ref = Some(result_image_ref.clone());
            }
            Transition::Failed { error } => {
                job.caption = None;
                job.result_image_ref = None;
                job.error = Some(error.clone());
            }
        }
        job.status = self.target();
        job.updated_at = Utc::now();
        true
    }
}
