use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::{Job, JobStatus, NewJob, Transition};

/// In-process job store for tests and local runs without PostgreSQL.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remove a record behind the service's back.
    pub async fn remove(&self, id: Uuid) -> Option<Job> {
        self.jobs.write().await.remove(&id)
    }

    /// Snapshot of every record, in no particular order.
    pub async fn all(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        self.check_available()?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            email: job.email,
            source_image_ref: job.source_image_ref,
            caption: None,
            result_image_ref: None,
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn advance(&self, id: Uuid, transition: Transition) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(match self.jobs.write().await.get_mut(&id) {
            Some(job) => transition.apply_to(job),
            None => false,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
