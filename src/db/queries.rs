use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::{Job, JobStatus, NewJob, Transition};

const JOB_COLUMNS: &str = "id, email, source_image_ref, caption, result_image_ref, status, error, created_at, updated_at";

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|_| StoreError::Corrupt {
        id,
        reason: format!("unknown status '{}'", status_str),
    })?;

    Ok(Job {
        id,
        email: row.try_get("email")?,
        source_image_ref: row.try_get("source_image_ref")?,
        caption: row.try_get("caption")?,
        result_image_ref: row.try_get("result_image_ref")?,
        status,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn status_list(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}

#[async_trait]
impl JobStore for PgJobStore {
    /// Insert a new job in `pending` state; the database assigns the id.
    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO image_jobs (email, source_image_ref, status)
            VALUES ($1, $2, 'pending')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&job.email)
        .bind(&job.source_image_ref)
        .fetch_one(&self.pool)
        .await?;

        job_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM image_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Conditionally apply a transition. The `status = ANY(...)` guard makes the
    /// update a no-op when another writer already moved the record on.
    async fn advance(&self, id: Uuid, transition: Transition) -> Result<bool, StoreError> {
        let target = transition.target();
        let allowed = status_list(&target.predecessors());

        let result = match &transition {
            Transition::Captioned { caption } => {
                sqlx::query(
                    r#"
                    UPDATE image_jobs
                    SET status = $1, caption = $2, updated_at = NOW()
                    WHERE id = $3 AND status = ANY($4)
                    "#,
                )
                .bind(target.to_string())
                .bind(caption)
                .bind(id)
                .bind(&allowed)
                .execute(&self.pool)
                .await?
            }
            Transition::Done { result_image_ref } => {
                sqlx::query(
                    r#"
                    UPDATE image_jobs
                    SET status = $1, result_image_ref = $2, updated_at = NOW()
                    WHERE id = $3 AND status = ANY($4)
                    "#,
                )
                .bind(target.to_string())
                .bind(result_image_ref)
                .bind(id)
                .bind(&allowed)
                .execute(&self.pool)
                .await?
            }
            Transition::Failed { error } => {
                sqlx::query(
                    r#"
                    UPDATE image_jobs
                    SET status = $1, caption = NULL, result_image_ref = NULL,
                        error = $2, updated_at = NOW()
                    WHERE id = $3 AND status = ANY($4)
                    "#,
                )
                .bind(target.to_string())
                .bind(error)
                .bind(id)
                .bind(&allowed)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
