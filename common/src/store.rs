//! The Job Store (C1): durable persistence of Job records, atomic status
//! transitions, and the Result rows used to bridge retrieval and delivery.
//!
//! `PgJobStore` is the production implementation, built the same way this
//! codebase's `pgqueue::PgQueue` is: hand-written SQL with `FOR UPDATE SKIP
//! LOCKED` rather than an ORM. `MemoryJobStore` is a test double used to
//! exercise the state machine deterministically without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{Job, JobPatch, NewJob};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> StoreResult<Job>;
    async fn get(&self, id: Uuid) -> StoreResult<Job>;
    async fn find_submittable(&self) -> StoreResult<Vec<Job>>;
    async fn find_active(&self) -> StoreResult<Vec<Job>>;
    async fn update_status(&self, id: Uuid, patch: JobPatch) -> StoreResult<Job>;
    async fn put_result(&self, analysis_id: Uuid, payload: serde_json::Value) -> StoreResult<()>;
    async fn get_result(&self, analysis_id: Uuid) -> StoreResult<Option<serde_json::Value>>;
    async fn delete_result(&self, analysis_id: Uuid) -> StoreResult<()>;
    /// Cheap reachability probe for the `/health` endpoint.
    async fn healthy(&self) -> bool;
}

/// PostgreSQL-backed Job Store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn new(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> StoreResult<Job> {
        let row: Job = sqlx::query_as(
            r#"
INSERT INTO analysis
    (id, resource_id, created_at, invalid_after, callback_url, callback_method,
     inputs, status, nb_upload_failures)
VALUES
    ($1, $2, NOW(), $3, $4, $5, $6, 'pending', 0)
RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.resource_id)
        .bind(job.invalid_after)
        .bind(&job.callback_url)
        .bind(job.callback_method)
        .bind(sqlx::types::Json(job.inputs))
        .fetch_one(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(row)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Job> {
        sqlx::query_as(r#"SELECT * FROM analysis WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_submittable(&self) -> StoreResult<Vec<Job>> {
        sqlx::query_as(
            r#"SELECT * FROM analysis WHERE status IN ('pending', 'job_expired') ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    async fn find_active(&self) -> StoreResult<Vec<Job>> {
        sqlx::query_as(
            r#"
SELECT * FROM analysis
WHERE status IN ('running', 'running_plot', 'retry_upload', 'failed_submission_to_upload')
ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    async fn update_status(&self, id: Uuid, patch: JobPatch) -> StoreResult<Job> {
        // Fetch-modify-write under the row lock. A single in-flight writer
        // per Job is guaranteed by partitioning on status (see §5 of the
        // design), so this is not subject to lost updates in practice.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        let current: Job = sqlx::query_as(r#"SELECT * FROM analysis WHERE id = $1 FOR UPDATE"#)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?
            .ok_or(StoreError::NotFound(id))?;

        let status = patch.status.unwrap_or(current.status);
        let job_id = patch.job_id.unwrap_or(current.job_id);
        let submitted_at = patch.submitted_at.unwrap_or(current.submitted_at);
        let nb_upload_failures = patch
            .nb_upload_failures
            .unwrap_or(current.nb_upload_failures);
        let upload_error = patch.upload_error.unwrap_or(current.upload_error);
        let error = patch.error.unwrap_or(current.error);
        let warning = patch.warning.unwrap_or(current.warning);

        let updated: Job = sqlx::query_as(
            r#"
UPDATE analysis
SET status = $2, job_id = $3, submitted_at = $4, nb_upload_failures = $5,
    upload_error = $6, error = $7, warning = $8
WHERE id = $1
RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(&job_id)
        .bind(submitted_at)
        .bind(nb_upload_failures)
        .bind(&upload_error)
        .bind(&error)
        .bind(&warning)
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        tx.commit()
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(updated)
    }

    async fn put_result(&self, analysis_id: Uuid, payload: serde_json::Value) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO results (analysis_id, payload)
VALUES ($1, $2)
ON CONFLICT (analysis_id) DO UPDATE SET payload = EXCLUDED.payload
            "#,
        )
        .bind(analysis_id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn get_result(&self, analysis_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as(r#"SELECT payload FROM results WHERE analysis_id = $1"#)
                .bind(analysis_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|error| StoreError::QueryError {
                    command: "SELECT".to_owned(),
                    error,
                })?;

        Ok(row.map(|(payload,)| payload))
    }

    async fn delete_result(&self, analysis_id: Uuid) -> StoreResult<()> {
        sqlx::query(r#"DELETE FROM results WHERE analysis_id = $1"#)
            .bind(analysis_id)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// An in-memory `JobStore` used by unit tests to exercise the state machine
/// without a database. Not used in production binaries.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    results: Mutex<HashMap<Uuid, serde_json::Value>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateId(job.id));
        }
        let created = Job {
            id: job.id,
            resource_id: job.resource_id,
            created_at: chrono::Utc::now(),
            invalid_after: job.invalid_after,
            callback_url: job.callback_url,
            callback_method: job.callback_method,
            inputs: sqlx::types::Json(job.inputs),
            status: crate::job::JobStatus::Pending,
            job_id: None,
            submitted_at: None,
            nb_upload_failures: 0,
            upload_error: None,
            error: None,
            warning: None,
        };
        jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Job> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_submittable(&self) -> StoreResult<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status.is_submittable())
            .cloned()
            .collect())
    }

    async fn find_active(&self) -> StoreResult<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status.is_active())
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: Uuid, patch: JobPatch) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(job_id) = patch.job_id {
            job.job_id = job_id;
        }
        if let Some(submitted_at) = patch.submitted_at {
            job.submitted_at = submitted_at;
        }
        if let Some(n) = patch.nb_upload_failures {
            job.nb_upload_failures = n;
        }
        if let Some(upload_error) = patch.upload_error {
            job.upload_error = upload_error;
        }
        if let Some(error) = patch.error {
            job.error = error;
        }
        if let Some(warning) = patch.warning {
            job.warning = warning;
        }

        Ok(job.clone())
    }

    async fn put_result(&self, analysis_id: Uuid, payload: serde_json::Value) -> StoreResult<()> {
        self.results.lock().unwrap().insert(analysis_id, payload);
        Ok(())
    }

    async fn get_result(&self, analysis_id: Uuid) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.results.lock().unwrap().get(&analysis_id).cloned())
    }

    async fn delete_result(&self, analysis_id: Uuid) -> StoreResult<()> {
        self.results.lock().unwrap().remove(&analysis_id);
        Ok(())
    }

    async fn healthy(&self) -> bool {
        true
    }
}
