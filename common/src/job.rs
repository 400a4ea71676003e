//! The Job entity and its state machine, shared by the submission and
//! retrieval workers and the ingestion endpoint.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseJobStatusError;

/// All statuses a Job can hold over its lifetime. See `store::JobStore` for
/// the operations that move a Job between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "job_status")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    JobExpired,
    RunningPlot,
    FailedSubmissionToUpload,
    RetryUpload,
    Completed,
    FailedUpload,
    FailedSubmission,
    FailedPlot,
    WebhookExpired,
}

impl JobStatus {
    /// Terminal statuses are never mutated again by either worker.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::FailedUpload
                | JobStatus::FailedSubmission
                | JobStatus::FailedPlot
                | JobStatus::WebhookExpired
        )
    }

    /// Statuses `find_submittable` returns to the submission worker.
    pub fn is_submittable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::JobExpired)
    }

    /// Statuses `find_active` returns to the retrieval worker.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Running
                | JobStatus::RunningPlot
                | JobStatus::RetryUpload
                | JobStatus::FailedSubmissionToUpload
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::JobExpired => "job_expired",
            JobStatus::RunningPlot => "running_plot",
            JobStatus::FailedSubmissionToUpload => "failed_submission_to_upload",
            JobStatus::RetryUpload => "retry_upload",
            JobStatus::Completed => "completed",
            JobStatus::FailedUpload => "failed_upload",
            JobStatus::FailedSubmission => "failed_submission",
            JobStatus::FailedPlot => "failed_plot",
            JobStatus::WebhookExpired => "webhook_expired",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "job_expired" => Ok(JobStatus::JobExpired),
            "running_plot" => Ok(JobStatus::RunningPlot),
            "failed_submission_to_upload" => Ok(JobStatus::FailedSubmissionToUpload),
            "retry_upload" => Ok(JobStatus::RetryUpload),
            "completed" => Ok(JobStatus::Completed),
            "failed_upload" => Ok(JobStatus::FailedUpload),
            "failed_submission" => Ok(JobStatus::FailedSubmission),
            "failed_plot" => Ok(JobStatus::FailedPlot),
            "webhook_expired" => Ok(JobStatus::WebhookExpired),
            invalid => Err(ParseJobStatusError(invalid.to_owned())),
        }
    }
}

/// The HTTP method the caller asked the callback to be delivered with.
/// Stored as the caller's own string rather than a closed set of variants:
/// the only behaviorally distinguished value is `POST`, everything else is
/// a pass-through the callback client never contacts (see
/// `callback::deliver`), so there's nothing to validate against an
/// allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct CallbackMethod(String);

impl CallbackMethod {
    pub fn new(method: impl Into<String>) -> Self {
        Self(method.into())
    }

    pub fn post() -> Self {
        Self::new("POST")
    }

    pub fn is_post(&self) -> bool {
        self.0 == "POST"
    }
}

impl fmt::Display for CallbackMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Analysis parameters supplied by the caller at ingestion time and
/// forwarded to the cluster adapter unchanged. Only ever persisted as part
/// of `Job::inputs`, which wraps the whole `JobInputs` in `sqlx::types::Json`
/// — so this doesn't need its own `sqlx::Type` impl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParameters {
    pub source: String,
    pub tmin: f64,
    pub tmax: f64,
    pub dt: f64,
}

/// Everything the cluster adapter needs in order to submit a batch job,
/// minus the state-machine bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInputs {
    pub analysis_parameters: AnalysisParameters,
    /// Gzip-compressed photometry CSV.
    pub photometry: Vec<u8>,
    /// Gzip-compressed redshift CSV.
    pub redshift: Vec<u8>,
}

/// The central entity: one per incoming analysis request.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
    pub invalid_after: DateTime<Utc>,
    pub callback_url: String,
    pub callback_method: CallbackMethod,
    pub inputs: sqlx::types::Json<JobInputs>,
    pub status: JobStatus,
    pub job_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub nb_upload_failures: i32,
    pub upload_error: Option<String>,
    pub error: Option<String>,
    pub warning: Option<String>,
}

impl Job {
    /// The label used as the remote batch job's stable name. MUST be stable
    /// across re-submissions of the same Job (e.g. after `job_expired`) so
    /// that artifacts produced by an earlier attempt remain addressable.
    pub fn label(&self) -> String {
        format!("{}_{}", self.resource_id, self.created_at.timestamp())
    }
}

/// A request to create a new Job, produced by the ingestion validator.
pub struct NewJob {
    pub id: Uuid,
    pub resource_id: String,
    pub invalid_after: DateTime<Utc>,
    pub callback_url: String,
    pub callback_method: CallbackMethod,
    pub inputs: JobInputs,
}

impl NewJob {
    pub fn new(
        resource_id: String,
        invalid_after: DateTime<Utc>,
        callback_url: String,
        callback_method: CallbackMethod,
        inputs: JobInputs,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            resource_id,
            invalid_after,
            callback_url,
            callback_method,
            inputs,
        }
    }
}

/// A partial update applied atomically to a single Job row. Unset fields
/// leave the corresponding column untouched, mirroring the partial-update
/// shape used elsewhere in this codebase for job queues.
#[derive(Debug, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub job_id: Option<Option<String>>,
    pub submitted_at: Option<Option<DateTime<Utc>>>,
    pub nb_upload_failures: Option<i32>,
    pub upload_error: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub warning: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn job_id(mut self, job_id: Option<String>) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn submitted_at(mut self, submitted_at: Option<DateTime<Utc>>) -> Self {
        self.submitted_at = Some(submitted_at);
        self
    }

    pub fn nb_upload_failures(mut self, n: i32) -> Self {
        self.nb_upload_failures = Some(n);
        self
    }

    pub fn upload_error(mut self, e: Option<String>) -> Self {
        self.upload_error = Some(e);
        self
    }

    pub fn error(mut self, e: Option<String>) -> Self {
        self.error = Some(e);
        self
    }

    pub fn warning(mut self, w: Option<String>) -> Self {
        self.warning = Some(w);
        self
    }
}
