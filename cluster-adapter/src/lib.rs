//! The Cluster Adapter (C2): a narrow interface onto the remote batch
//! system. Only the interface and a stub implementation are shipped here —
//! the real SSH/SFTP transport is out of scope for this system, the same
//! way the original webhook-delivery component's retry loop was scoped out
//! of the callback client and into the worker.

pub mod error;
pub mod stub;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub use error::AdapterError;

/// Parameters exported to the cluster's batch job, named the way the
/// scheduler's submission script expects them.
#[derive(Debug, Clone)]
pub struct SubmitParameters {
    pub model: String,
    pub label: String,
    /// Earliest unmasked `mjd` in the photometry, used as the explosion
    /// time reference by the sampling job.
    pub tt: f64,
    /// Decompressed photometry CSV to materialize into the on-cluster data
    /// file before submission.
    pub photometry_csv: String,
    /// Decompressed redshift CSV, materialized alongside the photometry.
    pub redshift_csv: String,
    pub tmin: f64,
    pub tmax: f64,
    pub dt: f64,
    /// Set when re-submitting after `job_expired`: the batch job should
    /// resume from checkpoints and skip sampling.
    pub skip_sampling: bool,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
}

/// `None` means the job's artifacts are not present yet: this is not an
/// error, just "not ready".
pub type RetrieveOutcome = Option<Value>;

#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    async fn submit(&self, params: SubmitParameters) -> Result<SubmitOutcome, AdapterError>;
    async fn retrieve(&self, label: &str) -> Result<RetrieveOutcome, AdapterError>;
    /// MUST be idempotent on an id that no longer corresponds to a live job.
    async fn cancel(&self, job_id: &str) -> Result<bool, AdapterError>;
    /// Cheap reachability probe used by the `/health` endpoint.
    async fn healthy(&self) -> bool;
}
