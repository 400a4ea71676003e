//! A stub `ClusterAdapter` used by the workers' own tests and by anyone
//! running this service without a live cluster to talk to. It has no
//! notion of a real scheduler: jobs "complete" once `retrieve` has been
//! polled `ready_after_polls` times for the same label.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::{AdapterError, ClusterAdapter, RetrieveOutcome, SubmitOutcome, SubmitParameters};

struct TrackedJob {
    polls: u32,
    cancelled: bool,
}

pub struct StubClusterAdapter {
    ready_after_polls: u32,
    jobs: Mutex<HashMap<String, TrackedJob>>,
}

impl StubClusterAdapter {
    pub fn new(ready_after_polls: u32) -> Self {
        Self {
            ready_after_polls,
            jobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for StubClusterAdapter {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ClusterAdapter for StubClusterAdapter {
    async fn submit(&self, params: SubmitParameters) -> Result<SubmitOutcome, AdapterError> {
        self.jobs.lock().unwrap().insert(
            params.label.clone(),
            TrackedJob {
                polls: 0,
                cancelled: false,
            },
        );

        Ok(SubmitOutcome {
            job_id: format!("stub-{}", params.label),
            submitted_at: Utc::now(),
        })
    }

    async fn retrieve(&self, label: &str) -> Result<RetrieveOutcome, AdapterError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(label)
            .ok_or_else(|| AdapterError::Retrieve {
                label: label.to_owned(),
                reason: "unknown label".to_owned(),
            })?;

        if job.cancelled {
            return Ok(None);
        }

        job.polls += 1;
        if job.polls < self.ready_after_polls {
            return Ok(None);
        }

        Ok(Some(json!({
            "status": "success",
            "message": "Good results with log Bayes factor=3.2",
            "analysis": {
                "inference_data": {"format": "netcdf4", "data": "stub-data"},
                "plots": [{"format": "png", "data": "stub-plot"}],
                "results": {"format": "joblib", "data": "stub-results"},
            }
        })))
    }

    async fn cancel(&self, job_id: &str) -> Result<bool, AdapterError> {
        let label = job_id.strip_prefix("stub-").unwrap_or(job_id);
        if let Some(job) = self.jobs.lock().unwrap().get_mut(label) {
            job.cancelled = true;
        }
        Ok(true)
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(label: &str) -> SubmitParameters {
        SubmitParameters {
            model: "nugent-hyper".to_owned(),
            label: label.to_owned(),
            tt: 59000.0,
            photometry_csv: "mjd,filter,mag,magerr\n59000.0,ps1__g,20.1,0.05\n".to_owned(),
            redshift_csv: "z\n0.05\n".to_owned(),
            tmin: 0.0,
            tmax: 10.0,
            dt: 0.1,
            skip_sampling: false,
        }
    }

    #[tokio::test]
    async fn retrieve_is_not_ready_until_polled_enough() {
        let adapter = StubClusterAdapter::new(2);
        let outcome = adapter.submit(params("job-a")).await.unwrap();
        assert!(adapter.retrieve("job-a").await.unwrap().is_none());
        assert!(adapter.retrieve("job-a").await.unwrap().is_some());
        assert!(outcome.job_id.contains("job-a"));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_on_unknown_id() {
        let adapter = StubClusterAdapter::default();
        assert!(adapter.cancel("does-not-exist").await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_job_never_becomes_ready() {
        let adapter = StubClusterAdapter::new(1);
        let outcome = adapter.submit(params("job-b")).await.unwrap();
        adapter.cancel(&outcome.job_id).await.unwrap();
        assert!(adapter.retrieve("job-b").await.unwrap().is_none());
    }
}
