//! The Retrieval Worker (C7): polls active Jobs, enforces the webhook and
//! wall-clock deadlines ahead of everything else, retrieves finished
//! artifacts, and delivers them. The precedence among these checks is
//! mandatory — see the module-level ordering in `tick_one` below, which
//! mirrors the original service's literal ordering of checks in its
//! retrieval loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use analysis_common::callback::{CallbackClient, DeliveryOutcome};
use analysis_common::health::HealthHandle;
use analysis_common::job::{Job, JobPatch, JobStatus};
use analysis_common::store::JobStore;
use chrono::Utc;
use cluster_adapter::ClusterAdapter;
use serde_json::{json, Value};
use tracing::{info, warn};

pub struct RetrievalWorker {
    store: Arc<dyn JobStore>,
    adapter: Arc<dyn ClusterAdapter>,
    callback: CallbackClient,
    wait_time: Duration,
    request_timeout: Duration,
    max_upload_failures: i32,
    time_limit: chrono::Duration,
    liveness: HealthHandle,
}

impl RetrievalWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn JobStore>,
        adapter: Arc<dyn ClusterAdapter>,
        wait_time: Duration,
        request_timeout: Duration,
        max_upload_failures: i32,
        time_limit: chrono::Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            store,
            adapter,
            callback: CallbackClient::new(),
            wait_time,
            request_timeout,
            max_upload_failures,
            time_limit,
            liveness,
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.wait_time);
        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            match self.store.find_active().await {
                Ok(jobs) => {
                    if jobs.is_empty() {
                        continue;
                    }
                    info!("processing {} active job(s)", jobs.len());
                    for job in jobs {
                        self.tick_one(job).await;
                    }
                }
                Err(e) => warn!("failed to fetch active jobs: {}", e),
            }
        }
    }

    async fn tick_one(&self, job: Job) {
        let now = Utc::now();

        // 1. Webhook expiry precedes everything else: an expired webhook
        // must never produce an outgoing callback, even with a result in
        // hand.
        if now > job.invalid_after {
            self.expire_webhook(&job).await;
            return;
        }

        // 2. Wall-clock expiry of the cluster job itself.
        if matches!(job.status, JobStatus::Running | JobStatus::RunningPlot) {
            if let Some(submitted_at) = job.submitted_at {
                if now - submitted_at > self.time_limit {
                    self.expire_job(&job).await;
                    return;
                }
            }
        }

        // 3. A submission failure still owes the caller a single failure
        // notice before moving to its terminal state.
        if job.status == JobStatus::FailedSubmissionToUpload {
            self.deliver_submission_failure(&job).await;
            return;
        }

        // 4. Delivery-budget exhaustion, ahead of attempting another
        // delivery.
        if job.status == JobStatus::RetryUpload && job.nb_upload_failures >= self.max_upload_failures
        {
            self.exhaust_upload_budget(&job).await;
            return;
        }

        // 5. Ordinary retrieve/deliver.
        self.retrieve_and_deliver(&job).await;
    }

    async fn expire_webhook(&self, job: &Job) {
        if let Some(job_id) = &job.job_id {
            if let Err(e) = self.adapter.cancel(job_id).await {
                warn!("failed to cancel cluster job for {}: {}", job.id, e);
            }
        }
        self.set_status(job, JobPatch::default().status(JobStatus::WebhookExpired))
            .await;
        self.forget_result(job.id).await;
    }

    async fn expire_job(&self, job: &Job) {
        let next = if job.status == JobStatus::Running {
            JobStatus::JobExpired
        } else {
            // A `running_plot` re-submission that itself times out has no
            // further fallback.
            self.deliver_failure(job, "plot regeneration job exceeded its time limit")
                .await;
            self.set_status(job, JobPatch::default().status(JobStatus::FailedPlot))
                .await;
            self.forget_result(job.id).await;
            return;
        };
        self.set_status(job, JobPatch::default().status(next)).await;
    }

    async fn deliver_submission_failure(&self, job: &Job) {
        let message = job
            .error
            .clone()
            .unwrap_or_else(|| "unknown submission error".to_owned());
        self.deliver_failure(job, &message).await;
        metrics::counter!("analysis_retrieval_jobs_failed_total").increment(1);
        self.set_status(job, JobPatch::default().status(JobStatus::FailedSubmission))
            .await;
    }

    async fn exhaust_upload_budget(&self, job: &Job) {
        self.set_status(job, JobPatch::default().status(JobStatus::FailedUpload))
            .await;
        self.forget_result(job.id).await;
    }

    async fn retrieve_and_deliver(&self, job: &Job) {
        let payload = match job.status {
            JobStatus::Running | JobStatus::RunningPlot => match self.adapter.retrieve(&job.label()).await
            {
                Ok(Some(payload)) => {
                    if let Err(e) = self.store.put_result(job.id, payload.clone()).await {
                        warn!("failed to persist result for job {}: {}", job.id, e);
                        return;
                    }
                    payload
                }
                Ok(None) => return,
                Err(e) => {
                    warn!("retrieve failed for job {}: {}", job.id, e);
                    return;
                }
            },
            JobStatus::RetryUpload => match self.store.get_result(job.id).await {
                Ok(Some(payload)) => payload,
                Ok(None) => match self.adapter.retrieve(&job.label()).await {
                    Ok(Some(payload)) => payload,
                    Ok(None) => return,
                    Err(e) => {
                        warn!("retrieve failed for job {}: {}", job.id, e);
                        return;
                    }
                },
                Err(e) => {
                    warn!("failed to load stored result for job {}: {}", job.id, e);
                    return;
                }
            },
            _ => return,
        };

        let start = Instant::now();
        let (outcome, error_message) = self
            .callback
            .deliver(
                &job.callback_url,
                job.callback_method.clone(),
                &payload,
                self.request_timeout,
            )
            .await;
        metrics::histogram!("analysis_retrieval_delivery_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match outcome {
            DeliveryOutcome::Delivered => {
                metrics::counter!("analysis_retrieval_jobs_succeeded_total").increment(1);
                self.set_status(job, JobPatch::default().status(JobStatus::Completed))
                    .await;
                self.forget_result(job.id).await;
            }
            DeliveryOutcome::Failed => {
                let failures = job.nb_upload_failures + 1;
                if failures >= self.max_upload_failures {
                    metrics::counter!("analysis_retrieval_jobs_failed_total").increment(1);
                    self.set_status(
                        job,
                        JobPatch::default()
                            .status(JobStatus::FailedUpload)
                            .nb_upload_failures(failures)
                            .upload_error(error_message),
                    )
                    .await;
                    self.forget_result(job.id).await;
                } else {
                    metrics::counter!("analysis_retrieval_jobs_retried_total").increment(1);
                    self.set_status(
                        job,
                        JobPatch::default()
                            .status(JobStatus::RetryUpload)
                            .nb_upload_failures(failures)
                            .upload_error(error_message),
                    )
                    .await;
                }
            }
        }
    }

    async fn deliver_failure(&self, job: &Job, message: &str) {
        let payload = failure_payload(message);
        let (_, _) = self
            .callback
            .deliver(
                &job.callback_url,
                job.callback_method.clone(),
                &payload,
                self.request_timeout,
            )
            .await;
    }

    async fn set_status(&self, job: &Job, patch: JobPatch) {
        if let Err(e) = self.store.update_status(job.id, patch).await {
            warn!("failed to persist status for job {}: {}", job.id, e);
        }
    }

    async fn forget_result(&self, id: uuid::Uuid) {
        if let Err(e) = self.store.delete_result(id).await {
            warn!("failed to delete result for job {}: {}", id, e);
        }
    }
}

fn failure_payload(message: &str) -> Value {
    json!({"status": "failure", "message": message})
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_common::job::{AnalysisParameters, CallbackMethod, JobInputs, NewJob};
    use analysis_common::store::MemoryJobStore;
    use chrono::Duration as ChronoDuration;
    use cluster_adapter::stub::StubClusterAdapter;

    fn new_job_with_callback(invalid_after: chrono::DateTime<Utc>, callback_url: &str) -> NewJob {
        NewJob::new(
            "ZTF21abcdef".to_owned(),
            invalid_after,
            callback_url.to_owned(),
            CallbackMethod::post(),
            JobInputs {
                analysis_parameters: AnalysisParameters {
                    source: "nugent-hyper".to_owned(),
                    tmin: 0.0,
                    tmax: 10.0,
                    dt: 0.1,
                },
                photometry: analysis_common::compression::compress(b"mjd,filter,mag,magerr\n").unwrap(),
                redshift: analysis_common::compression::compress(b"z\n0.05\n").unwrap(),
            },
        )
    }

    fn new_job(invalid_after: chrono::DateTime<Utc>) -> NewJob {
        new_job_with_callback(invalid_after, "https://example.invalid/callback")
    }

    async fn worker(
        store: Arc<dyn JobStore>,
        adapter: Arc<dyn ClusterAdapter>,
    ) -> RetrievalWorker {
        let registry = analysis_common::health::HealthRegistry::new("test");
        let liveness = registry
            .register("retrieval".to_owned(), time::Duration::seconds(60))
            .await;
        RetrievalWorker::new(
            store,
            adapter,
            Duration::from_millis(10),
            Duration::from_secs(1),
            3,
            ChronoDuration::hours(12),
            liveness,
        )
    }

    #[tokio::test]
    async fn webhook_expiry_takes_precedence_over_ready_result() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::new(1));

        // invalid_after already in the past, but the cluster job would
        // otherwise be ready to retrieve.
        let job = store
            .create(new_job(Utc::now() - ChronoDuration::seconds(1)))
            .await
            .unwrap();
        let job = store
            .update_status(
                job.id,
                JobPatch::default()
                    .status(JobStatus::Running)
                    .job_id(Some("stub-x".to_owned()))
                    .submitted_at(Some(Utc::now())),
            )
            .await
            .unwrap();

        let w = worker(store.clone(), adapter).await;
        w.tick_one(job.clone()).await;

        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::WebhookExpired);
        assert!(store.get_result(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_wall_clock_expiry_moves_running_to_job_expired() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::new(1));

        let job = store
            .create(new_job(Utc::now() + ChronoDuration::hours(1)))
            .await
            .unwrap();
        let job = store
            .update_status(
                job.id,
                JobPatch::default()
                    .status(JobStatus::Running)
                    .job_id(Some("stub-x".to_owned()))
                    .submitted_at(Some(Utc::now() - ChronoDuration::hours(13))),
            )
            .await
            .unwrap();

        let w = worker(store.clone(), adapter).await;
        w.tick_one(job.clone()).await;

        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::JobExpired);
    }

    async fn submitted_job(
        store: &Arc<dyn JobStore>,
        adapter: &Arc<dyn ClusterAdapter>,
        callback_url: &str,
    ) -> Job {
        let job = store
            .create(new_job_with_callback(
                Utc::now() + ChronoDuration::hours(1),
                callback_url,
            ))
            .await
            .unwrap();
        let job = store
            .update_status(
                job.id,
                JobPatch::default()
                    .status(JobStatus::Running)
                    .job_id(Some("stub-label".to_owned()))
                    .submitted_at(Some(Utc::now())),
            )
            .await
            .unwrap();
        adapter
            .submit(cluster_adapter::SubmitParameters {
                model: "nugent-hyper".to_owned(),
                label: job.label(),
                tt: 59000.0,
                photometry_csv: String::new(),
                redshift_csv: String::new(),
                tmin: 0.0,
                tmax: 10.0,
                dt: 0.1,
                skip_sampling: false,
            })
            .await
            .unwrap();
        job
    }

    #[tokio::test]
    async fn successful_retrieve_and_deliver_completes_the_job() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/callback")
            .with_status(200)
            .create_async()
            .await;

        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::new(1));
        let job = submitted_job(&store, &adapter, &format!("{}/callback", server.url())).await;

        let w = worker(store.clone(), adapter).await;
        w.tick_one(job.clone()).await;

        mock.assert_async().await;
        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert!(store.get_result(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delivery_failure_moves_to_retry_upload_and_keeps_the_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/callback")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::new(1));
        let job = submitted_job(&store, &adapter, &format!("{}/callback", server.url())).await;

        let w = worker(store.clone(), adapter).await;
        w.tick_one(job.clone()).await;

        mock.assert_async().await;
        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::RetryUpload);
        assert_eq!(updated.nb_upload_failures, 1);
        assert!(store.get_result(job.id).await.unwrap().is_some());
    }

    /// S3: a job already sitting in `retry_upload` with a stored result
    /// succeeds on the next attempt without re-retrieving from the cluster.
    #[tokio::test]
    async fn retry_upload_succeeds_on_second_attempt_from_the_stored_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/callback")
            .with_status(200)
            .create_async()
            .await;

        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::new(1));
        let job = submitted_job(&store, &adapter, &format!("{}/callback", server.url())).await;
        store
            .put_result(job.id, json!({"status": "success"}))
            .await
            .unwrap();
        let job = store
            .update_status(
                job.id,
                JobPatch::default()
                    .status(JobStatus::RetryUpload)
                    .nb_upload_failures(1)
                    .upload_error(Some("previous attempt timed out".to_owned())),
            )
            .await
            .unwrap();

        let w = worker(store.clone(), adapter).await;
        w.tick_one(job.clone()).await;

        mock.assert_async().await;
        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert!(store.get_result(job.id).await.unwrap().is_none());
    }

    /// S2: once `nb_upload_failures` reaches the configured budget, the
    /// worker gives up without attempting another delivery.
    #[tokio::test]
    async fn retry_budget_exhaustion_gives_up_without_another_delivery() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::new(1));
        let job = submitted_job(&store, &adapter, "https://example.invalid/callback").await;
        store
            .put_result(job.id, json!({"status": "success"}))
            .await
            .unwrap();
        let job = store
            .update_status(
                job.id,
                JobPatch::default()
                    .status(JobStatus::RetryUpload)
                    .nb_upload_failures(3)
                    .upload_error(Some("gave up before".to_owned())),
            )
            .await
            .unwrap();

        let w = worker(store.clone(), adapter).await;
        w.tick_one(job.clone()).await;

        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::FailedUpload);
        assert_eq!(updated.nb_upload_failures, 3);
        assert!(store.get_result(job.id).await.unwrap().is_none());
    }

    /// S6: a submission failure recorded by the submission worker is
    /// surfaced to the caller's callback exactly once, then parked in its
    /// terminal state.
    #[tokio::test]
    async fn submission_failure_is_surfaced_upstream_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/callback")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::new(1));
        let job = store
            .create(new_job_with_callback(
                Utc::now() + ChronoDuration::hours(1),
                &format!("{}/callback", server.url()),
            ))
            .await
            .unwrap();
        let job = store
            .update_status(
                job.id,
                JobPatch::default()
                    .status(JobStatus::FailedSubmissionToUpload)
                    .error(Some("cluster rejected the submission".to_owned())),
            )
            .await
            .unwrap();

        let w = worker(store.clone(), adapter).await;
        w.tick_one(job.clone()).await;

        mock.assert_async().await;
        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::FailedSubmission);
    }
}
