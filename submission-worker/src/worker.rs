//! The Submission Worker (C6): drains `pending`/`job_expired` Jobs,
//! submits each to the cluster, and writes the outcome back to the Job
//! Store. Modeled on this codebase's worker tick-loop shape, but serial
//! per-job rather than semaphore-gated, since jobs are processed one at a
//! time by design (see the concurrency model).

use std::sync::Arc;
use std::time::{Duration, Instant};

use analysis_common::health::HealthHandle;
use analysis_common::job::{Job, JobPatch, JobStatus};
use analysis_common::store::JobStore;
use cluster_adapter::{ClusterAdapter, SubmitParameters};
use tracing::{info, warn};

pub struct SubmissionWorker {
    store: Arc<dyn JobStore>,
    adapter: Arc<dyn ClusterAdapter>,
    wait_time: Duration,
    liveness: HealthHandle,
}

impl SubmissionWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        adapter: Arc<dyn ClusterAdapter>,
        wait_time: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            store,
            adapter,
            wait_time,
            liveness,
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.wait_time);
        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            match self.store.find_submittable().await {
                Ok(jobs) => {
                    if jobs.is_empty() {
                        continue;
                    }
                    info!("submitting {} job(s)", jobs.len());
                    for job in jobs {
                        self.submit_one(job).await;
                    }
                }
                Err(e) => warn!("failed to fetch submittable jobs: {}", e),
            }
        }
    }

    async fn submit_one(&self, job: Job) {
        let labels = [("model", job.inputs.0.analysis_parameters.source.clone())];
        metrics::counter!("analysis_submission_jobs_submitted_total", &labels).increment(1);
        let start = Instant::now();

        let skip_sampling = job.status == JobStatus::JobExpired;
        let running_status = if skip_sampling {
            JobStatus::RunningPlot
        } else {
            JobStatus::Running
        };

        let photometry_csv =
            analysis_common::compression::decompress(&job.inputs.0.photometry)
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default();
        let redshift_csv = analysis_common::compression::decompress(&job.inputs.0.redshift)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let tt = earliest_unmasked_mjd(&photometry_csv).unwrap_or(job.inputs.0.analysis_parameters.tmin);

        let params = SubmitParameters {
            model: job.inputs.0.analysis_parameters.source.clone(),
            label: job.label(),
            tt,
            photometry_csv,
            redshift_csv,
            tmin: job.inputs.0.analysis_parameters.tmin,
            tmax: job.inputs.0.analysis_parameters.tmax,
            dt: job.inputs.0.analysis_parameters.dt,
            skip_sampling,
        };

        let patch = match self.adapter.submit(params).await {
            Ok(outcome) => {
                metrics::counter!("analysis_submission_jobs_succeeded_total", &labels).increment(1);
                JobPatch::default()
                    .status(running_status)
                    .job_id(Some(outcome.job_id))
                    .submitted_at(Some(outcome.submitted_at))
                    .error(None)
            }
            Err(e) => {
                warn!("submission failed for job {}: {}", job.id, e);
                metrics::counter!("analysis_submission_jobs_failed_total", &labels).increment(1);
                JobPatch::default()
                    .status(JobStatus::FailedSubmissionToUpload)
                    .job_id(None)
                    .error(Some(e.to_string()))
            }
        };

        metrics::histogram!("analysis_submission_duration_seconds", &labels)
            .record(start.elapsed().as_secs_f64());

        if let Err(e) = self.store.update_status(job.id, patch).await {
            warn!("failed to persist submission outcome for job {}: {}", job.id, e);
        }
    }
}

/// The earliest `mjd` among photometry rows whose magnitude column is not a
/// masking sentinel (blank or `99.0`), used as the sampling job's explosion
/// time reference. Resolves `mjd`/`mag` by header name rather than a fixed
/// position, same as `api::validate::normalize_photometry`.
fn earliest_unmasked_mjd(photometry_csv: &str) -> Option<f64> {
    let mut reader = csv::Reader::from_reader(photometry_csv.as_bytes());
    let headers = reader.headers().ok()?.clone();
    let mjd_idx = headers.iter().position(|h| h == "mjd")?;
    let mag_idx = headers.iter().position(|h| h == "mag")?;
    let mut earliest: Option<f64> = None;

    for record in reader.records().flatten() {
        let mjd = record.get(mjd_idx).and_then(|s| s.parse::<f64>().ok());
        let mag = record.get(mag_idx).and_then(|s| s.parse::<f64>().ok());
        if let (Some(mjd), Some(mag)) = (mjd, mag) {
            if mag >= 99.0 {
                continue;
            }
            earliest = Some(earliest.map_or(mjd, |e: f64| e.min(mjd)));
        }
    }

    earliest
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_common::job::{AnalysisParameters, CallbackMethod, JobInputs, NewJob};
    use analysis_common::store::MemoryJobStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use cluster_adapter::stub::StubClusterAdapter;

    fn new_job() -> NewJob {
        NewJob::new(
            "ZTF21abcdef".to_owned(),
            Utc::now() + ChronoDuration::hours(1),
            "https://example.com/callback".to_owned(),
            CallbackMethod::post(),
            JobInputs {
                analysis_parameters: AnalysisParameters {
                    source: "nugent-hyper".to_owned(),
                    tmin: 0.0,
                    tmax: 10.0,
                    dt: 0.1,
                },
                photometry: analysis_common::compression::compress(
                    b"mjd,filter,mag,magerr\n59000.5,ps1__g,20.1,0.05\n59001.0,ps1__r,99.0,0.0\n",
                )
                .unwrap(),
                redshift: analysis_common::compression::compress(b"z\n0.05\n").unwrap(),
            },
        )
    }

    #[test]
    fn earliest_unmasked_mjd_skips_masking_sentinel() {
        let csv = "mjd,filter,mag,magerr\n59002.0,ps1__r,99.0,0.0\n59000.5,ps1__g,20.1,0.05\n";
        assert_eq!(earliest_unmasked_mjd(csv), Some(59000.5));
    }

    #[test]
    fn earliest_unmasked_mjd_resolves_columns_by_header_not_position() {
        let csv = "mag,mjd,filter,magerr\n99.0,59002.0,ps1__r,0.0\n20.1,59000.5,ps1__g,0.05\n";
        assert_eq!(earliest_unmasked_mjd(csv), Some(59000.5));
    }

    #[tokio::test]
    async fn submits_pending_job_and_marks_running() {
        let store: std::sync::Arc<dyn JobStore> = std::sync::Arc::new(MemoryJobStore::new());
        let adapter: std::sync::Arc<dyn ClusterAdapter> =
            std::sync::Arc::new(StubClusterAdapter::default());
        let (liveness_registry_handle, _registry) = {
            let registry = analysis_common::health::HealthRegistry::new("test");
            let handle = registry
                .register("submission".to_owned(), time::Duration::seconds(60))
                .await;
            (handle, registry)
        };

        let job = store.create(new_job()).await.unwrap();
        let worker = SubmissionWorker::new(
            store.clone(),
            adapter,
            Duration::from_millis(10),
            liveness_registry_handle,
        );
        worker.submit_one(store.get(job.id).await.unwrap()).await;

        let updated = store.get(job.id).await.unwrap();
        assert_eq!(updated.status, JobStatus::Running);
        assert!(updated.job_id.is_some());
        assert!(updated.submitted_at.is_some());
    }
}
