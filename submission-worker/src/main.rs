//! Drains `pending`/`job_expired` Jobs and submits them to the cluster.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use analysis_common::health::HealthRegistry;
use analysis_common::metrics::{serve, setup_metrics_routes};
use analysis_common::store::{JobStore, PgJobStore};
use cluster_adapter::stub::StubClusterAdapter;
use cluster_adapter::ClusterAdapter;

mod config;
mod worker;

use config::Config;
use worker::SubmissionWorker;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("submission-worker".to_string(), time::Duration::seconds(60))
        .await;

    let store: Arc<dyn JobStore> = Arc::new(
        PgJobStore::new(&config.database.url, config.database.max_connections)
            .await
            .expect("failed to connect to the job store"),
    );

    // The real SSH/SFTP-backed adapter is out of scope for this system; the
    // stub lets this binary run end to end against a configured cluster
    // stand-in for demos and integration tests.
    let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::default());

    let worker = SubmissionWorker::new(
        store,
        adapter,
        config.wait_time.0,
        worker_liveness,
    );

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    worker.run().await;
}

pub async fn index() -> &'static str {
    "analysis submission worker"
}
