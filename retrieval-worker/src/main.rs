//! Polls active Jobs, enforces deadlines, retrieves artifacts, and
//! delivers results to the caller's callback URL.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use chrono::Duration as ChronoDuration;
use envconfig::Envconfig;

use analysis_common::health::HealthRegistry;
use analysis_common::metrics::{serve, setup_metrics_routes};
use analysis_common::store::{JobStore, PgJobStore};
use cluster_adapter::stub::StubClusterAdapter;
use cluster_adapter::ClusterAdapter;

mod config;
mod worker;

use config::Config;
use worker::RetrievalWorker;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    if !(1..=24).contains(&config.time_limit_hours) {
        panic!(
            "EXPANSION_TIME_LIMIT_HOURS must be between 1 and 24, got {}",
            config.time_limit_hours
        );
    }

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("retrieval-worker".to_string(), time::Duration::seconds(60))
        .await;

    let store: Arc<dyn JobStore> = Arc::new(
        PgJobStore::new(&config.database.url, config.database.max_connections)
            .await
            .expect("failed to connect to the job store"),
    );

    let adapter: Arc<dyn ClusterAdapter> = Arc::new(StubClusterAdapter::default());

    let worker = RetrievalWorker::new(
        store,
        adapter,
        config.wait_time.0,
        config.request_timeout.0,
        config.max_upload_failures,
        ChronoDuration::hours(config.time_limit_hours as i64),
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
    "analysis retrieval worker"
}
