//! Accepts analysis requests over HTTP, validates and normalizes them, and
//! hands them to the Job Store for the Submission Worker to pick up.
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use config::Config;
use envconfig::Envconfig;

use analysis_common::filter::FilterMapper;
use analysis_common::metrics::setup_metrics_routes;
use analysis_common::store::{JobStore, PgJobStore};
use cluster_adapter::stub::StubClusterAdapter;
use cluster_adapter::ClusterAdapter;

mod config;
mod handlers;
mod validate;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub adapter: Arc<dyn ClusterAdapter>,
    pub filter_mapper: Arc<FilterMapper>,
}

async fn listen(app: Router, bind: String) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let store: Arc<dyn JobStore> = Arc::new(
        PgJobStore::new(&config.database.url, config.database.max_connections)
            .await
            .expect("failed to connect to the job store"),
    );

    let cache_path =
        FilterMapper::cache_path(Path::new(&config.filter_catalog_cache_dir));
    let filter_mapper = FilterMapper::fetch(&config.filter_catalog_url, &cache_path)
        .await
        .expect("failed to load filter catalog");

    let state = AppState {
        store,
        adapter: Arc::new(StubClusterAdapter::default()),
        filter_mapper: Arc::new(filter_mapper),
    };

    let app = handlers::app::add_routes(Router::new(), state);
    let app = setup_metrics_routes(app);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start analysis-api http server, {}", e),
    }
}
