use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{debug, error};

use crate::validate::{self, AnalysisRequestBody};
use crate::AppState;

#[derive(Serialize)]
pub struct AnalysisResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<AnalysisResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(AnalysisResponse {
            status: "rejected",
            message: Some(message.into()),
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, Json<AnalysisResponse>) {
    error!("internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AnalysisResponse {
            status: "error",
            message: Some(err.to_string()),
        }),
    )
}

pub async fn post(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Json<AnalysisResponse>, (StatusCode, Json<AnalysisResponse>)> {
    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| bad_request("Invalid JSON"))?;
    let raw: AnalysisRequestBody = serde_json::from_value(validate::strip_empty_fields(value))
        .map_err(|_| bad_request("Invalid JSON"))?;

    debug!("received analysis request for {}", raw.resource_id);

    let new_job =
        validate::validate(raw, &state.filter_mapper).map_err(|e| bad_request(e.to_string()))?;

    let start_time = Instant::now();
    state.store.create(new_job).await.map_err(internal_error)?;
    metrics::histogram!("analysis_ingest_seconds").record(start_time.elapsed().as_secs_f64());

    Ok(Json(AnalysisResponse {
        status: "pending",
        message: None,
    }))
}

pub async fn get_status() -> Json<AnalysisResponse> {
    Json(AnalysisResponse {
        status: "active",
        message: None,
    })
}
