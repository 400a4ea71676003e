//! The Ingestion Validator (C5): accepts a parsed request body, rejects
//! anything malformed or unsupported, and turns what remains into a
//! `NewJob` ready for the Job Store. Mirrors this codebase's ingestion
//! handlers in spirit (reject fast, with a human-readable reason) while
//! doing photometry-specific normalization the original service's
//! `validate`/`mongify` pair did.

use std::collections::HashMap;

use analysis_common::compression::compress;
use analysis_common::error::ValidationError;
use analysis_common::filter::FilterMapper;
use analysis_common::job::{AnalysisParameters, CallbackMethod, JobInputs, NewJob};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AnalysisRequestBody {
    pub resource_id: String,
    pub invalid_after: DateTime<Utc>,
    pub callback_url: String,
    pub callback_method: CallbackMethod,
    pub inputs: RawInputs,
}

#[derive(Debug, Deserialize)]
pub struct RawInputs {
    pub analysis_parameters: RawAnalysisParameters,
    #[serde(default)]
    pub photometry: Option<String>,
    #[serde(default)]
    pub redshift: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawAnalysisParameters {
    pub source: String,
    pub tmin: f64,
    pub tmax: f64,
    pub dt: f64,
}

/// Validates and normalizes an incoming request, producing a `NewJob`
/// ready for `JobStore::create`.
pub fn validate(body: AnalysisRequestBody, mapper: &FilterMapper) -> Result<NewJob, ValidationError> {
    if body.invalid_after <= Utc::now() {
        return Err(ValidationError::InvalidAfterInPast);
    }

    if !mapper.is_allowed_model(&body.inputs.analysis_parameters.source) {
        return Err(ValidationError::Filter(
            analysis_common::error::FilterError::UnknownModel(
                body.inputs.analysis_parameters.source.clone(),
            ),
        ));
    }

    let normalized_photometry = match body.inputs.photometry.as_deref() {
        Some(photometry) => {
            normalize_photometry(photometry, &body.inputs.analysis_parameters.source, mapper)?
        }
        None => String::new(),
    };

    let redshift = body.inputs.redshift.unwrap_or_default();

    let inputs = JobInputs {
        analysis_parameters: AnalysisParameters {
            source: body.inputs.analysis_parameters.source,
            tmin: body.inputs.analysis_parameters.tmin,
            tmax: body.inputs.analysis_parameters.tmax,
            dt: body.inputs.analysis_parameters.dt,
        },
        photometry: compress(normalized_photometry.as_bytes())?,
        redshift: compress(redshift.as_bytes())?,
    };

    Ok(NewJob::new(
        body.resource_id,
        body.invalid_after,
        body.callback_url,
        body.callback_method,
        inputs,
    ))
}

/// Deduplicates photometry rows by `mjd` (keeping the first occurrence),
/// drops rows whose filter cannot be mapped for the chosen model, and
/// rejects the request outright if every row is dropped.
fn normalize_photometry(
    csv_text: &str,
    model: &str,
    mapper: &FilterMapper,
) -> Result<String, ValidationError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(csv_text.as_bytes());
    let headers = reader.headers()?.clone();
    let filter_idx = headers
        .iter()
        .position(|h| h == "filter")
        .ok_or(ValidationError::MissingField("photometry.filter"))?;
    let mjd_idx = headers
        .iter()
        .position(|h| h == "mjd")
        .ok_or(ValidationError::MissingField("photometry.mjd"))?;

    let mut seen_mjd: HashMap<String, ()> = HashMap::new();
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&headers)?;

    let mut kept_any = false;
    for record in reader.records() {
        let mut record = record?;
        let mjd = record.get(mjd_idx).unwrap_or_default().to_owned();
        if seen_mjd.contains_key(&mjd) {
            continue;
        }

        let filter = record.get(filter_idx).unwrap_or_default().to_owned();
        match mapper.map_filter(model, &filter) {
            Ok(mapped) => {
                record = replace_field(&record, filter_idx, &mapped);
                seen_mjd.insert(mjd, ());
                writer.write_record(&record)?;
                kept_any = true;
            }
            Err(_) => continue,
        }
    }

    if !kept_any {
        return Err(ValidationError::AllPhotometryRowsRejected);
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn replace_field(record: &csv::StringRecord, idx: usize, value: &str) -> csv::StringRecord {
    let mut out = csv::StringRecord::new();
    for (i, field) in record.iter().enumerate() {
        if i == idx {
            out.push_field(value);
        } else {
            out.push_field(field);
        }
    }
    out
}

/// Strips top-level fields whose value is null, an empty string, an empty
/// array, or an empty object, matching the original service's cleanup pass
/// before persisting a request.
pub fn strip_empty_fields(mut value: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(ref mut map) = value {
        map.retain(|_, v| !is_empty(v));
    }
    value
}

fn is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
