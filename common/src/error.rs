//! Typed errors for each concern in the `common` crate, following this
//! codebase's convention of `thiserror` enums in library code and `eyre`
//! at binary entry points.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid JobStatus")]
pub struct ParseJobStatusError(pub String);

/// Errors from the Job Store (C1).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("job {0} not found")]
    NotFound(uuid::Uuid),
    #[error("job {0} already exists")]
    DuplicateId(uuid::Uuid),
}

/// Errors surfaced by the filter mapper (C4).
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("model {0} is not in the allowed model catalog")]
    UnknownModel(String),
    #[error("filter {filter} is not valid for model {model}")]
    UnknownFilter { model: String, filter: String },
    #[error("failed to fetch remote filter catalog: {0}")]
    CatalogFetchError(#[from] reqwest::Error),
    #[error("failed to parse filter catalog: {0}")]
    CatalogParseError(#[from] serde_yaml::Error),
    #[error("failed to read or write local filter catalog cache: {0}")]
    CatalogCacheError(#[from] std::io::Error),
}

/// Errors surfaced by the ingestion validator (C5).
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid_after must be in the future")]
    InvalidAfterInPast,
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("photometry CSV is malformed: {0}")]
    MalformedCsv(#[from] csv::Error),
    #[error("photometry has no rows with a recognized filter")]
    AllPhotometryRowsRejected,
    #[error("failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),
}

/// Errors surfaced by the callback client (C3).
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("could not connect to {url}")]
    Connection { url: String },
    #[error("{url} responded with status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },
    #[error("failed to serialize callback payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeliveryError {
    pub fn message(&self) -> String {
        match self {
            DeliveryError::Timeout { .. } => "request timed out".to_owned(),
            DeliveryError::Connection { .. } => "connection failed".to_owned(),
            DeliveryError::HttpStatus { message, .. } => message.clone(),
            DeliveryError::Serialization(e) => e.to_string(),
        }
    }
}

/// Errors raised while loading configuration at startup. These are the only
/// errors in this system that are fatal: every other failure is logged and
/// the offending Job is left for the next worker tick.
#[derive(Error, Debug)]
pub enum CatastrophicError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("expansion.time_limit must be between 1 and 24 hours, got {0}")]
    TimeLimitOutOfRange(u64),
}
