use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("failed to connect to remote cluster: {0}")]
    Connection(String),
    #[error("failed to submit batch job: {0}")]
    Submit(String),
    #[error("failed to retrieve artifacts for {label}: {reason}")]
    Retrieve { label: String, reason: String },
    #[error("failed to cancel job {0}")]
    Cancel(String),
}
