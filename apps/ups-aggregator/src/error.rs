use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("login rejected with status {0}")]
    Status(reqwest::StatusCode),

    #[error("login response does not contain a scheme and token ({parts} parts)")]
    MalformedToken { parts: usize },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("management tree request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("management tree request not authorized (status {0})")]
    Unauthorized(reqwest::StatusCode),

    #[error("management tree request returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to decode management tree: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A single node that could not be turned into a reading.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractWarning {
    #[error("device id {id} of {name:?} does not fit in u32")]
    DeviceIdOutOfRange { id: i64, name: String },

    #[error("node {index} of the management tree could not be decoded: {reason}")]
    MalformedNode { index: usize, reason: String },
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to open batch insert: {0}")]
    Open(#[source] BoxError),

    #[error("failed to append reading for device {device_id}: {reason}")]
    Append { device_id: u32, reason: String },

    #[error("failed to commit batch insert: {0}")]
    Commit(#[source] BoxError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of one poll cycle, tagged with the stage that aborted it.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl CycleError {
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::Auth(_) => "authenticate",
            CycleError::Fetch(_) => "fetch_tree",
            CycleError::Write(_) => "write_batch",
        }
    }
}
