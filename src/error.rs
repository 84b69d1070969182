//! Error taxonomy surfaced to callers (spec.md §6/§7).

/// Errors surfaced by uploader operations.
///
/// `Conflict` is produced internally by the database client on a 409
/// response and is always translated away by the merge loop before it
/// reaches a caller — see [`crate::uploader::Uploader::payload_telemetry`].
#[derive(Debug, thiserror::Error)]
pub enum UploaderError {
    /// An operation was attempted before `re_init` was called.
    #[error("uploader is not initialised")]
    NotInitialised,

    /// Caller-supplied data failed validation (e.g. reserved metadata keys).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport-level failure: connection refused, DNS failure, timeout, or
    /// a non-2xx/409 status where 409 has a specific meaning (see below).
    #[error("network error: {0}")]
    NetworkError(String),

    /// The server returned a response that could not be parsed as the
    /// expected shape (e.g. `_uuids` without a `uuids` array).
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Document-revision conflict (HTTP 409). Internal to the merge loop;
    /// never surfaced to a caller of the public API.
    #[error("conflict")]
    Conflict,

    /// The payload-telemetry merge loop exhausted its retry budget, or the
    /// update handler returned a non-409 failure status.
    #[error("unmergeable: {0}")]
    UnmergeableError(String),
}

impl From<reqwest::Error> for UploaderError {
    fn from(e: reqwest::Error) -> Self {
        UploaderError::NetworkError(e.to_string())
    }
}

impl From<serde_json::Error> for UploaderError {
    fn from(e: serde_json::Error) -> Self {
        UploaderError::MalformedResponse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UploaderError>;
