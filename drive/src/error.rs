use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by every remote, local and protocol operation of the crate.
///
/// Nothing is retried internally: transport, API and local I/O failures abort the current call as they are.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection, DNS, TLS or timeout failure.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Local file open/read/seek/stat failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The drive API answered with a non-zero code or an error status.
    #[error("code: {code}, msg: {message}")]
    Api { code: i64, message: String },
    /// The object storage endpoint answered with anything but `200 OK`.
    #[error("up status: {status}, error: {body}")]
    Status { status: u16, body: String },
    /// A file segment of a remote path does not exist (files are never created implicitly).
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("malformed upload url: {0}")]
    InvalidUploadUrl(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The client cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
    #[error("task {0} did not finish in time")]
    TaskTimeout(String),
    /// Another upload currently holds this session key.
    #[error("upload session {0} is already active")]
    SessionBusy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    #[inline]
    pub(crate) fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }
}
