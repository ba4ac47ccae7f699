//! Errors from the remote ingestion service.

use std::path::PathBuf;

use thiserror::Error;

use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The request could not be sent or the reply not read.
    #[error("Ingestion request failed: {0}")]
    Request(String),

    /// Non-success status with a body that is not a service reply.
    #[error("Ingestion service returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The reply was not the JSON the service is expected to send.
    #[error("Malformed ingestion reply: {0}")]
    MalformedReply(String),

    #[error("Failed to read '{path}' for upload: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Request(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
