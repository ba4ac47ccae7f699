//! Mailbox retrieval error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::StorageError;
use crate::secrets::SecretError;

/// Errors that can occur while talking to the mailbox provider.
#[derive(Error, Debug)]
pub enum MailboxError {
    /// The HTTP request could not be sent or its body not read.
    #[error("Mailbox request failed: {0}")]
    Request(String),

    /// The API answered with a non-success status.
    #[error("Mailbox API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// A payload could not be decoded.
    #[error("Failed to decode mailbox payload: {0}")]
    Decode(String),

    /// OAuth2 authorization or refresh failed.
    #[error("OAuth2 error: {0}")]
    OAuth2Error(String),

    /// The OAuth client secrets file has not been uploaded yet.
    #[error("OAuth client secrets not found at '{0}'")]
    MissingClientSecrets(PathBuf),

    /// No stored token; the authorization flow has not been completed.
    #[error("Mailbox token not found at '{0}'")]
    TokenNotFound(PathBuf),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl From<reqwest::Error> for MailboxError {
    fn from(err: reqwest::Error) -> Self {
        MailboxError::Request(err.to_string())
    }
}

/// Result type for mailbox operations.
pub type Result<T> = std::result::Result<T, MailboxError>;
