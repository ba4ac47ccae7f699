use std::path::PathBuf;

use thiserror::Error;

use crate::error::WorkerError;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Environment variable '{0}' is not set")]
    MissingEnv(String),

    #[error("'{var}' must hold {expected} comma-separated values, found {found}")]
    InvalidProviderConfig {
        var: String,
        expected: usize,
        found: usize,
    },

    #[error("Provider '{0}' is not supported for local graph extraction")]
    UnsupportedProvider(&'static str),

    #[error("Unknown prompt template '{0}'")]
    UnknownTemplate(String),

    #[error("Failed to read prompt template '{path}': {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed LLM response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl From<reqwest::Error> for GraphError {
    fn from(err: reqwest::Error) -> Self {
        GraphError::Request(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
