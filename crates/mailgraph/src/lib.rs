pub mod config;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod mailbox;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod secrets;
pub mod server;
pub mod storage;

pub use config::{load_config, load_effective_config, Config};
pub use error::{ConfigError, MailgraphError, ProcessError, Result, StorageError, WorkerError};
pub use graph::{GraphError, GraphExtractor};
pub use ingest::{ChunkedUploader, DbCredentials, ExtractionTrigger, IngestClient, IngestError};
pub use mailbox::{MailRetriever, MailboxError, TokenStore};
pub use pipeline::{CycleReport, DriverState, PollingDriver};
pub use processor::{OcrNormalizer, TesseractEngine};
pub use secrets::{resolve_secret, SecretError, SecretRef, TokenEncryptor};
pub use server::{AppState, ServerError};
pub use storage::DataDir;
