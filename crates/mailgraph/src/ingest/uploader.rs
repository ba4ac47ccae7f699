//! Sequential chunked upload of one file.

use std::io;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use tracing::{info_span, Instrument};

use super::chunker::{ChunkCountPolicy, ChunkReader};
use super::client::{ChunkForm, DbCredentials, IngestApi};
use super::error::{IngestError, Result};
use crate::config::IngestConfig;
use crate::sanitize::redact_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed { chunks: u64 },
    /// The service refused `chunk`; nothing after it was sent.
    Rejected { chunk: u64, message: String },
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed { .. })
    }
}

pub struct ChunkedUploader {
    api: Arc<dyn IngestApi>,
    chunk_size: u64,
    policy: ChunkCountPolicy,
    model: String,
}

impl ChunkedUploader {
    pub fn new(api: Arc<dyn IngestApi>, config: &IngestConfig) -> Self {
        Self {
            api,
            chunk_size: config.chunk_size,
            policy: config.chunk_count,
            model: config.model.clone(),
        }
    }

    /// Sends the file chunk by chunk. Chunk `k + 1` goes out only after chunk
    /// `k` was acknowledged with `"Success"`.
    pub async fn upload(&self, path: &Path, credentials: &DbCredentials) -> Result<UploadOutcome> {
        let span = info_span!("upload", file = %redact_path(path));
        self.upload_chunks(path, credentials).instrument(span).await
    }

    async fn upload_chunks(&self, path: &Path, credentials: &DbCredentials) -> Result<UploadOutcome> {
        let read_error = |source| IngestError::ReadFile {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(read_error)?;
        let size = file.metadata().await.map_err(read_error)?.len();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file = file.into_std().await;
        let mut chunks = ChunkReader::new(file, size, self.chunk_size, self.policy);
        let total = chunks.total();

        loop {
            // chunk reads are large and blocking, keep them off the runtime
            let (next, reader) = tokio::task::spawn_blocking(move || {
                let next = chunks.next();
                (next, chunks)
            })
            .await
            .map_err(|e| read_error(io::Error::other(e)))?;
            chunks = reader;

            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(read_error)?;
            let number = chunk.number;
            let reply = self
                .api
                .upload_chunk(ChunkForm {
                    original_name: &original_name,
                    chunk_number: chunk.number,
                    total_chunks: chunk.total,
                    data: chunk.data,
                    model: &self.model,
                    credentials,
                })
                .await?;

            if !reply.is_success() {
                warn!(
                    "Error uploading chunk {} of {}: {}",
                    number, original_name, reply.message
                );
                return Ok(UploadOutcome::Rejected {
                    chunk: number,
                    message: reply.message,
                });
            }
            info!("Chunk {}/{} of {} uploaded", number, total, original_name);
        }

        Ok(UploadOutcome::Completed { chunks: total })
    }
}
