//! Hand-off of text files to the remote knowledge-graph ingestion service:
//! chunked upload, then a delayed extraction request.

pub mod chunker;
pub mod client;
pub mod error;
pub mod extract;
pub mod uploader;

pub use chunker::{Chunk, ChunkCountPolicy, ChunkReader};
pub use client::{DbCredentials, IngestApi, IngestClient, UploadResponse};
pub use error::IngestError;
pub use extract::ExtractionTrigger;
pub use uploader::{ChunkedUploader, UploadOutcome};
