//! Local knowledge-graph extraction.
//!
//! Text is split into chunks, consecutive chunks are combined per request,
//! and each combined chunk goes through an LLM graph transformer on a
//! bounded worker pool.

pub mod combine;
pub mod error;
pub mod pool;
pub mod prompt;
pub mod provider;
pub mod transformer;

use std::sync::Arc;

use log::{info, warn};

pub use combine::{combine_chunks, split_text, CombinedChunk, TextChunk};
pub use error::GraphError;
pub use pool::{transform_all, TransformerPool};
pub use prompt::PromptTemplate;
pub use provider::ProviderConfig;
pub use transformer::{
    ChatBackend, ChatGraphTransformer, GraphDocument, GraphTransformer, Node, Relationship,
};

use crate::config::{ExtractionConfig, Ontology};
use error::Result;

/// Documents in completion order, plus the number of chunks that failed.
#[derive(Debug)]
pub struct GraphExtraction {
    pub documents: Vec<GraphDocument>,
    pub failed: usize,
}

pub struct GraphExtractor {
    transformer: Arc<dyn GraphTransformer>,
    chunk_chars: usize,
    chunks_to_combine: usize,
    max_workers: usize,
}

impl GraphExtractor {
    pub fn new(transformer: Arc<dyn GraphTransformer>, config: &ExtractionConfig) -> Self {
        Self {
            transformer,
            chunk_chars: config.chunk_chars,
            chunks_to_combine: config.chunks_to_combine,
            max_workers: config.max_workers,
        }
    }

    /// Builds the chat transformer for `model_id` from the provider registry.
    pub fn for_model(model_id: &str, config: &ExtractionConfig, ontology: Ontology) -> Result<Self> {
        let provider = ProviderConfig::from_env(model_id)?;
        let backend = ChatBackend::for_provider(&provider)?;
        let template = PromptTemplate::load(&config.prompt_template)?;
        info!(
            "Graph extraction with {} model {} and template '{}'",
            provider.name(),
            provider.model(),
            template.name()
        );
        let transformer = ChatGraphTransformer::new(
            backend,
            &template,
            ontology,
            provider.supports_node_properties(),
        )?;
        Ok(Self::new(Arc::new(transformer), config))
    }

    pub fn extract(&self, source: &str, text: &str) -> Result<GraphExtraction> {
        let chunks = split_text(source, text, self.chunk_chars);
        let combined = combine_chunks(&chunks, self.chunks_to_combine);
        info!(
            "Combining {} chunks into {} requests",
            chunks.len(),
            combined.len()
        );

        let results = transform_all(Arc::clone(&self.transformer), combined, self.max_workers)?;

        let mut extraction = GraphExtraction {
            documents: Vec::with_capacity(results.len()),
            failed: 0,
        };
        for job in results {
            match job.result {
                Ok(document) => extraction.documents.push(document),
                Err(e) => {
                    warn!("Graph extraction failed for request {}: {}", job.index, e);
                    extraction.failed += 1;
                }
            }
        }
        Ok(extraction)
    }
}
