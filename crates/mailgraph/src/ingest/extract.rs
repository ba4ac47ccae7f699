//! Asks the ingestion service to build the graph for an uploaded file.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use super::client::{DbCredentials, ExtractForm, IngestApi};
use super::error::Result;
use crate::config::{IngestConfig, Ontology};

pub struct ExtractionTrigger {
    api: Arc<dyn IngestApi>,
    model: String,
    source_type: String,
    ontology: Ontology,
    settling_delay: Duration,
}

impl ExtractionTrigger {
    pub fn new(api: Arc<dyn IngestApi>, config: &IngestConfig, ontology: Ontology) -> Self {
        Self {
            api,
            model: config.model.clone(),
            source_type: config.source_type.clone(),
            ontology,
            settling_delay: Duration::from_secs(config.settling_delay_secs),
        }
    }

    pub fn settling_delay(&self) -> Duration {
        self.settling_delay
    }

    /// Waits out the settling delay so the service can reassemble the chunks,
    /// then triggers extraction.
    pub async fn extract_after_settling(
        &self,
        file_name: &str,
        credentials: &DbCredentials,
    ) -> Result<serde_json::Value> {
        tokio::time::sleep(self.settling_delay).await;
        self.extract(file_name, credentials).await
    }

    /// One extraction request, no retry.
    pub async fn extract(
        &self,
        file_name: &str,
        credentials: &DbCredentials,
    ) -> Result<serde_json::Value> {
        let form = ExtractForm {
            file_name,
            model: &self.model,
            source_type: &self.source_type,
            ontology: &self.ontology,
            credentials,
        };
        match self.api.extract(form).await {
            Ok(reply) => {
                info!("Extraction response for {}: {}", file_name, reply);
                Ok(reply)
            }
            Err(e) => {
                warn!("Extraction failed for {}: {}", file_name, e);
                Err(e)
            }
        }
    }
}
