//! HTTP client for the remote ingestion service's `/upload` and `/extract`.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::error::{IngestError, Result};
use crate::config::{GraphDbConfig, Ontology};
use crate::mailbox::client::truncate_error_body;
use crate::sanitize::redact_url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Extraction runs the LLM call inside the request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub const UPLOAD_SUCCESS: &str = "Success";

/// Graph database parameters forwarded with every call.
#[derive(Debug)]
pub struct DbCredentials {
    pub uri: String,
    pub username: String,
    pub password: SecretString,
    pub database: String,
}

impl DbCredentials {
    pub fn from_config(config: &GraphDbConfig) -> Result<Self> {
        Ok(Self {
            uri: config.uri.clone(),
            username: config.username.clone(),
            password: config.password.resolve()?,
            database: config.database.clone(),
        })
    }
}

/// One multipart POST to `/upload`.
#[derive(Debug)]
pub struct ChunkForm<'a> {
    pub original_name: &'a str,
    pub chunk_number: u64,
    pub total_chunks: u64,
    pub data: Vec<u8>,
    pub model: &'a str,
    pub credentials: &'a DbCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl UploadResponse {
    pub fn is_success(&self) -> bool {
        self.status == UPLOAD_SUCCESS
    }
}

/// Form for `/extract`.
#[derive(Debug)]
pub struct ExtractForm<'a> {
    pub file_name: &'a str,
    pub model: &'a str,
    pub source_type: &'a str,
    pub ontology: &'a Ontology,
    pub credentials: &'a DbCredentials,
}

impl ExtractForm<'_> {
    /// Field pairs in the order the service documents them. Ontology fields
    /// are omitted when empty.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("uri", self.credentials.uri.clone()),
            ("userName", self.credentials.username.clone()),
            ("password", self.credentials.password.expose_secret().to_string()),
            ("database", self.credentials.database.clone()),
            ("model", self.model.to_string()),
            ("file_name", self.file_name.to_string()),
            ("source_type", self.source_type.to_string()),
        ];
        if !self.ontology.allowed_nodes.is_empty() {
            fields.push(("allowedNodes", self.ontology.allowed_nodes.join(",")));
        }
        if !self.ontology.allowed_relationships.is_empty() {
            fields.push((
                "allowedRelationship",
                self.ontology.allowed_relationships.join(","),
            ));
        }
        fields
    }
}

#[async_trait]
pub trait IngestApi: Send + Sync {
    async fn upload_chunk(&self, form: ChunkForm<'_>) -> Result<UploadResponse>;

    /// Returns the service's reply as opaque JSON.
    async fn extract(&self, form: ExtractForm<'_>) -> Result<serde_json::Value>;
}

pub struct IngestClient {
    client: Client,
    server_url: String,
}

impl IngestClient {
    pub fn new(server_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IngestError::Request(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(_) if !status.is_success() => Err(IngestError::Api {
                status: status.as_u16(),
                body: truncate_error_body(&body),
            }),
            Err(e) => Err(IngestError::MalformedReply(format!(
                "{}: {}",
                e,
                truncate_error_body(&body)
            ))),
        }
    }
}

#[async_trait]
impl IngestApi for IngestClient {
    async fn upload_chunk(&self, form: ChunkForm<'_>) -> Result<UploadResponse> {
        let url = format!("{}/upload", self.server_url);
        debug!(
            "POST {} chunk {}/{}",
            redact_url(&url),
            form.chunk_number,
            form.total_chunks
        );

        let credentials = form.credentials;
        let body = Form::new()
            .part(
                "file",
                Part::bytes(form.data).file_name(form.original_name.to_string()),
            )
            .text("chunkNumber", form.chunk_number.to_string())
            .text("totalChunks", form.total_chunks.to_string())
            .text("originalname", form.original_name.to_string())
            .text("model", form.model.to_string())
            .text("uri", credentials.uri.clone())
            .text("userName", credentials.username.clone())
            .text("password", credentials.password.expose_secret().to_string())
            .text("database", credentials.database.clone());

        let response = self.client.post(&url).multipart(body).send().await?;
        Self::read_json(response).await
    }

    async fn extract(&self, form: ExtractForm<'_>) -> Result<serde_json::Value> {
        let url = format!("{}/extract", self.server_url);
        debug!("POST {} for {}", redact_url(&url), form.file_name);

        let response = self.client.post(&url).form(&form.fields()).send().await?;
        Self::read_json(response).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use httpmock::prelude::*;

    pub(crate) fn credentials() -> DbCredentials {
        DbCredentials {
            uri: "neo4j://db:7687".to_string(),
            username: "neo4j".to_string(),
            password: SecretString::from("hunter2".to_string()),
            database: "neo4j".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upload_chunk_sends_multipart_fields() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/upload")
                .body_includes("name=\"chunkNumber\"")
                .body_includes("name=\"originalname\"")
                .body_includes("devis.txt")
                .body_includes("hunter2");
            then.status(200)
                .json_body(serde_json::json!({"status": "Success", "message": "ok"}));
        });

        let creds = credentials();
        let client = IngestClient::new(&server.base_url()).unwrap();
        let reply = client
            .upload_chunk(ChunkForm {
                original_name: "devis.txt",
                chunk_number: 1,
                total_chunks: 1,
                data: b"hello".to_vec(),
                model: "openai-gpt-4o-mini",
                credentials: &creds,
            })
            .await
            .unwrap();

        mock.assert_calls(1);
        assert!(reply.is_success());
    }

    #[tokio::test]
    async fn test_extract_sends_ontology_when_present() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/extract")
                .body_includes("file_name=devis.txt")
                .body_includes("source_type=local+file")
                .body_includes("allowedNodes=Client%2CVille");
            then.status(200)
                .json_body(serde_json::json!({"status": "Success", "data": {"nodeCount": 4}}));
        });

        let creds = credentials();
        let ontology = Ontology {
            allowed_nodes: vec!["Client".to_string(), "Ville".to_string()],
            allowed_relationships: vec![],
        };
        let client = IngestClient::new(&server.base_url()).unwrap();
        let reply = client
            .extract(ExtractForm {
                file_name: "devis.txt",
                model: "openai-gpt-4o-mini",
                source_type: "local file",
                ontology: &ontology,
                credentials: &creds,
            })
            .await
            .unwrap();

        mock.assert_calls(1);
        assert_eq!(reply["data"]["nodeCount"], 4);
    }

    #[tokio::test]
    async fn test_non_json_reply_is_malformed() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/extract");
            then.status(200).body("<html>gateway</html>");
        });

        let creds = credentials();
        let client = IngestClient::new(&server.base_url()).unwrap();
        let err = client
            .extract(ExtractForm {
                file_name: "a.txt",
                model: "m",
                source_type: "local file",
                ontology: &Ontology::default(),
                credentials: &creds,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MalformedReply(_)));
    }

    #[tokio::test]
    async fn test_error_status_without_json_is_api_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/upload");
            then.status(502).body("Bad Gateway");
        });

        let creds = credentials();
        let client = IngestClient::new(&server.base_url()).unwrap();
        let err = client
            .upload_chunk(ChunkForm {
                original_name: "a.txt",
                chunk_number: 1,
                total_chunks: 1,
                data: vec![],
                model: "m",
                credentials: &creds,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Api { status: 502, .. }));
    }

    #[test]
    fn test_extract_fields_omit_empty_ontology() {
        let creds = credentials();
        let ontology = Ontology::default();
        let form = ExtractForm {
            file_name: "a.txt",
            model: "m",
            source_type: "local file",
            ontology: &ontology,
            credentials: &creds,
        };
        let names: Vec<_> = form.fields().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["uri", "userName", "password", "database", "model", "file_name", "source_type"]
        );
    }
}
