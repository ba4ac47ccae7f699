//! Test harness for isolated end-to-end runs.
//!
//! The `TestHarness` owns a temporary data directory plus two mock HTTP
//! servers: one standing in for the Gmail API (and its token endpoint), one
//! for the knowledge-graph ingestion service.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::json;
use tempfile::TempDir;

use mailgraph::config::Config;
use mailgraph::mailbox::TokenStore;
use mailgraph::pipeline::PollingDriver;
use mailgraph::DataDir;

use super::builders::{attachment_json, thread_json, ConfigBuilder, MessageBuilder};

pub const ACCESS_TOKEN: &str = "test-access-token";

pub struct TestHarness {
    temp_dir: TempDir,
    pub data: DataDir,
    pub gmail: MockServer,
    pub ingest: MockServer,
}

impl TestHarness {
    pub async fn start() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let data = DataDir::new(temp_dir.path().join("data"));
        data.ensure_layout().expect("Failed to create data directory");

        Self {
            temp_dir,
            data,
            gmail: MockServer::start_async().await,
            ingest: MockServer::start_async().await,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Config pointing at the mock servers and the harness data directory.
    pub fn config_builder(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .data_dir(&self.data.root().to_string_lossy())
            .mailbox_url(&self.gmail.base_url())
            .ingest_url(&self.ingest.base_url())
    }

    pub fn config(&self) -> Config {
        self.config_builder().build()
    }

    pub fn token_store(&self) -> Arc<TokenStore> {
        Arc::new(TokenStore::new(self.data.token_path(), None))
    }

    pub fn driver(&self, config: &Config) -> PollingDriver {
        PollingDriver::from_config(
            config,
            self.data.clone(),
            self.token_store(),
            "http://localhost:5000/oauth2callback".to_string(),
        )
        .expect("Failed to build driver")
    }

    /// Writes client secrets whose token endpoint is the mock mailbox server.
    pub fn write_client_secrets(&self) {
        let secrets = json!({
            "installed": {
                "client_id": "test-client",
                "client_secret": "test-secret",
                "token_uri": self.gmail.url("/token")
            }
        });
        std::fs::write(self.data.client_secrets_path(), secrets.to_string())
            .expect("Failed to write client secrets");
    }

    /// Completes the authorization flow with a token valid for decades.
    pub fn authorize(&self) {
        self.write_client_secrets();
        self.write_token(json!({
            "access_token": ACCESS_TOKEN,
            "refresh_token": "test-refresh-token",
            "expires_at": "2099-01-01T00:00:00Z"
        }));
    }

    pub fn write_token(&self, token: serde_json::Value) {
        std::fs::write(self.data.token_path(), token.to_string()).expect("Failed to write token");
    }

    /// Serves one thread listing plus the given threads and attachments.
    pub fn serve_mailbox(
        &self,
        threads: &[(&str, Vec<MessageBuilder>)],
        attachments: &[(&str, &[u8])],
    ) -> Vec<Mock<'_>> {
        let mut mocks = Vec::new();
        let refs: Vec<_> = threads.iter().map(|(id, _)| json!({ "id": id })).collect();
        mocks.push(self.gmail.mock(|when, then| {
            when.method(GET)
                .path("/gmail/v1/users/me/threads")
                .header("authorization", format!("Bearer {}", ACCESS_TOKEN));
            then.status(200).json_body(json!({ "threads": refs }));
        }));

        for (id, messages) in threads {
            let body = thread_json(id, messages);
            mocks.push(self.gmail.mock(|when, then| {
                when.method(GET)
                    .path(format!("/gmail/v1/users/me/threads/{}", id))
                    .query_param("format", "full");
                then.status(200).json_body(body);
            }));
        }

        for (attachment_id, content) in attachments {
            let body = attachment_json(content);
            mocks.push(self.gmail.mock(|when, then| {
                when.method(GET).path_includes(format!("/attachments/{}", attachment_id));
                then.status(200).json_body(body);
            }));
        }
        mocks
    }

    /// Ingestion service that accepts every chunk and every extraction.
    pub fn accept_ingestion(&self) -> (Mock<'_>, Mock<'_>) {
        let upload = self.ingest.mock(|when, then| {
            when.method(POST).path("/upload");
            then.status(200)
                .json_body(json!({ "status": "Success", "message": "Chunk received" }));
        });
        let extract = self.ingest.mock(|when, then| {
            when.method(POST).path("/extract");
            then.status(200)
                .json_body(json!({ "status": "Success", "data": { "nodeCount": 4 } }));
        });
        (upload, extract)
    }

    pub fn message_dir(&self, thread_id: &str, message_id: &str) -> PathBuf {
        self.data.message_dir(thread_id, message_id)
    }

    /// Files directly inside a message folder, sorted.
    pub fn message_files(&self, thread_id: &str, message_id: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.message_dir(thread_id, message_id))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
