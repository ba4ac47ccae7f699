//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use mailgraph::config::{Config, Ontology};
use mailgraph::ingest::ChunkCountPolicy;
use mailgraph::SecretRef;

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Defaults suited to tests: no OCR, no settling delay, an inline graph
    /// database password.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.ocr.enabled = false;
        config.ingest.settling_delay_secs = 0;
        config.graph_db.uri = "neo4j://graph.test:7687".to_string();
        config.graph_db.password = SecretRef {
            value: Some("test-password".to_string()),
            ..SecretRef::default()
        };
        Self { config }
    }

    pub fn data_dir(mut self, path: &str) -> Self {
        self.config.data_dir = path.to_string();
        self
    }

    pub fn mailbox_url(mut self, url: &str) -> Self {
        self.config.mailbox.api_base_url = url.to_string();
        self
    }

    pub fn ingest_url(mut self, url: &str) -> Self {
        self.config.ingest.server_url = url.to_string();
        self
    }

    pub fn chunk_size(mut self, size: u64) -> Self {
        self.config.ingest.chunk_size = size;
        self
    }

    pub fn chunk_count(mut self, policy: ChunkCountPolicy) -> Self {
        self.config.ingest.chunk_count = policy;
        self
    }

    pub fn ontology(mut self, nodes: &[&str], relationships: &[&str]) -> Self {
        self.config.ontology = Ontology {
            allowed_nodes: nodes.iter().map(|n| n.to_string()).collect(),
            allowed_relationships: relationships.iter().map(|r| r.to_string()).collect(),
        };
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a Gmail API message in `format=full`.
pub struct MessageBuilder {
    id: String,
    labels: Vec<String>,
    from: String,
    subject: String,
    body: String,
    attachments: Vec<(String, String, String)>,
}

impl MessageBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            labels: vec!["INBOX".to_string(), "CATEGORY_PERSONAL".to_string()],
            from: "Jane Doe <jane@example.com>".to_string(),
            subject: "Devis".to_string(),
            body: format!("Bonjour, message {}", id),
            attachments: Vec::new(),
        }
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn from(mut self, from: &str) -> Self {
        self.from = from.to_string();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    /// Adds an attachment fetched through the attachments endpoint.
    pub fn attachment(mut self, filename: &str, attachment_id: &str, mime_type: &str) -> Self {
        self.attachments.push((
            filename.to_string(),
            attachment_id.to_string(),
            mime_type.to_string(),
        ));
        self
    }

    pub fn build(&self) -> Value {
        let mut parts = vec![json!({
            "partId": "0",
            "mimeType": "text/plain",
            "filename": "",
            "body": { "data": URL_SAFE_NO_PAD.encode(&self.body) }
        })];
        for (i, (filename, attachment_id, mime_type)) in self.attachments.iter().enumerate() {
            parts.push(json!({
                "partId": (i + 1).to_string(),
                "mimeType": mime_type,
                "filename": filename,
                "body": { "attachmentId": attachment_id }
            }));
        }

        json!({
            "id": self.id,
            "labelIds": self.labels,
            "snippet": self.body,
            "internalDate": "1721900000000",
            "sizeEstimate": 2048,
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    { "name": "From", "value": self.from },
                    { "name": "Subject", "value": self.subject }
                ],
                "parts": parts
            }
        })
    }
}

pub fn thread_json(thread_id: &str, messages: &[MessageBuilder]) -> Value {
    json!({
        "id": thread_id,
        "messages": messages.iter().map(|m| {
            let mut message = m.build();
            message["threadId"] = json!(thread_id);
            message
        }).collect::<Vec<_>>()
    })
}

pub fn attachment_json(content: &[u8]) -> Value {
    json!({
        "data": URL_SAFE_NO_PAD.encode(content),
        "size": content.len()
    })
}
