use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ingest::ChunkCountPolicy;
use crate::secrets::SecretRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub graph_db: GraphDbConfig,
    #[serde(default)]
    pub ontology: Ontology,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            mailbox: MailboxConfig::default(),
            ocr: OcrConfig::default(),
            ingest: IngestConfig::default(),
            graph_db: GraphDbConfig::default(),
            ontology: Ontology::default(),
            extraction: ExtractionConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(crate::secrets::expand_home(&self.data_dir))
    }

    /// Copy of the config that is safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.graph_db.uri = crate::sanitize::redact_url(&copy.graph_db.uri);
        copy.graph_db.password = copy.graph_db.password.redacted();
        copy.mailbox.oauth.client_secret = copy.mailbox.oauth.client_secret.redacted();
        copy
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("mailgraph").to_string_lossy().to_string())
        .unwrap_or_else(|| "./mailgraph-data".to_string())
}

fn default_poll_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Label a message must carry to be retrieved.
    #[serde(default = "default_category_label")]
    pub category_label: String,
    /// Label ids passed to the thread listing call. Empty lists every thread.
    #[serde(default)]
    pub list_label_ids: Vec<String>,
    #[serde(default = "default_max_threads")]
    pub max_threads: u32,
    #[serde(default)]
    pub oauth: OAuthConfig,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            category_label: default_category_label(),
            list_label_ids: Vec::new(),
            max_threads: default_max_threads(),
            oauth: OAuthConfig::default(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://gmail.googleapis.com".to_string()
}

fn default_category_label() -> String {
    "CATEGORY_PERSONAL".to_string()
}

fn default_max_threads() -> u32 {
    60
}

/// OAuth settings. Client id and secret normally come from the uploaded
/// `credentials.json`; values here override it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: SecretRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Output with this many trimmed characters or fewer counts as no text.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    #[serde(default = "default_ocr_extensions")]
    pub extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

fn default_min_text_chars() -> usize {
    20
}

fn default_ocr_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "pdf"].iter().map(|s| s.to_string()).collect()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: default_languages(),
            dpi: default_dpi(),
            min_text_chars: default_min_text_chars(),
            extensions: default_ocr_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub chunk_count: ChunkCountPolicy,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_settling_delay_secs")]
    pub settling_delay_secs: u64,
    #[serde(default = "default_source_type")]
    pub source_type: String,
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_model() -> String {
    "openai-gpt-4o-mini".to_string()
}

fn default_settling_delay_secs() -> u64 {
    20
}

fn default_source_type() -> String {
    "local file".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            chunk_count: ChunkCountPolicy::default(),
            model: default_model(),
            settling_delay_secs: default_settling_delay_secs(),
            source_type: default_source_type(),
        }
    }
}

/// Connection parameters for the graph database, forwarded to the ingestion
/// service with every upload and extract call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDbConfig {
    #[serde(default = "default_graph_uri")]
    pub uri: String,
    #[serde(default = "default_graph_user")]
    pub username: String,
    #[serde(default = "default_graph_password")]
    pub password: SecretRef,
    #[serde(default = "default_graph_database")]
    pub database: String,
}

fn default_graph_uri() -> String {
    "neo4j://localhost:7687".to_string()
}

fn default_graph_user() -> String {
    "neo4j".to_string()
}

fn default_graph_password() -> SecretRef {
    SecretRef::from_env("NEO4J_PASSWORD")
}

fn default_graph_database() -> String {
    "neo4j".to_string()
}

impl Default for GraphDbConfig {
    fn default() -> Self {
        Self {
            uri: default_graph_uri(),
            username: default_graph_user(),
            password: default_graph_password(),
            database: default_graph_database(),
        }
    }
}

/// Allowed node labels and relationship types for graph extraction.
/// Empty lists leave the extraction unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ontology {
    #[serde(default)]
    pub allowed_nodes: Vec<String>,
    #[serde(default)]
    pub allowed_relationships: Vec<String>,
}

impl Ontology {
    pub fn is_empty(&self) -> bool {
        self.allowed_nodes.is_empty() && self.allowed_relationships.is_empty()
    }

    pub fn allows_node(&self, label: &str) -> bool {
        self.allowed_nodes.is_empty()
            || self
                .allowed_nodes
                .iter()
                .any(|n| n.eq_ignore_ascii_case(label))
    }

    pub fn allows_relationship(&self, kind: &str) -> bool {
        self.allowed_relationships.is_empty()
            || self
                .allowed_relationships
                .iter()
                .any(|r| r.eq_ignore_ascii_case(kind))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Number of text chunks joined into one transformer request.
    #[serde(default = "default_chunks_to_combine")]
    pub chunks_to_combine: usize,
    /// Characters per text chunk before combining.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_chunks_to_combine() -> usize {
    1
}

fn default_chunk_chars() -> usize {
    4000
}

fn default_max_workers() -> usize {
    10
}

fn default_prompt_template() -> String {
    "knowledge-graph".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunks_to_combine: default_chunks_to_combine(),
            chunk_chars: default_chunk_chars(),
            max_workers: default_max_workers(),
            prompt_template: default_prompt_template(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest request body accepted by the upload routes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}
