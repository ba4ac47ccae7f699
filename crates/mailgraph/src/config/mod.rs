pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_str, load_effective_config,
    CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE,
};
pub use schema::{
    Config, ExtractionConfig, GraphDbConfig, IngestConfig, MailboxConfig, OAuthConfig,
    OcrConfig, Ontology, ServerConfig,
};
