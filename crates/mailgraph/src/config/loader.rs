use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::SecretRef;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub const CONFIG_ENV_VAR: &str = "MAILGRAPH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "mailgraph.json";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Resolves the config the daemon runs with.
///
/// `.env` is loaded first. The file is taken from `explicit`, then
/// `MAILGRAPH_CONFIG`, then `./mailgraph.json`; a missing default file means
/// built-in defaults. Environment overrides are applied last.
pub fn load_effective_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    if let Ok(path) = dotenvy::dotenv() {
        log::debug!("Loaded environment from {}", path.display());
    }

    let from_env = std::env::var_os(CONFIG_ENV_VAR).map(std::path::PathBuf::from);
    let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => load_config(&path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => load_config(DEFAULT_CONFIG_FILE)?,
        None => {
            log::info!("No config file found, using defaults");
            Config::default()
        }
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies the environment variables the ingestion service conventionally
/// shares with this pipeline (`SERVER_URL`, `NEO4J_*`, ...).
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = var("SERVER_URL") {
        config.ingest.server_url = url;
    }
    if let Some(uri) = var("NEO4J_URI") {
        config.graph_db.uri = uri;
    }
    if let Some(user) = var("NEO4J_USERNAME") {
        config.graph_db.username = user;
    }
    if var("NEO4J_PASSWORD").is_some() {
        config.graph_db.password = SecretRef::from_env("NEO4J_PASSWORD");
    }
    if let Some(database) = var("NEO4J_DATABASE") {
        config.graph_db.database = database;
    }
    if let Some(dir) = var("MAILGRAPH_DATA_DIR") {
        config.data_dir = dir;
    }
    if let Some(raw) = var("NUMBER_OF_CHUNKS_TO_COMBINE") {
        config.extraction.chunks_to_combine =
            raw.trim().parse().map_err(|e| ConfigError::InvalidEnv {
                name: "NUMBER_OF_CHUNKS_TO_COMBINE".to_string(),
                reason: format!("{}", e),
            })?;
    }

    Ok(())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.version != "1.0" {
        return invalid(format!("Unsupported config version: {}", config.version));
    }
    if config.poll_interval_secs == 0 {
        return invalid("poll_interval_secs must be greater than 0".to_string());
    }
    if config.ingest.chunk_size == 0 {
        return invalid("ingest.chunk_size must be greater than 0".to_string());
    }
    if config.extraction.max_workers == 0 {
        return invalid("extraction.max_workers must be greater than 0".to_string());
    }
    if config.extraction.chunks_to_combine == 0 {
        return invalid("extraction.chunks_to_combine must be greater than 0".to_string());
    }
    if !config.ingest.server_url.starts_with("http://")
        && !config.ingest.server_url.starts_with("https://")
    {
        return invalid(format!(
            "ingest.server_url must be an http(s) URL: {}",
            config.ingest.server_url
        ));
    }

    Ok(())
}
