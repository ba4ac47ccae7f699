//! LLM provider registry.
//!
//! The model id passed to extraction (e.g. `openai-gpt-4o-mini`,
//! `anthropic_claude_3_5_sonnet`) selects a provider by substring. Providers
//! other than OpenAI, Vertex and Diffbot read their settings from
//! `LLM_MODEL_CONFIG_<model id>` as comma-separated values.

use secrecy::SecretString;

use super::error::{GraphError, Result};

pub const MODEL_CONFIG_PREFIX: &str = "LLM_MODEL_CONFIG_";

/// Short model ids mapped to the provider's model names.
const MODEL_VERSIONS: &[(&str, &str)] = &[
    ("openai-gpt-3.5", "gpt-3.5-turbo-16k"),
    ("openai-gpt-4", "gpt-4-0125-preview"),
    ("openai-gpt-4o", "gpt-4o"),
    ("openai-gpt-4o-mini", "gpt-4o-mini"),
    ("gemini-1.0-pro", "gemini-1.0-pro-001"),
    ("gemini-1.5-pro", "gemini-1.5-pro-preview-0514"),
];

#[derive(Debug)]
pub struct OpenAiSettings {
    pub model: String,
    pub api_key: SecretString,
}

#[derive(Debug)]
pub struct AzureSettings {
    pub deployment: String,
    pub endpoint: String,
    pub api_key: SecretString,
    pub api_version: String,
}

/// Shared by Anthropic and Fireworks: `model,key`.
#[derive(Debug)]
pub struct KeyedSettings {
    pub model: String,
    pub api_key: SecretString,
}

#[derive(Debug)]
pub struct GroqSettings {
    pub model: String,
    pub base_url: String,
    pub api_key: SecretString,
}

#[derive(Debug)]
pub struct BedrockSettings {
    pub model: String,
    pub access_key: String,
    pub secret_key: SecretString,
    pub region: String,
}

#[derive(Debug)]
pub struct OllamaSettings {
    pub model: String,
    pub base_url: String,
}

#[derive(Debug)]
pub struct VertexSettings {
    pub model: String,
}

#[derive(Debug)]
pub struct DiffbotSettings {
    pub api_key: Option<SecretString>,
}

#[derive(Debug)]
pub enum ProviderConfig {
    OpenAi(OpenAiSettings),
    Azure(AzureSettings),
    Anthropic(KeyedSettings),
    Fireworks(KeyedSettings),
    Groq(GroqSettings),
    Bedrock(BedrockSettings),
    Ollama(OllamaSettings),
    Vertex(VertexSettings),
    Diffbot(DiffbotSettings),
}

impl ProviderConfig {
    pub fn from_env(model_id: &str) -> Result<Self> {
        Self::resolve(model_id, |name| std::env::var(name).ok())
    }

    /// Selects and parses the provider for `model_id`, reading variables
    /// through `lookup`.
    pub fn resolve<F>(model_id: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = format!("{}{}", MODEL_CONFIG_PREFIX, model_id);
        let settings = || -> Result<Vec<String>> {
            lookup(&var)
                .map(|value| value.split(',').map(|s| s.trim().to_string()).collect())
                .ok_or_else(|| GraphError::MissingEnv(var.clone()))
        };
        let expect = |values: Vec<String>, expected: usize| -> Result<Vec<String>> {
            if values.len() == expected {
                Ok(values)
            } else {
                Err(GraphError::InvalidProviderConfig {
                    var: var.clone(),
                    expected,
                    found: values.len(),
                })
            }
        };

        if model_id.contains("gemini") {
            return Ok(ProviderConfig::Vertex(VertexSettings {
                model: model_name(model_id),
            }));
        }

        if model_id.contains("openai") {
            let api_key = lookup("OPENAI_API_KEY")
                .ok_or_else(|| GraphError::MissingEnv("OPENAI_API_KEY".to_string()))?;
            return Ok(ProviderConfig::OpenAi(OpenAiSettings {
                model: model_name(model_id),
                api_key: SecretString::from(api_key),
            }));
        }

        let provider = if model_id.contains("azure") {
            let [deployment, endpoint, key, api_version] = take::<4>(expect(settings()?, 4)?);
            ProviderConfig::Azure(AzureSettings {
                deployment,
                endpoint,
                api_key: SecretString::from(key),
                api_version,
            })
        } else if model_id.contains("anthropic") {
            let [model, key] = take::<2>(expect(settings()?, 2)?);
            ProviderConfig::Anthropic(KeyedSettings {
                model,
                api_key: SecretString::from(key),
            })
        } else if model_id.contains("fireworks") {
            let [model, key] = take::<2>(expect(settings()?, 2)?);
            ProviderConfig::Fireworks(KeyedSettings {
                model,
                api_key: SecretString::from(key),
            })
        } else if model_id.contains("groq") {
            let [model, base_url, key] = take::<3>(expect(settings()?, 3)?);
            ProviderConfig::Groq(GroqSettings {
                model,
                base_url,
                api_key: SecretString::from(key),
            })
        } else if model_id.contains("bedrock") {
            let [model, access_key, secret, region] = take::<4>(expect(settings()?, 4)?);
            ProviderConfig::Bedrock(BedrockSettings {
                model,
                access_key,
                secret_key: SecretString::from(secret),
                region,
            })
        } else if model_id.contains("ollama") {
            let [model, base_url] = take::<2>(expect(settings()?, 2)?);
            ProviderConfig::Ollama(OllamaSettings { model, base_url })
        } else {
            ProviderConfig::Diffbot(DiffbotSettings {
                api_key: lookup("DIFFBOT_API_KEY").map(SecretString::from),
            })
        };
        Ok(provider)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::OpenAi(_) => "openai",
            ProviderConfig::Azure(_) => "azure",
            ProviderConfig::Anthropic(_) => "anthropic",
            ProviderConfig::Fireworks(_) => "fireworks",
            ProviderConfig::Groq(_) => "groq",
            ProviderConfig::Bedrock(_) => "bedrock",
            ProviderConfig::Ollama(_) => "ollama",
            ProviderConfig::Vertex(_) => "vertex",
            ProviderConfig::Diffbot(_) => "diffbot",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::OpenAi(s) => &s.model,
            ProviderConfig::Azure(s) => &s.deployment,
            ProviderConfig::Anthropic(s) | ProviderConfig::Fireworks(s) => &s.model,
            ProviderConfig::Groq(s) => &s.model,
            ProviderConfig::Bedrock(s) => &s.model,
            ProviderConfig::Ollama(s) => &s.model,
            ProviderConfig::Vertex(s) => &s.model,
            ProviderConfig::Diffbot(_) => "diffbot",
        }
    }

    /// Local models are not asked for node properties.
    pub fn supports_node_properties(&self) -> bool {
        !matches!(self, ProviderConfig::Ollama(_))
    }
}

fn model_name(model_id: &str) -> String {
    MODEL_VERSIONS
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| model_id.trim_start_matches("openai-").to_string())
}

/// Moves exactly `N` values out of a vector already checked to have that length.
fn take<const N: usize>(values: Vec<String>) -> [String; N] {
    let mut iter = values.into_iter();
    std::array::from_fn(|_| iter.next().unwrap_or_default())
}
