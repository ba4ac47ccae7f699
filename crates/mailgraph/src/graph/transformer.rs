//! LLM graph transformer: one chat call per combined chunk, answered with a
//! JSON graph that is then restricted to the ontology.

use std::collections::BTreeSet;
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::combine::CombinedChunk;
use super::error::{GraphError, Result};
use super::prompt::{human_prompt, PromptTemplate, FORMAT_TIP};
use super::provider::ProviderConfig;
use crate::config::Ontology;
use crate::mailbox::client::truncate_error_body;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const OPENAI_URL: &str = "https://api.openai.com/v1";
const GROQ_URL: &str = "https://api.groq.com/openai/v1";
const FIREWORKS_URL: &str = "https://api.fireworks.ai/inference/v1";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub head: String,
    pub head_type: String,
    pub relation: String,
    pub tail: String,
    pub tail_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphDocument {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub source: CombinedChunk,
}

#[derive(Debug, Default, Deserialize)]
struct RawGraph {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

/// Turns one combined chunk into a graph document.
pub trait GraphTransformer: Send + Sync {
    fn convert(&self, chunk: &CombinedChunk) -> Result<GraphDocument>;
}

#[derive(Debug)]
pub enum ChatAuth {
    Bearer(SecretString),
    /// Azure's `api-key` header.
    ApiKey(SecretString),
    None,
}

/// Where and how chat requests are sent.
#[derive(Debug)]
pub enum ChatBackend {
    /// `/chat/completions` shape: OpenAI, Azure, Groq, Fireworks, Ollama.
    OpenAiCompatible {
        url: String,
        model: String,
        auth: ChatAuth,
    },
    Anthropic {
        url: String,
        model: String,
        api_key: SecretString,
    },
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

impl ChatBackend {
    pub fn for_provider(provider: &ProviderConfig) -> Result<Self> {
        let completions = |base: &str| format!("{}/chat/completions", base.trim_end_matches('/'));
        let backend = match provider {
            ProviderConfig::OpenAi(s) => ChatBackend::OpenAiCompatible {
                url: completions(OPENAI_URL),
                model: s.model.clone(),
                auth: ChatAuth::Bearer(copy_secret(&s.api_key)),
            },
            ProviderConfig::Azure(s) => ChatBackend::OpenAiCompatible {
                url: format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    s.endpoint.trim_end_matches('/'),
                    s.deployment,
                    s.api_version
                ),
                model: s.deployment.clone(),
                auth: ChatAuth::ApiKey(copy_secret(&s.api_key)),
            },
            ProviderConfig::Groq(s) => {
                let base = if s.base_url.is_empty() { GROQ_URL } else { s.base_url.as_str() };
                ChatBackend::OpenAiCompatible {
                    url: completions(base),
                    model: s.model.clone(),
                    auth: ChatAuth::Bearer(copy_secret(&s.api_key)),
                }
            }
            ProviderConfig::Fireworks(s) => ChatBackend::OpenAiCompatible {
                url: completions(FIREWORKS_URL),
                model: s.model.clone(),
                auth: ChatAuth::Bearer(copy_secret(&s.api_key)),
            },
            ProviderConfig::Ollama(s) => ChatBackend::OpenAiCompatible {
                url: format!("{}/v1/chat/completions", s.base_url.trim_end_matches('/')),
                model: s.model.clone(),
                auth: ChatAuth::None,
            },
            ProviderConfig::Anthropic(s) => ChatBackend::Anthropic {
                url: ANTHROPIC_URL.to_string(),
                model: s.model.clone(),
                api_key: copy_secret(&s.api_key),
            },
            ProviderConfig::Bedrock(_) | ProviderConfig::Vertex(_) | ProviderConfig::Diffbot(_) => {
                return Err(GraphError::UnsupportedProvider(provider.name()))
            }
        };
        Ok(backend)
    }
}

pub struct ChatGraphTransformer {
    client: Client,
    backend: ChatBackend,
    system_prompt: String,
    ontology: Ontology,
    node_properties: bool,
}

impl ChatGraphTransformer {
    pub fn new(
        backend: ChatBackend,
        template: &PromptTemplate,
        ontology: Ontology,
        node_properties: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GraphError::Request(format!("Failed to create HTTP client: {}", e)))?;

        let system_prompt = format!(
            "{}\n\n{}",
            template.render(&ontology),
            output_format(node_properties)
        );

        Ok(Self {
            client,
            backend,
            system_prompt,
            ontology,
            node_properties,
        })
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn chat(&self, input: &str) -> Result<String> {
        let user_turns = [human_prompt(input), FORMAT_TIP.to_string()];

        let request = match &self.backend {
            ChatBackend::OpenAiCompatible { url, model, auth } => {
                let mut messages = vec![json!({"role": "system", "content": self.system_prompt})];
                messages.extend(
                    user_turns
                        .iter()
                        .map(|turn| json!({"role": "user", "content": turn})),
                );
                let builder = self.client.post(url).json(&json!({
                    "model": model,
                    "temperature": 0,
                    "messages": messages,
                }));
                match auth {
                    ChatAuth::Bearer(key) => builder.bearer_auth(key.expose_secret()),
                    ChatAuth::ApiKey(key) => builder.header("api-key", key.expose_secret()),
                    ChatAuth::None => builder,
                }
            }
            ChatBackend::Anthropic {
                url,
                model,
                api_key,
            } => self
                .client
                .post(url)
                .header("x-api-key", api_key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&json!({
                    "model": model,
                    "max_tokens": ANTHROPIC_MAX_TOKENS,
                    "temperature": 0,
                    "system": self.system_prompt,
                    "messages": [{"role": "user", "content": user_turns.join("\n\n")}],
                })),
        };

        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(GraphError::Api {
                status: status.as_u16(),
                body: truncate_error_body(&body),
            });
        }

        let reply: Value = serde_json::from_str(&body)
            .map_err(|e| GraphError::MalformedResponse(format!("reply is not JSON: {}", e)))?;
        let content = match &self.backend {
            ChatBackend::OpenAiCompatible { .. } => reply.pointer("/choices/0/message/content"),
            ChatBackend::Anthropic { .. } => reply.pointer("/content/0/text"),
        };
        content
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GraphError::MalformedResponse("reply has no message content".to_string()))
    }
}

impl GraphTransformer for ChatGraphTransformer {
    fn convert(&self, chunk: &CombinedChunk) -> Result<GraphDocument> {
        let _span = tracing::info_span!("graph.convert", chunks = chunk.chunk_ids.len()).entered();
        let content = self.chat(&chunk.text)?;
        debug!("Transformer reply: {} chars", content.len());
        parse_graph(&content, &self.ontology, self.node_properties, chunk.clone())
    }
}

fn output_format(node_properties: bool) -> String {
    let properties = if node_properties {
        r#", "properties": {"description": "<short description from the text>"}"#
    } else {
        ""
    };
    format!(
        "## Output Format\nAnswer with a single JSON object and nothing else:\n\
         {{\"nodes\": [{{\"id\": \"<name>\", \"type\": \"<label>\"{}}}], \
         \"relationships\": [{{\"head\": \"<node id>\", \"head_type\": \"<label>\", \
         \"relation\": \"<TYPE>\", \"tail\": \"<node id>\", \"tail_type\": \"<label>\"}}]}}",
        properties
    )
}

/// Parses the model's answer, tolerating text or code fences around the
/// JSON object, and keeps only what the ontology allows. Relationship
/// endpoints missing from the node list are added as nodes.
pub fn parse_graph(
    content: &str,
    ontology: &Ontology,
    node_properties: bool,
    source: CombinedChunk,
) -> Result<GraphDocument> {
    let start = content.find('{');
    let end = content.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => {
            return Err(GraphError::MalformedResponse(
                "no JSON object in model output".to_string(),
            ))
        }
    };
    let raw: RawGraph = serde_json::from_str(json)
        .map_err(|e| GraphError::MalformedResponse(format!("invalid graph JSON: {}", e)))?;

    let relationships: Vec<Relationship> = raw
        .relationships
        .into_iter()
        .filter(|r| {
            ontology.allows_relationship(&r.relation)
                && ontology.allows_node(&r.head_type)
                && ontology.allows_node(&r.tail_type)
        })
        .collect();

    let mut seen = BTreeSet::new();
    let mut nodes = Vec::new();
    for mut node in raw.nodes {
        if !ontology.allows_node(&node.label) || !seen.insert((node.id.clone(), node.label.clone())) {
            continue;
        }
        if !node_properties {
            node.properties.clear();
        }
        nodes.push(node);
    }
    for r in &relationships {
        for (id, label) in [(&r.head, &r.head_type), (&r.tail, &r.tail_type)] {
            if seen.insert((id.clone(), label.clone())) {
                nodes.push(Node {
                    id: id.clone(),
                    label: label.clone(),
                    properties: Map::new(),
                });
            }
        }
    }

    Ok(GraphDocument {
        nodes,
        relationships,
        source,
    })
}
