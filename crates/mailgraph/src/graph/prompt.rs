//! Built-in knowledge-graph extraction prompts.
//!
//! Templates are plain text with three placeholders: `{allowed_nodes}` and
//! `{allowed_relationships}` receive the ontology lines, `{examples}` receives
//! the template's domain section (empty for the generic template).

use std::borrow::Cow;
use std::path::Path;

use super::error::{GraphError, Result};
use crate::config::Ontology;

const KNOWLEDGE_GRAPH: &str = include_str!("../../prompts/knowledge-graph.md");
const MOVING_COMPANY_EXAMPLE: &str = include_str!("../../prompts/moving-company-example.md");
const MOVING_COMPANY_CONSTRAINTS: &str =
    include_str!("../../prompts/moving-company-constraints.md");

/// First human turn; `{input}` is the chunk text.
pub const HUMAN_PROMPT: &str =
    "Use the given format to extract information from the following input: {input}";
pub const FORMAT_TIP: &str = "Tip: Make sure to answer in the correct format";

const BUILTIN: &[(&str, &str)] = &[
    ("knowledge-graph", ""),
    ("moving-company", MOVING_COMPANY_EXAMPLE),
    ("moving-company-constraints", MOVING_COMPANY_CONSTRAINTS),
];

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: String,
    body: Cow<'static, str>,
    examples: Cow<'static, str>,
}

impl PromptTemplate {
    pub fn builtin(name: &str) -> Option<Self> {
        BUILTIN
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .map(|(builtin, examples)| Self {
                name: builtin.to_string(),
                body: Cow::Borrowed(KNOWLEDGE_GRAPH),
                examples: Cow::Borrowed(*examples),
            })
    }

    /// A built-in name, or a path to a template file of the same shape.
    pub fn load(name_or_path: &str) -> Result<Self> {
        if let Some(template) = Self::builtin(name_or_path) {
            return Ok(template);
        }

        let path = Path::new(name_or_path);
        if !path.is_file() {
            return Err(GraphError::UnknownTemplate(name_or_path.to_string()));
        }
        let body = std::fs::read_to_string(path).map_err(|source| GraphError::TemplateRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            name: name_or_path.to_string(),
            body: Cow::Owned(body),
            examples: Cow::Borrowed(""),
        })
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        BUILTIN.iter().map(|(name, _)| *name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, ontology: &Ontology) -> String {
        let nodes = if ontology.allowed_nodes.is_empty() {
            String::new()
        } else {
            format!("- **Allowed Node Labels:**{}", ontology.allowed_nodes.join(", "))
        };
        let relationships = if ontology.allowed_relationships.is_empty() {
            String::new()
        } else {
            format!(
                "- **Allowed Relationship Types**:{}",
                ontology.allowed_relationships.join(", ")
            )
        };

        self.body
            .replace("{allowed_nodes}", &nodes)
            .replace("{allowed_relationships}", &relationships)
            .replace("{examples}", self.examples.trim_end())
    }
}

pub fn human_prompt(input: &str) -> String {
    HUMAN_PROMPT.replace("{input}", input)
}
