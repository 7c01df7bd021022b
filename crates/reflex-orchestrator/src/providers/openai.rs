//! Code generation through an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{api_key_from_env, http_client, normalize_base_url, snippet, transport_error_kind};
use crate::collaborator::CodeGenerator;
use crate::config::LlmConfig;
use crate::conversation::ConversationTurn;
use crate::error::{ProviderErrorKind, ReflexError, Result};
use crate::solution::Solution;

/// System prompt prepended to every request.
pub const SYSTEM_PROMPT: &str = "You are a coding assistant. Ensure any code you provide can be \
executed with all required imports and variables defined. Structure your answer: 1) a prefix \
describing the code solution, 2) the imports, 3) the functioning code block. Here is the user question:";

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Asks a chat model for a structured `{prefix, imports, code}` solution.
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    /// Creates a generator with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::GeneratorUnavailable` if the HTTP client cannot
    /// be built.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = http_client(config.timeout_seconds).map_err(|e| {
            ReflexError::generator_unavailable(ProviderErrorKind::Other, e.to_string())
        })?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.base_url),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Creates a generator reading the API key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns `ReflexError::MissingApiKey` if the variable is unset or empty.
    pub fn from_env(config: &LlmConfig) -> Result<Self> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    /// Returns the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, conversation: &[ConversationTurn]) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": SYSTEM_PROMPT })];
        messages.extend(conversation.iter().map(|turn| {
            json!({
                "role": turn.role().to_string(),
                "content": turn.content(),
            })
        }));

        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "code",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {
                            "prefix": {
                                "type": "string",
                                "description": "Description of the problem and approach"
                            },
                            "imports": {
                                "type": "string",
                                "description": "Code block import statements"
                            },
                            "code": {
                                "type": "string",
                                "description": "Code block not including import statements"
                            }
                        },
                        "required": ["prefix", "imports", "code"],
                        "additionalProperties": false
                    }
                }
            }
        })
    }
}

/// Parses the structured solution out of a chat completion body.
fn parse_solution(response: ChatCompletionResponse) -> Result<Solution> {
    let malformed = |message: String| {
        ReflexError::generator_unavailable(ProviderErrorKind::MalformedResponse, message)
    };

    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| malformed("response contained no choices".to_string()))?;

    if let Some(refusal) = message.refusal {
        return Err(malformed(format!("model refused: {refusal}")));
    }

    let content = message
        .content
        .ok_or_else(|| malformed("response message had no content".to_string()))?;

    serde_json::from_str::<Solution>(&content)
        .map_err(|e| malformed(format!("content is not a {{prefix, imports, code}} object: {e}")))
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(model = %self.model, turns = conversation.len()))]
    async fn generate(&self, conversation: &[ConversationTurn]) -> Result<Solution> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(conversation))
            .send()
            .await
            .map_err(|e| {
                ReflexError::generator_unavailable(transport_error_kind(&e), e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReflexError::generator_unavailable(
                ProviderErrorKind::from_status(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), snippet(&body)),
            ));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            ReflexError::generator_unavailable(ProviderErrorKind::MalformedResponse, e.to_string())
        })?;

        let solution = parse_solution(body)?;
        debug!(
            imports_len = solution.imports.len(),
            code_len = solution.code.len(),
            "Received structured solution"
        );
        Ok(solution)
    }
}
