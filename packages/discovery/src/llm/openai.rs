//! OpenAI implementation of the LlmClient trait.
//!
//! Field requests are turned into a `json_schema` response format so the
//! model answers with exactly one JSON object keyed by field name.
//!
//! # Example
//!
//! ```rust,ignore
//! use discovery::llm::OpenAiClient;
//!
//! let llm = OpenAiClient::new("sk-...").with_model("gpt-4o-mini");
//! let response = llm.extract_fields(&request).await?;
//! ```

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{LlmError, LlmResult};
use crate::traits::llm::{FieldRequest, FieldResponse, FieldSpec, LlmClient};

/// Characters of page content sent to the model.
const MAX_CONTENT_CHARS: usize = 48_000;

/// Characters of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 500;

const SYSTEM_PROMPT: &str = "You extract structured data from web page content. \
Only use facts stated in the content. Use null for anything that is not present.";

/// OpenAI-based LLM client.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct StructuredRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: SecretString::from(api_key.into()),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Set the chat model (default: gpt-4o-mini).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn field_schema(field: &FieldSpec) -> Value {
    let mut schema = match &field.schema {
        Some(schema) => schema.clone(),
        None => json!({ "type": field.kind.as_str() }),
    };
    if let Some(obj) = schema.as_object_mut() {
        if !field.description.is_empty() {
            obj.insert("description".into(), Value::String(field.description.clone()));
        }
        if !field.required {
            let kind = obj
                .get("type")
                .cloned()
                .unwrap_or_else(|| Value::String(field.kind.as_str().to_string()));
            obj.insert("type".into(), json!([kind, "null"]));
        }
    }
    schema
}

/// JSON schema for the response object.
///
/// Strict mode needs every property listed as required, so optional
/// fields are expressed as nullable instead. Caller-supplied sub-schemas
/// may not satisfy strict mode, so their presence turns it off.
pub(crate) fn response_schema(fields: &[FieldSpec]) -> (Value, bool) {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| (f.name.clone(), field_schema(f)))
        .collect();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    let strict = fields.iter().all(|f| f.schema.is_none());

    (
        json!({
            "type": "object",
            "properties": properties,
            "required": names,
            "additionalProperties": false,
        }),
        strict,
    )
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn parse_fields(content: &str) -> LlmResult<Map<String, Value>> {
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(LlmError::InvalidResponse(format!(
            "expected JSON object, got {}",
            match other {
                Value::Array(_) => "array",
                Value::String(_) => "string",
                _ => "scalar",
            }
        ))),
        Err(e) => Err(LlmError::InvalidResponse(e.to_string())),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn extract_fields(&self, request: &FieldRequest) -> LlmResult<FieldResponse> {
        if request.fields.is_empty() {
            return Err(LlmError::Config("no fields requested".into()));
        }

        let (schema, strict) = response_schema(&request.fields);
        let mut user = String::new();
        if let Some(prompt) = &request.prompt {
            user.push_str(prompt);
            user.push_str("\n\n");
        }
        user.push_str(&format!(
            "URL: {}\n\nContent:\n{}",
            request.url,
            truncate(&request.content, MAX_CONTENT_CHARS)
        ));

        let body = StructuredRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "extracted_fields",
                    "strict": strict,
                    "schema": schema,
                }
            }),
        };

        debug!(url = %request.url, model = %self.model, fields = request.fields.len(), "LLM extraction");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Request(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate(&error_text, MAX_ERROR_BODY).to_string(),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.without_url().to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no response from OpenAI".into()))?;

        parse_fields(&content).map(FieldResponse::new)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
