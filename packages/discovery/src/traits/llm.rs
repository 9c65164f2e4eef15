//! LLM trait for structured field extraction.
//!
//! Summaries, branding, JSON extraction and schema-driven extract jobs
//! all go through the same call: hand the model some page content and a
//! list of fields, get back a map of field values. Only the field specs
//! and the prompt differ between use cases.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::LlmResult;

/// JSON type of an extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    /// JSON schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }

    fn from_schema_type(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("number") | Some("integer") => FieldKind::Number,
            Some("boolean") => FieldKind::Boolean,
            Some("array") => FieldKind::Array,
            Some("object") => FieldKind::Object,
            _ => FieldKind::String,
        }
    }
}

/// One field the model should fill in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Full sub-schema for object/array fields, passed through verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl FieldSpec {
    /// A required string field.
    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: FieldKind::String,
            required: true,
            schema: None,
        }
    }

    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Derive field specs from the top-level properties of a JSON schema.
    ///
    /// A schema without `properties` yields a single required `data`
    /// field carrying the whole schema.
    pub fn from_json_schema(schema: &Value) -> Vec<FieldSpec> {
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return vec![FieldSpec {
                name: "data".to_string(),
                description: "Data matching the provided schema".to_string(),
                kind: FieldKind::from_schema_type(schema.get("type")),
                required: true,
                schema: Some(schema.clone()),
            }];
        };

        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        properties
            .iter()
            .map(|(name, prop)| {
                let kind = FieldKind::from_schema_type(prop.get("type"));
                FieldSpec {
                    name: name.clone(),
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    kind,
                    required: required.contains(&name.as_str()),
                    schema: matches!(kind, FieldKind::Array | FieldKind::Object)
                        .then(|| prop.clone()),
                }
            })
            .collect()
    }
}

/// A structured extraction call.
#[derive(Debug, Clone)]
pub struct FieldRequest {
    /// Page the content came from (for grounding and logging)
    pub url: String,
    pub content: String,
    pub fields: Vec<FieldSpec>,
    pub prompt: Option<String>,
    pub timeout: Duration,
}

impl FieldRequest {
    pub fn new(url: impl Into<String>, content: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            fields,
            prompt: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Values returned by the model, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldResponse {
    pub fields: Map<String, Value>,
}

impl FieldResponse {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// True when the model produced no usable value at all.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(is_blank)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.values().all(is_blank),
        _ => false,
    }
}

/// LLM client trait.
///
/// Implementations wrap specific providers and handle prompting and
/// response parsing; callers only see field maps.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Extract the requested fields from the content.
    async fn extract_fields(&self, request: &FieldRequest) -> LlmResult<FieldResponse>;

    /// Get the client name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}
