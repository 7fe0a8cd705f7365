//! JSON Schemas for request bodies, compiled once when the state is built.
//!
//! Each top-level property is compiled into its own validator so that a
//! rejection can name the offending field.

use anyhow::anyhow;
use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{ApiError, FieldError};

pub fn chat_request_schema() -> Value {
    json!({
        "type": "object",
        "required": ["messages"],
        "properties": {
            "model": { "type": ["string", "null"], "minLength": 1 },
            "messages": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["role", "content"],
                    "properties": {
                        "role": { "enum": ["user", "assistant", "system"] },
                        "content": { "type": "string" }
                    }
                }
            },
            "temperature": { "type": "number", "minimum": 0.0, "maximum": 2.0 },
            "max_tokens": { "type": "integer", "exclusiveMinimum": 1, "exclusiveMaximum": 4096 }
        }
    })
}

pub fn model_info_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "model_name", "provider", "max_tokens"],
        "properties": {
            "id": { "type": "string", "minLength": 1, "pattern": "^[A-Za-z0-9._-]+$" },
            "model_name": { "type": "string", "minLength": 1 },
            "provider": { "enum": ["openai", "anthropic", "meta", "litellm"] },
            "max_tokens": { "type": "integer", "minimum": 1 },
            "type": { "enum": ["general", "coding", "creative"] }
        }
    })
}

pub fn new_conversation_schema() -> Value {
    json!({
        "type": "object",
        "required": ["title"],
        "properties": {
            "title": { "type": "string", "minLength": 1, "maxLength": 200 }
        }
    })
}

/// Compiled object schema: required names plus one validator per property.
pub struct BodySchema {
    required: Vec<String>,
    properties: Vec<(String, Validator)>,
}

impl BodySchema {
    pub fn compile(schema: &Value) -> anyhow::Result<Self> {
        let required = schema["required"]
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut properties = Vec::new();
        if let Some(props) = schema["properties"].as_object() {
            for (name, sub) in props {
                let validator = jsonschema::validator_for(sub)
                    .map_err(|e| anyhow!("invalid schema for property `{name}`: {e}"))?;
                properties.push((name.clone(), validator));
            }
        }
        Ok(Self {
            required,
            properties,
        })
    }

    /// Collect every violation; `Ok` only when there are none.
    pub fn check(&self, body: &Value) -> Result<(), ApiError> {
        let Some(object) = body.as_object() else {
            return Err(ApiError::invalid_field("body", "expected a JSON object"));
        };

        let mut details: Vec<FieldError> = self
            .required
            .iter()
            .filter(|name| !object.contains_key(name.as_str()))
            .map(|name| FieldError::new(name.as_str(), "field required"))
            .collect();

        for (name, validator) in &self.properties {
            if let Some(value) = object.get(name) {
                details.extend(
                    validator
                        .iter_errors(value)
                        .map(|e| FieldError::new(name.as_str(), e.to_string())),
                );
            }
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation("Request body failed validation", details))
        }
    }

    /// Check, then deserialize into `T`.
    pub fn parse<T: DeserializeOwned>(&self, body: Value) -> Result<T, ApiError> {
        self.check(&body)?;
        serde_json::from_value(body)
            .map_err(|e| ApiError::invalid_field("body", e.to_string()))
    }
}

/// Every body schema the service uses.
pub struct Schemas {
    pub chat_request: BodySchema,
    pub model_info: BodySchema,
    pub new_conversation: BodySchema,
}

impl Schemas {
    pub fn compile() -> anyhow::Result<Self> {
        Ok(Self {
            chat_request: BodySchema::compile(&chat_request_schema())?,
            model_info: BodySchema::compile(&model_info_schema())?,
            new_conversation: BodySchema::compile(&new_conversation_schema())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::model::ChatRequest;

    fn chat() -> BodySchema {
        BodySchema::compile(&chat_request_schema()).unwrap()
    }

    fn fields(err: ApiError) -> Vec<String> {
        match err {
            ApiError::Validation { details, .. } => details.into_iter().map(|d| d.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_chat_body_parses() {
        let req: ChatRequest = chat()
            .parse(json!({
                "model": "gpt-4",
                "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}],
                "max_tokens": 4095
            }))
            .unwrap();
        assert_eq!(req.max_tokens, 4095);
        assert_eq!(req.messages.len(), 2);
    }

    #[test]
    fn test_missing_messages() {
        let err = chat().check(&json!({"model": "gpt-4"})).unwrap_err();
        assert_eq!(fields(err), vec!["messages"]);
    }

    #[test]
    fn test_range_violations_name_fields() {
        let err = chat()
            .check(&json!({
                "messages": [{"role": "robot", "content": "x"}],
                "temperature": 2.5,
                "max_tokens": 1
            }))
            .unwrap_err();
        let mut names = fields(err);
        names.sort();
        assert_eq!(names, vec!["max_tokens", "messages", "temperature"]);
    }

    #[test]
    fn test_max_tokens_upper_bound_is_exclusive() {
        assert!(chat()
            .check(&json!({"messages": [{"role": "user", "content": "x"}], "max_tokens": 4096}))
            .is_err());
    }

    #[test]
    fn test_non_object_body() {
        assert!(chat().check(&json!([1, 2])).is_err());
    }
}
