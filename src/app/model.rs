use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Company or gateway serving a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Meta,
    LiteLlm,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Meta,
        ProviderKind::LiteLlm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Meta => "meta",
            ProviderKind::LiteLlm => "litellm",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider '{0}', expected one of openai, anthropic, meta, litellm")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// What a model is tuned for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    General,
    Coding,
    Creative,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [ModelType::General, ModelType::Coding, ModelType::Creative];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::General => "general",
            ModelType::Coding => "coding",
            ModelType::Creative => "creative",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown model type '{0}', expected one of general, coding, creative")]
pub struct UnknownModelType(pub String);

impl FromStr for ModelType {
    type Err = UnknownModelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownModelType(s.to_string()))
    }
}

/// A registered model. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub model_name: String,
    pub provider: ProviderKind,
    pub max_tokens: u32,
    #[serde(rename = "type", default)]
    pub model_type: ModelType,
}

impl ModelInfo {
    /// A general-purpose model.
    pub fn new(id: &str, model_name: &str, provider: ProviderKind, max_tokens: u32) -> Self {
        Self {
            id: id.to_string(),
            model_name: model_name.to_string(),
            provider,
            max_tokens,
            model_type: ModelType::General,
        }
    }

    #[must_use]
    pub fn with_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Admin,
}

/// Largest `max_tokens` a free-tier user may request.
pub const FREE_TIER_MAX_TOKENS: u32 = 1000;

/// An API principal with its token accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub tier: Tier,
    pub tokens_used: u64,
    pub token_limit: u64,
}

impl User {
    pub fn remaining_tokens(&self) -> u64 {
        self.token_limit.saturating_sub(self.tokens_used)
    }

    pub fn is_admin(&self) -> bool {
        self.tier == Tier::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

/// Body of `POST /chat/completions` and `POST /providers/{provider_id}/chat`.
///
/// Ranges are enforced by the request schema before deserialization:
/// `temperature` in `0.0..=2.0`, `max_tokens` strictly between 1 and 4096.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Whitespace-separated words across every message.
    pub fn input_tokens(&self) -> u64 {
        self.messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum()
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub content: String,
    pub tokens_used: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub id: u64,
    pub title: String,
    #[serde(skip)]
    pub owner_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConversation {
    pub title: String,
}
