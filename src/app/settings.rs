use std::fmt;

use serde::Serialize;

use super::model::ProviderKind;
use crate::config::{parse_var, process_env, string_var, ConfigError};

/// Request-time application settings.
///
/// Loaded by the settings step once per request, then shared by every step
/// and handler that needs it.
#[derive(Clone, PartialEq)]
pub struct Settings {
    pub app_name: String,
    pub default_model: String,
    pub temperature: f64,
    /// Ceiling for `max_tokens` on any chat request.
    pub max_tokens: u32,
    /// Requests per user per minute; zero disables the limiter.
    pub rate_limit: u32,
    pub openai_api_key: String,
    pub anthropic_api_key: String,
    pub litellm_api_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "GenAI Backend".to_string(),
            default_model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 8192,
            rate_limit: 10,
            openai_api_key: "sk-test-key".to_string(),
            anthropic_api_key: "ant-test-key".to_string(),
            litellm_api_key: "lite-test-key".to_string(),
        }
    }
}

// Keys must never reach a log line through `{:?}`.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("app_name", &self.app_name)
            .field("default_model", &self.default_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            app_name: string_var(lookup, "GENAI_APP_NAME", &d.app_name),
            default_model: string_var(lookup, "GENAI_DEFAULT_MODEL", &d.default_model),
            temperature: parse_var(lookup, "GENAI_TEMPERATURE", d.temperature)?,
            max_tokens: parse_var(lookup, "GENAI_MAX_TOKENS", d.max_tokens)?,
            rate_limit: parse_var(lookup, "GENAI_RATE_LIMIT", d.rate_limit)?,
            openai_api_key: string_var(lookup, "OPENAI_API_KEY", &d.openai_api_key),
            anthropic_api_key: string_var(lookup, "ANTHROPIC_API_KEY", &d.anthropic_api_key),
            litellm_api_key: string_var(lookup, "LITELLM_API_KEY", &d.litellm_api_key),
        })
    }

    /// Configured key for `provider`. `None` for providers that need no key;
    /// `Some("")` when a key is required but unset.
    pub fn api_key_for(&self, provider: ProviderKind) -> Option<&str> {
        match provider {
            ProviderKind::OpenAi => Some(&self.openai_api_key),
            ProviderKind::Anthropic => Some(&self.anthropic_api_key),
            ProviderKind::LiteLlm => Some(&self.litellm_api_key),
            ProviderKind::Meta => None,
        }
    }

    /// The subset safe to return to callers.
    pub fn public_view(&self) -> PublicSettings<'_> {
        PublicSettings {
            app_name: &self.app_name,
            default_model: &self.default_model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            rate_limit: self.rate_limit,
            configured_providers: ProviderKind::ALL
                .into_iter()
                .filter(|p| self.api_key_for(*p).is_none_or(|key| !key.is_empty()))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PublicSettings<'a> {
    pub app_name: &'a str,
    pub default_model: &'a str,
    pub temperature: f64,
    pub max_tokens: u32,
    pub rate_limit: u32,
    pub configured_providers: Vec<ProviderKind>,
}

/// Where the settings step loads [`Settings`] from.
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
}

/// Reads the process environment on every load.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSettings;

impl SettingsSource for EnvSettings {
    fn load(&self) -> Result<Settings, ConfigError> {
        Settings::from_env()
    }
}

/// Fixed settings, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub Settings);

impl SettingsSource for StaticSettings {
    fn load(&self) -> Result<Settings, ConfigError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_keys() {
        let rendered = format!("{:?}", Settings::default());
        assert!(!rendered.contains("sk-test-key"));
        assert!(rendered.contains("GenAI Backend"));
    }

    #[test]
    fn test_from_lookup_overrides_and_rejects() {
        let settings = Settings::from_lookup(&|k: &str| match k {
            "GENAI_MAX_TOKENS" => Some("2048".to_string()),
            "OPENAI_API_KEY" => Some("sk-live".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.max_tokens, 2048);
        assert_eq!(settings.api_key_for(ProviderKind::OpenAi), Some("sk-live"));
        assert_eq!(settings.api_key_for(ProviderKind::Meta), None);

        let err = Settings::from_lookup(&|k: &str| {
            (k == "GENAI_TEMPERATURE").then(|| "hot".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("GENAI_TEMPERATURE"));
    }

    #[test]
    fn test_public_view_lists_configured_providers() {
        let settings = Settings {
            anthropic_api_key: String::new(),
            ..Settings::default()
        };
        let view = serde_json::to_value(settings.public_view()).unwrap();
        assert_eq!(
            view["configured_providers"],
            serde_json::json!(["openai", "meta", "litellm"])
        );
        assert!(!view.to_string().contains("sk-test-key"));
    }
}
