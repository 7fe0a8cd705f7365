use anyhow::anyhow;

use super::model::{Message, ModelInfo, ProviderKind};
use super::steps::Credential;

/// Output tokens charged for a synthetic completion.
pub const SYNTHETIC_OUTPUT_TOKENS: u64 = 10;
/// Output tokens charged for a synthetic completion routed through a named
/// provider.
pub const SYNTHETIC_ROUTED_OUTPUT_TOKENS: u64 = 15;

pub struct CompletionRequest<'a> {
    pub model: &'a ModelInfo,
    pub messages: &'a [Message],
    pub temperature: f64,
    pub max_tokens: u32,
    pub credential: &'a Credential,
    /// Set when the caller addressed a provider explicitly.
    pub routed_provider: Option<ProviderKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub output_tokens: u64,
}

/// Seam to the upstream model vendor.
///
/// Errors are reported to callers as 503 with a generic message; the error
/// text only reaches the log.
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn complete(&self, request: &CompletionRequest<'_>) -> anyhow::Result<Completion>;

    /// Upper bound on the output tokens a completion will be charged for,
    /// used to reject requests the caller cannot afford before generating.
    fn estimated_output_tokens(&self, routed: bool) -> u64;
}

/// Placeholder generator echoing the last message back.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticProvider;

impl CompletionProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> anyhow::Result<Completion> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .ok_or_else(|| anyhow!("completion requested with no messages"))?;

        Ok(match request.routed_provider {
            None => Completion {
                content: format!("This is a generated response based on your input: '{last}'"),
                output_tokens: SYNTHETIC_OUTPUT_TOKENS,
            },
            Some(provider) => Completion {
                content: format!(
                    "This is a generated response from provider {provider} based on your input: '{last}'"
                ),
                output_tokens: SYNTHETIC_ROUTED_OUTPUT_TOKENS,
            },
        })
    }

    fn estimated_output_tokens(&self, routed: bool) -> u64 {
        if routed {
            SYNTHETIC_ROUTED_OUTPUT_TOKENS
        } else {
            SYNTHETIC_OUTPUT_TOKENS
        }
    }
}
