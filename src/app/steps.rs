//! Dependency steps for the GenAI endpoints.
//!
//! ```text
//! api_key ── current_user ─┬─ admin_user
//!                          ├─ token_ceiling ◄── chat_body, settings, <model>
//!                          ├─ token_usage   ◄── chat_body
//!                          └─ rate_limit    ◄── settings
//! chat_body, settings ── requested_model ── provider_credential ◄── settings
//! chat_body, routed_provider ── provider_model
//! ```
//!
//! `token_ceiling`, `provider_credential` and `token_usage` are generic over
//! the step that picks the model, so `/chat/completions` (model from the body or the
//! default) and `/providers/{provider_id}/chat` (model checked against the
//! path provider) share them.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, info};

use super::model::{
    ChatRequest, ModelInfo, NewConversation, ProviderKind, Tier, User, FREE_TIER_MAX_TOKENS,
};
use super::settings::Settings;
use super::AppState;
use crate::deps::{Scope, Step};
use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The caller's `X-API-Key`.
pub struct ApiKey;

impl Step<AppState> for ApiKey {
    type Output = String;
    type Deps = ();
    const NAME: &'static str = "api_key";

    fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<String, ApiError> {
        scope
            .request()
            .get_header(API_KEY_HEADER)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Unauthenticated("Missing API Key".to_string()))
    }
}

/// Snapshot of the user owning the API key.
pub struct CurrentUser;

impl Step<AppState> for CurrentUser {
    type Output = User;
    type Deps = (ApiKey,);
    const NAME: &'static str = "current_user";

    fn provide(scope: &Scope<'_, AppState>, (api_key,): (Arc<String>,)) -> Result<User, ApiError> {
        let user = scope
            .state()
            .users
            .by_key(&api_key)
            .ok_or_else(|| ApiError::Unauthenticated("Invalid API Key".to_string()))?;
        debug!(user_id = user.id, tier = ?user.tier, "Authenticated");
        Ok(user)
    }
}

pub struct AdminUser;

impl Step<AppState> for AdminUser {
    type Output = User;
    type Deps = (CurrentUser,);
    const NAME: &'static str = "admin_user";

    fn provide(_: &Scope<'_, AppState>, (user,): (Arc<User>,)) -> Result<User, ApiError> {
        if !user.is_admin() {
            info!(user_id = user.id, "Admin privileges required");
            return Err(ApiError::Forbidden("Admin privileges required".to_string()));
        }
        Ok((*user).clone())
    }
}

/// Loads [`Settings`] from the configured source. Comparatively expensive;
/// the per-request cache makes it run at most once.
pub struct LoadSettings;

impl Step<AppState> for LoadSettings {
    type Output = Settings;
    type Deps = ();
    const NAME: &'static str = "settings";

    fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<Settings, ApiError> {
        scope.state().load_settings()
    }
}

pub struct ChatBody;

impl Step<AppState> for ChatBody {
    type Output = ChatRequest;
    type Deps = ();
    const NAME: &'static str = "chat_body";

    fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<ChatRequest, ApiError> {
        let body = scope.request().json_body()?;
        scope.state().schemas.chat_request.parse(body)
    }
}

pub struct ModelBody;

impl Step<AppState> for ModelBody {
    type Output = ModelInfo;
    type Deps = ();
    const NAME: &'static str = "model_body";

    fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<ModelInfo, ApiError> {
        let body = scope.request().json_body()?;
        scope.state().schemas.model_info.parse(body)
    }
}

pub struct ConversationBody;

impl Step<AppState> for ConversationBody {
    type Output = NewConversation;
    type Deps = ();
    const NAME: &'static str = "conversation_body";

    fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<NewConversation, ApiError> {
        let body = scope.request().json_body()?;
        scope.state().schemas.new_conversation.parse(body)
    }
}

fn find_model(state: &AppState, id: &str) -> Result<ModelInfo, ApiError> {
    state.models.get(id).ok_or_else(|| ApiError::ModelNotFound {
        model_id: id.to_string(),
        available: state.models.list(None).into_iter().map(|m| m.id).collect(),
    })
}

/// A step choosing the model a chat runs against.
pub trait ModelChoice: Step<AppState, Output = ModelInfo> {
    /// Whether the caller addressed a provider explicitly.
    const ROUTED: bool;
}

/// Model named by the `{model_id}` path segment.
pub struct PathModel;

impl Step<AppState> for PathModel {
    type Output = ModelInfo;
    type Deps = ();
    const NAME: &'static str = "path_model";

    fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<ModelInfo, ApiError> {
        let id = scope.request().require_path_param("model_id")?;
        find_model(scope.state(), id)
    }
}

/// Model named in the chat body, or the configured default.
pub struct RequestedModel;

impl Step<AppState> for RequestedModel {
    type Output = ModelInfo;
    type Deps = (ChatBody, LoadSettings);
    const NAME: &'static str = "requested_model";

    fn provide(
        scope: &Scope<'_, AppState>,
        (body, settings): (Arc<ChatRequest>, Arc<Settings>),
    ) -> Result<ModelInfo, ApiError> {
        let id = body.model.as_deref().unwrap_or(&settings.default_model);
        find_model(scope.state(), id)
    }
}

impl ModelChoice for RequestedModel {
    const ROUTED: bool = false;
}

/// Provider named by the `{provider_id}` path segment.
pub struct RoutedProvider;

impl Step<AppState> for RoutedProvider {
    type Output = ProviderKind;
    type Deps = ();
    const NAME: &'static str = "routed_provider";

    fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<ProviderKind, ApiError> {
        scope
            .request()
            .require_path_param("provider_id")?
            .parse::<ProviderKind>()
            .map_err(|e| ApiError::invalid_field("provider_id", e.to_string()))
    }
}

/// Chat body model, which must belong to the routed provider.
pub struct ProviderModel;

impl Step<AppState> for ProviderModel {
    type Output = ModelInfo;
    type Deps = (ChatBody, RoutedProvider);
    const NAME: &'static str = "provider_model";

    fn provide(
        scope: &Scope<'_, AppState>,
        (body, provider): (Arc<ChatRequest>, Arc<ProviderKind>),
    ) -> Result<ModelInfo, ApiError> {
        let provider = *provider;
        let candidates = scope.state().models.list(Some(provider));
        if candidates.is_empty() {
            return Err(ApiError::NotFound(format!(
                "No models found for provider {provider}"
            )));
        }
        let id = body.model.as_deref().ok_or_else(|| {
            ApiError::invalid_field("model", "a model is required when addressing a provider")
        })?;
        candidates
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("Model {id} not found for provider {provider}")))
    }
}

impl ModelChoice for ProviderModel {
    const ROUTED: bool = true;
}

/// Validated `max_tokens` for the chat, bounded by tier, settings and the
/// model chosen by `M`.
pub struct TokenCeiling<M = RequestedModel>(PhantomData<fn() -> M>);

impl<M> Step<AppState> for TokenCeiling<M>
where
    M: Step<AppState, Output = ModelInfo>,
{
    type Output = u32;
    type Deps = (CurrentUser, ChatBody, LoadSettings, M);
    const NAME: &'static str = "token_ceiling";

    fn provide(
        _: &Scope<'_, AppState>,
        (user, body, settings, model): (Arc<User>, Arc<ChatRequest>, Arc<Settings>, Arc<ModelInfo>),
    ) -> Result<u32, ApiError> {
        let requested = body.max_tokens;
        if user.tier == Tier::Free && requested > FREE_TIER_MAX_TOKENS {
            return Err(ApiError::Forbidden(format!(
                "Free tier users can only request up to {FREE_TIER_MAX_TOKENS} max tokens"
            )));
        }
        if requested > settings.max_tokens {
            return Err(ApiError::invalid_field(
                "max_tokens",
                format!("Requested max tokens exceed the limit of {}", settings.max_tokens),
            ));
        }
        if requested > model.max_tokens {
            return Err(ApiError::invalid_field(
                "max_tokens",
                format!("Model {} supports at most {} tokens", model.id, model.max_tokens),
            ));
        }
        Ok(requested)
    }
}

/// The provider key a completion would be sent with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub provider: ProviderKind,
    key: Option<String>,
}

impl Credential {
    pub fn new(provider: ProviderKind, key: impl Into<String>) -> Self {
        Self {
            provider,
            key: Some(key.into()),
        }
    }

    /// For providers that take no key.
    pub fn none(provider: ProviderKind) -> Self {
        Self { provider, key: None }
    }

    pub fn expose(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// First four characters followed by `****`.
    pub fn masked(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|key| format!("{}****", key.chars().take(4).collect::<String>()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("key", &self.masked())
            .finish()
    }
}

pub struct ProviderCredential<M = RequestedModel>(PhantomData<fn() -> M>);

impl<M> Step<AppState> for ProviderCredential<M>
where
    M: Step<AppState, Output = ModelInfo>,
{
    type Output = Credential;
    type Deps = (M, LoadSettings);
    const NAME: &'static str = "provider_credential";

    fn provide(
        _: &Scope<'_, AppState>,
        (model, settings): (Arc<ModelInfo>, Arc<Settings>),
    ) -> Result<Credential, ApiError> {
        let provider = model.provider;
        let credential = match settings.api_key_for(provider) {
            None => Credential::none(provider),
            Some("") => {
                return Err(ApiError::Provider {
                    provider: provider.to_string(),
                    reason: "no API key configured".to_string(),
                })
            }
            Some(key) => Credential::new(provider, key),
        };
        debug!(provider = %provider, key = ?credential.masked(), "Provider credential selected");
        Ok(credential)
    }
}

/// Token cost estimate for the pending completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub estimated: u64,
    pub remaining: u64,
}

/// Rejects users whose quota is spent, or whose remaining budget cannot
/// cover this completion. The output estimate depends on whether `M` routes
/// through a named provider.
pub struct TokenUsageCheck<M = RequestedModel>(PhantomData<fn() -> M>);

impl<M: ModelChoice> Step<AppState> for TokenUsageCheck<M> {
    type Output = TokenBudget;
    type Deps = (CurrentUser, ChatBody);
    const NAME: &'static str = "token_usage";

    fn provide(
        scope: &Scope<'_, AppState>,
        (user, body): (Arc<User>, Arc<ChatRequest>),
    ) -> Result<TokenBudget, ApiError> {
        if user.tokens_used >= user.token_limit {
            return Err(ApiError::QuotaExceeded {
                tokens_used: user.tokens_used,
                token_limit: user.token_limit,
            });
        }
        let estimated =
            body.input_tokens() + scope.state().provider.estimated_output_tokens(M::ROUTED);
        let remaining = user.remaining_tokens();
        if estimated > remaining {
            return Err(ApiError::TokenBudgetExceeded {
                requested: estimated,
                remaining,
            });
        }
        debug!(
            user_id = user.id,
            tokens_used = user.tokens_used,
            token_limit = user.token_limit,
            estimated,
            "Token budget available"
        );
        Ok(TokenBudget {
            estimated,
            remaining,
        })
    }
}

/// Counts the request against the user's per-minute allowance.
pub struct RateLimit;

impl Step<AppState> for RateLimit {
    type Output = ();
    type Deps = (CurrentUser, LoadSettings);
    const NAME: &'static str = "rate_limit";

    fn provide(
        scope: &Scope<'_, AppState>,
        (user, settings): (Arc<User>, Arc<Settings>),
    ) -> Result<(), ApiError> {
        scope.state().users.check_rate(user.id, settings.rate_limit)
    }
}
