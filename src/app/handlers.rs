use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};
use ulid::Ulid;

use super::completion::CompletionRequest;
use super::model::{
    ChatRequest, ChatResponse, ModelInfo, ModelType, NewConversation, ProviderKind, TokenUsage, User,
};
use super::settings::Settings;
use super::steps::{Credential, TokenBudget};
use super::AppState;
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiError;

const DEFAULT_PAGE_LIMIT: usize = 10;
const MAX_PAGE_LIMIT: usize = 100;

type HandlerResult = Result<HandlerResponse, ApiError>;

fn query_or<T>(req: &HandlerRequest, name: &str, default: T) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match req.get_query_param(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ApiError::invalid_field(name, format!("{raw:?}: {e}"))),
    }
}

fn page_limit(req: &HandlerRequest) -> Result<usize, ApiError> {
    let limit = query_or(req, "limit", DEFAULT_PAGE_LIMIT)?;
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ApiError::invalid_field(
            "limit",
            format!("must be between 1 and {MAX_PAGE_LIMIT}"),
        ));
    }
    Ok(limit)
}

pub fn health(_req: &HandlerRequest, _state: &AppState, _: ()) -> HandlerResult {
    Ok(HandlerResponse::json(200, json!({"status": "healthy"})))
}

/// `GET /models?provider&skip&limit`
pub fn list_models(req: &HandlerRequest, state: &AppState, (user,): (Arc<User>,)) -> HandlerResult {
    let provider = req
        .get_query_param("provider")
        .map(str::parse::<ProviderKind>)
        .transpose()
        .map_err(|e| ApiError::invalid_field("provider", e.to_string()))?;
    let skip: usize = query_or(req, "skip", 0)?;
    let limit = page_limit(req)?;

    let models: Vec<ModelInfo> = state
        .models
        .list(provider)
        .into_iter()
        .skip(skip)
        .take(limit)
        .collect();
    debug!(user_id = user.id, ?provider, skip, limit, returned = models.len(), "Listed models");
    HandlerResponse::json_of(200, &models)
}

pub fn get_model(
    _req: &HandlerRequest,
    _state: &AppState,
    (_user, model): (Arc<User>, Arc<ModelInfo>),
) -> HandlerResult {
    HandlerResponse::json_of(200, &*model)
}

pub fn create_model(
    _req: &HandlerRequest,
    state: &AppState,
    (admin, model): (Arc<User>, Arc<ModelInfo>),
) -> HandlerResult {
    let created = state.models.insert((*model).clone())?;
    info!(admin_id = admin.id, model_id = %created.id, "Model created");
    HandlerResponse::json_of(201, &created)
}

pub fn delete_model(req: &HandlerRequest, state: &AppState, (admin,): (Arc<User>,)) -> HandlerResult {
    let id = req.require_path_param("model_id")?;
    state.models.remove(id)?;
    info!(admin_id = admin.id, model_id = id, "Model deleted");
    Ok(HandlerResponse::empty(204))
}

/// `GET /providers/{provider_id}/models?limit`
///
/// Unknown providers simply have no models.
pub fn provider_models(
    req: &HandlerRequest,
    state: &AppState,
    (_user,): (Arc<User>,),
) -> HandlerResult {
    let provider_id = req.require_path_param("provider_id")?;
    let limit = page_limit(req)?;
    let all = match provider_id.parse::<ProviderKind>() {
        Ok(provider) => state.models.list(Some(provider)),
        Err(_) => Vec::new(),
    };
    let total_models = all.len();
    let models: Vec<ModelInfo> = all.into_iter().take(limit).collect();
    Ok(HandlerResponse::json(
        200,
        json!({
            "provider_id": provider_id,
            "total_models": total_models,
            "models": models,
        }),
    ))
}

/// `GET /providers/{provider_id}/models/{model_type}?limit`
///
/// `limit` is required here. Unknown providers have no models; unknown types
/// are rejected.
pub fn provider_models_by_type(
    req: &HandlerRequest,
    state: &AppState,
    (user,): (Arc<User>,),
) -> HandlerResult {
    let provider_id = req.require_path_param("provider_id")?;
    let model_type = req
        .require_path_param("model_type")?
        .parse::<ModelType>()
        .map_err(|e| ApiError::invalid_field("model_type", e.to_string()))?;
    if req.get_query_param("limit").is_none() {
        return Err(ApiError::invalid_field("limit", "field required"));
    }
    let limit = page_limit(req)?;

    let all: Vec<ModelInfo> = match provider_id.parse::<ProviderKind>() {
        Ok(provider) => state
            .models
            .list(Some(provider))
            .into_iter()
            .filter(|m| m.model_type == model_type)
            .collect(),
        Err(_) => Vec::new(),
    };
    let total_models = all.len();
    let models: Vec<ModelInfo> = all.into_iter().take(limit).collect();
    debug!(user_id = user.id, provider_id, %model_type, total_models, "Listed provider models by type");
    Ok(HandlerResponse::json(
        200,
        json!({
            "provider_id": provider_id,
            "model_type": model_type,
            "total_models": total_models,
            "models": models,
        }),
    ))
}

struct ChatTurn<'a> {
    api_key: &'a str,
    body: &'a ChatRequest,
    model: &'a ModelInfo,
    max_tokens: u32,
    credential: &'a Credential,
    routed_provider: Option<ProviderKind>,
}

fn complete_chat(state: &AppState, turn: ChatTurn<'_>) -> HandlerResult {
    let completion = state
        .provider
        .complete(&CompletionRequest {
            model: turn.model,
            messages: &turn.body.messages,
            temperature: turn.body.temperature,
            max_tokens: turn.max_tokens,
            credential: turn.credential,
            routed_provider: turn.routed_provider,
        })
        .map_err(|e| ApiError::Provider {
            provider: turn.model.provider.to_string(),
            reason: format!("{} provider: {e:#}", state.provider.name()),
        })?;

    let usage = TokenUsage {
        input: turn.body.input_tokens(),
        output: completion.output_tokens,
    };
    let user = state.users.charge_within_budget(turn.api_key, usage.total())?;
    info!(
        user_id = user.id,
        model_id = %turn.model.id,
        input_tokens = usage.input,
        output_tokens = usage.output,
        remaining_tokens = user.remaining_tokens(),
        "Chat completion generated"
    );

    HandlerResponse::json_of(
        201,
        &ChatResponse {
            id: format!("chatcmpl-{}", Ulid::new()),
            model: turn.model.id.clone(),
            content: completion.content,
            tokens_used: usage,
        },
    )
}

pub type ChatDeps = (
    Arc<User>,
    Arc<String>,
    Arc<ChatRequest>,
    Arc<ModelInfo>,
    Arc<u32>,
    Arc<Credential>,
    Arc<TokenBudget>,
    Arc<()>,
);

/// `POST /chat/completions`
pub fn create_chat_completion(
    _req: &HandlerRequest,
    state: &AppState,
    (_user, api_key, body, model, max_tokens, credential, _budget, _rate): ChatDeps,
) -> HandlerResult {
    complete_chat(
        state,
        ChatTurn {
            api_key: &api_key,
            body: &body,
            model: &model,
            max_tokens: *max_tokens,
            credential: &credential,
            routed_provider: None,
        },
    )
}

/// `POST /providers/{provider_id}/chat`
pub fn create_provider_chat(
    _req: &HandlerRequest,
    state: &AppState,
    (_user, api_key, body, model, max_tokens, credential, _budget, _rate): ChatDeps,
) -> HandlerResult {
    complete_chat(
        state,
        ChatTurn {
            api_key: &api_key,
            body: &body,
            model: &model,
            max_tokens: *max_tokens,
            credential: &credential,
            routed_provider: Some(model.provider),
        },
    )
}

pub fn get_profile(_req: &HandlerRequest, _state: &AppState, (user,): (Arc<User>,)) -> HandlerResult {
    Ok(HandlerResponse::json(
        200,
        json!({
            "id": user.id,
            "email": user.email,
            "tier": user.tier,
            "tokens_used": user.tokens_used,
            "token_limit": user.token_limit,
            "remaining_tokens": user.remaining_tokens(),
        }),
    ))
}

pub fn list_conversations(
    _req: &HandlerRequest,
    state: &AppState,
    (user,): (Arc<User>,),
) -> HandlerResult {
    let conversations = state.conversations.list(user.id);
    Ok(HandlerResponse::json(200, json!({ "conversations": conversations })))
}

pub fn create_conversation(
    _req: &HandlerRequest,
    state: &AppState,
    (user, body): (Arc<User>, Arc<NewConversation>),
) -> HandlerResult {
    let conversation = state.conversations.create(user.id, body.title.clone());
    info!(user_id = user.id, conversation_id = conversation.id, "Conversation created");
    HandlerResponse::json_of(201, &conversation)
}

pub fn get_conversation(
    req: &HandlerRequest,
    state: &AppState,
    (user,): (Arc<User>,),
) -> HandlerResult {
    let raw = req.require_path_param("conversation_id")?;
    let id: u64 = raw
        .parse()
        .map_err(|_| ApiError::invalid_field("conversation_id", format!("{raw:?} is not an integer")))?;
    let conversation = state
        .conversations
        .get(user.id, id)
        .ok_or_else(|| ApiError::NotFound(format!("Conversation {id} not found")))?;
    Ok(HandlerResponse::json(200, json!({ "conversation": conversation })))
}

pub fn get_settings(
    _req: &HandlerRequest,
    _state: &AppState,
    (_user, settings): (Arc<User>, Arc<Settings>),
) -> HandlerResult {
    HandlerResponse::json_of(200, &settings.public_view())
}
