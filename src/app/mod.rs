//! # GenAI service
//!
//! Toy GenAI endpoints wired onto the [`Dispatcher`]: model registry, chat
//! completions from a synthetic provider, per-user token accounting and
//! conversations, all held in memory by an explicitly owned [`AppState`].
//!
//! Each handler declares its dependency steps (see [`steps`]); the dispatcher
//! resolves them before the handler runs.

mod completion;
mod handlers;
mod model;
mod schema;
mod settings;
pub mod steps;
mod store;

pub use completion::{
    Completion, CompletionProvider, CompletionRequest, SyntheticProvider, SYNTHETIC_OUTPUT_TOKENS,
    SYNTHETIC_ROUTED_OUTPUT_TOKENS,
};
pub use model::{
    ChatRequest, ChatResponse, Conversation, Message, ModelInfo, ModelType, ProviderKind, Role,
    Tier, TokenUsage, UnknownModelType, UnknownProvider, User, FREE_TIER_MAX_TOKENS,
};
pub use schema::{BodySchema, Schemas};
pub use settings::{EnvSettings, PublicSettings, Settings, SettingsSource, StaticSettings};
pub use store::{ConversationStore, ModelRegistry, UserStore, RATE_WINDOW};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use http::Method;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::deps::handler_fn;
use crate::dispatcher::Dispatcher;
use crate::error::ApiError;
use crate::middleware::{CorsMiddleware, LoggingMiddleware, RequestIdMiddleware, TimingMiddleware};
use crate::router::RouteMeta;
use steps::{
    AdminUser, ApiKey, ChatBody, ConversationBody, CurrentUser, LoadSettings, ModelBody, PathModel,
    ProviderCredential, ProviderModel, RateLimit, RequestedModel, TokenCeiling, TokenUsageCheck,
};

pub type AppDispatcher = Dispatcher<AppState>;

/// Process-wide state injected into every step and handler.
pub struct AppState {
    pub models: ModelRegistry,
    pub users: UserStore,
    pub conversations: ConversationStore,
    pub schemas: Schemas,
    pub provider: Box<dyn CompletionProvider>,
    settings_source: Box<dyn SettingsSource>,
    settings_loads: AtomicUsize,
}

impl AppState {
    /// Seeded stores, the synthetic provider and `settings_source`.
    pub fn new(settings_source: Box<dyn SettingsSource>) -> anyhow::Result<Self> {
        Ok(Self {
            models: ModelRegistry::seeded(),
            users: UserStore::seeded(),
            conversations: ConversationStore::seeded(),
            schemas: Schemas::compile().context("failed to compile request schemas")?,
            provider: Box::new(SyntheticProvider),
            settings_source,
            settings_loads: AtomicUsize::new(0),
        })
    }

    /// Seeded state with default settings.
    pub fn with_defaults() -> anyhow::Result<Self> {
        Self::new(Box::new(StaticSettings::default()))
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Box<dyn CompletionProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        let loads = self.settings_loads.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(loads, "Loading settings");
        self.settings_source
            .load()
            .context("failed to load settings")
            .map_err(ApiError::from)
    }

    /// Number of times settings have been loaded since startup.
    pub fn settings_loads(&self) -> usize {
        self.settings_loads.load(Ordering::Relaxed)
    }
}

/// Register every endpoint on `dispatcher`.
pub fn register_routes(dispatcher: &mut AppDispatcher) -> anyhow::Result<()> {
    use handlers::*;

    dispatcher.register(
        RouteMeta::new(Method::GET, "/health", "health"),
        handler_fn::<(), _>(health),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::GET, "/models", "list_models"),
        handler_fn::<(CurrentUser,), _>(list_models),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::GET, "/models/{model_id}", "get_model"),
        handler_fn::<(CurrentUser, PathModel), _>(get_model),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::POST, "/models", "create_model"),
        handler_fn::<(AdminUser, ModelBody), _>(create_model),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::DELETE, "/models/{model_id}", "delete_model"),
        handler_fn::<(AdminUser,), _>(delete_model),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::GET, "/providers/{provider_id}/models", "provider_models"),
        handler_fn::<(CurrentUser,), _>(provider_models),
    )?;
    dispatcher.register(
        RouteMeta::new(
            Method::GET,
            "/providers/{provider_id}/models/{model_type}",
            "provider_models_by_type",
        ),
        handler_fn::<(CurrentUser,), _>(provider_models_by_type),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::POST, "/providers/{provider_id}/chat", "create_provider_chat"),
        handler_fn::<
            (
                CurrentUser,
                ApiKey,
                ChatBody,
                ProviderModel,
                TokenCeiling<ProviderModel>,
                ProviderCredential<ProviderModel>,
                TokenUsageCheck<ProviderModel>,
                RateLimit,
            ),
            _,
        >(create_provider_chat),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::POST, "/chat/completions", "create_chat_completion"),
        handler_fn::<
            (
                CurrentUser,
                ApiKey,
                ChatBody,
                RequestedModel,
                TokenCeiling<RequestedModel>,
                ProviderCredential<RequestedModel>,
                TokenUsageCheck<RequestedModel>,
                RateLimit,
            ),
            _,
        >(create_chat_completion),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::GET, "/profile", "get_profile"),
        handler_fn::<(CurrentUser,), _>(get_profile),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::GET, "/conversations", "list_conversations"),
        handler_fn::<(CurrentUser,), _>(list_conversations),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::POST, "/conversations", "create_conversation"),
        handler_fn::<(CurrentUser, ConversationBody), _>(create_conversation),
    )?;
    dispatcher.register(
        RouteMeta::new(
            Method::GET,
            "/conversations/{conversation_id}",
            "get_conversation",
        ),
        handler_fn::<(CurrentUser,), _>(get_conversation),
    )?;
    dispatcher.register(
        RouteMeta::new(Method::GET, "/settings", "get_settings"),
        handler_fn::<(CurrentUser, LoadSettings), _>(get_settings),
    )?;
    Ok(())
}

/// Install the default stack, outermost first: CORS, request id, timing,
/// logging.
pub fn install_middleware(dispatcher: &mut AppDispatcher, config: &AppConfig) -> anyhow::Result<()> {
    let cors = CorsMiddleware::for_environment(config.environment)
        .with_context(|| format!("invalid CORS configuration for {}", config.environment))?;
    dispatcher.add_middleware(Arc::new(cors));
    dispatcher.add_middleware(Arc::new(RequestIdMiddleware));
    dispatcher.add_middleware(Arc::new(TimingMiddleware::new(config.slow_request_threshold)));
    dispatcher.add_middleware(Arc::new(LoggingMiddleware));
    Ok(())
}

/// Fully wired dispatcher for `state`.
pub fn build_dispatcher(state: Arc<AppState>, config: &AppConfig) -> anyhow::Result<AppDispatcher> {
    let mut dispatcher = Dispatcher::new(state);
    register_routes(&mut dispatcher)?;
    install_middleware(&mut dispatcher, config)?;
    info!(
        routes = dispatcher.routes().count(),
        middleware = ?dispatcher.middleware_names(),
        environment = %config.environment,
        "Dispatcher ready"
    );
    Ok(dispatcher)
}
