//! In-memory registries shared by all requests.
//!
//! Each store owns its lock; callers never hold a guard across a call into
//! another store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::model::{Conversation, ModelInfo, ModelType, ProviderKind, Tier, User};
use crate::error::ApiError;

/// Length of a rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Registered models, kept in registration order.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<Vec<ModelInfo>>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self {
            models: RwLock::new(models),
        }
    }

    pub fn seeded() -> Self {
        Self::new(vec![
            ModelInfo::new("gpt-4", "GPT-4", ProviderKind::OpenAi, 8192),
            ModelInfo::new("claude-opus-4-5", "Claude Opus 4.5", ProviderKind::Anthropic, 8192)
                .with_type(ModelType::Coding),
            ModelInfo::new("llama-3.1", "LLaMA 3.1", ProviderKind::Meta, 4096),
            ModelInfo::new("gpt-5", "GPT-5", ProviderKind::LiteLlm, 16384)
                .with_type(ModelType::Creative),
            ModelInfo::new(
                "claude-sonnet-4-5",
                "Claude Sonnet 4.5",
                ProviderKind::Anthropic,
                16384,
            )
            .with_type(ModelType::Coding),
        ])
    }

    pub fn list(&self, provider: Option<ProviderKind>) -> Vec<ModelInfo> {
        self.models
            .read()
            .iter()
            .filter(|m| provider.is_none_or(|p| m.provider == p))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ModelInfo> {
        self.models.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// Register a model. Ids are unique.
    pub fn insert(&self, model: ModelInfo) -> Result<ModelInfo, ApiError> {
        let mut models = self.models.write();
        if models.iter().any(|m| m.id == model.id) {
            return Err(ApiError::BadRequest(format!(
                "Model with ID {} already exists",
                model.id
            )));
        }
        models.push(model.clone());
        info!(model_id = %model.id, provider = %model.provider, "Model registered");
        Ok(model)
    }

    pub fn remove(&self, id: &str) -> Result<ModelInfo, ApiError> {
        let mut models = self.models.write();
        let Some(pos) = models.iter().position(|m| m.id == id) else {
            return Err(ApiError::NotFound(format!("Model with ID {id} does not exist")));
        };
        let removed = models.remove(pos);
        info!(model_id = %removed.id, "Model removed");
        Ok(removed)
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started: Instant,
    count: u32,
}

/// Users keyed by API key, plus per-user request windows.
#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
    windows: DashMap<u64, RateWindow>,
}

impl UserStore {
    pub fn new(users: impl IntoIterator<Item = (String, User)>) -> Self {
        Self {
            users: RwLock::new(users.into_iter().collect()),
            windows: DashMap::new(),
        }
    }

    pub fn seeded() -> Self {
        let user = |id, email: &str, tier, tokens_used, token_limit| User {
            id,
            email: email.to_string(),
            tier,
            tokens_used,
            token_limit,
        };
        Self::new([
            (
                "key-123".to_string(),
                user(1, "user1@example.com", Tier::Free, 250, 1000),
            ),
            (
                "key-456".to_string(),
                user(2, "user2@example.com", Tier::Pro, 1500, 5000),
            ),
            (
                "admin-123".to_string(),
                user(0, "admin@example.com", Tier::Admin, 0, 100_000),
            ),
        ])
    }

    /// Snapshot of the user owning `api_key`.
    pub fn by_key(&self, api_key: &str) -> Option<User> {
        self.users.read().get(api_key).cloned()
    }

    /// Charge `tokens` to the user owning `api_key` and return the updated
    /// snapshot.
    ///
    /// The budget is re-checked under the same write guard that applies the
    /// charge, so concurrent completions can never push `tokens_used` past
    /// `token_limit`.
    pub fn charge_within_budget(&self, api_key: &str, tokens: u64) -> Result<User, ApiError> {
        let mut users = self.users.write();
        let user = users
            .get_mut(api_key)
            .ok_or_else(|| ApiError::Unauthenticated("Invalid API Key".to_string()))?;
        let remaining = user.remaining_tokens();
        if tokens > remaining {
            debug!(
                user_id = user.id,
                requested = tokens,
                remaining,
                "Charge rejected, budget exhausted"
            );
            return Err(ApiError::TokenBudgetExceeded {
                requested: tokens,
                remaining,
            });
        }
        user.tokens_used += tokens;
        debug!(
            user_id = user.id,
            charged = tokens,
            tokens_used = user.tokens_used,
            token_limit = user.token_limit,
            "Usage recorded"
        );
        Ok(user.clone())
    }

    /// Count one request against `user_id`'s current window.
    ///
    /// Fixed one-minute windows: the first request opens a window and every
    /// request inside it counts, up to `limit`. A limit of zero disables the
    /// check.
    pub fn check_rate(&self, user_id: u64, limit: u32) -> Result<(), ApiError> {
        if limit == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut window = self.windows.entry(user_id).or_insert(RateWindow {
            started: now,
            count: 0,
        });
        if now.duration_since(window.started) >= RATE_WINDOW {
            *window = RateWindow {
                started: now,
                count: 0,
            };
        }
        if window.count >= limit {
            return Err(ApiError::RateLimited {
                limit,
                retry_after_secs: RATE_WINDOW.as_secs(),
            });
        }
        window.count += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct ConversationTable {
    next_id: u64,
    items: Vec<Conversation>,
}

/// Conversations per owner, ids assigned sequentially across all owners.
#[derive(Debug)]
pub struct ConversationStore {
    inner: Mutex<ConversationTable>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ConversationTable {
                next_id: 1,
                items: Vec::new(),
            }),
        }
    }
}

impl ConversationStore {
    /// Three starter conversations for user 1.
    pub fn seeded() -> Self {
        let store = Self::default();
        for n in 1..=3 {
            store.create(1, format!("Conversation {n}"));
        }
        store
    }

    pub fn list(&self, owner_id: u64) -> Vec<Conversation> {
        self.inner
            .lock()
            .items
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, owner_id: u64, id: u64) -> Option<Conversation> {
        self.inner
            .lock()
            .items
            .iter()
            .find(|c| c.id == id && c.owner_id == owner_id)
            .cloned()
    }

    pub fn create(&self, owner_id: u64, title: String) -> Conversation {
        let mut table = self.inner.lock();
        let conversation = Conversation {
            id: table.next_id,
            title,
            owner_id,
        };
        table.next_id += 1;
        table.items.push(conversation.clone());
        conversation
    }
}
