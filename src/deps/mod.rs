//! # Request-scoped dependency resolution
//!
//! Handlers do not pull credentials, settings or validated bodies out of the
//! request themselves. Instead they declare the [`Step`]s they need, and the
//! dispatcher resolves them at request entry:
//!
//! - every step is evaluated **at most once per request**; a step required by
//!   several dependents is computed once and the same `Arc` is handed to all
//!   of them
//! - steps run in dependency order, deepest first, following the declaration
//!   order of each step's predecessors, so the order is deterministic for a
//!   fixed graph
//! - the first failing step aborts the remaining steps and the handler; the
//!   failure travels back to the dispatcher, which hands it to the
//!   registered [`ErrorTranslator`](crate::error::ErrorTranslator)
//! - the per-request cache lives in a [`Scope`] that is dropped with the
//!   request; nothing is shared across requests
//!
//! ## Declaring steps
//!
//! ```rust,ignore
//! struct ApiKey;
//! impl Step<AppState> for ApiKey {
//!     type Output = String;
//!     type Deps = ();
//!     const NAME: &'static str = "api_key";
//!     fn provide(scope: &Scope<'_, AppState>, _: ()) -> Result<String, ApiError> { ... }
//! }
//!
//! struct CurrentUser;
//! impl Step<AppState> for CurrentUser {
//!     type Output = User;
//!     type Deps = (ApiKey,);
//!     const NAME: &'static str = "current_user";
//!     fn provide(scope: &Scope<'_, AppState>, (key,): (Arc<String>,)) -> Result<User, ApiError> { ... }
//! }
//! ```
//!
//! A handler then asks for `(CurrentUser,)` and receives `(Arc<User>,)`.

mod handler;
mod scope;

pub use handler::{handler_fn, FnHandler, Handler};
pub(crate) use handler::ErasedHandler;
pub use scope::{plan, Dependencies, Planner, Scope, Step};
