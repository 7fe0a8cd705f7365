use std::marker::PhantomData;

use tracing::debug;

use super::scope::{plan, Dependencies, Scope};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiError;

/// Request handler with declared dependencies.
///
/// The dispatcher resolves `Deps` before calling [`Handler::handle`]; if any
/// step fails the handler is never invoked.
pub trait Handler<S>: Send + Sync + 'static {
    type Deps: Dependencies<S>;

    fn handle(
        &self,
        req: &HandlerRequest,
        state: &S,
        deps: <Self::Deps as Dependencies<S>>::Resolved,
    ) -> Result<HandlerResponse, ApiError>;
}

/// Adapter turning a plain function into a [`Handler`].
pub struct FnHandler<D, F> {
    f: F,
    _deps: PhantomData<fn() -> D>,
}

/// Wrap `f` as a handler depending on the step tuple `D`.
///
/// ```rust,ignore
/// dispatcher.register(
///     RouteMeta::new(Method::GET, "/profile", "get_profile"),
///     handler_fn::<(CurrentUser,), _>(get_profile),
/// )?;
/// ```
pub fn handler_fn<D, F>(f: F) -> FnHandler<D, F> {
    FnHandler {
        f,
        _deps: PhantomData,
    }
}

impl<S, D, F> Handler<S> for FnHandler<D, F>
where
    D: Dependencies<S> + 'static,
    F: Fn(&HandlerRequest, &S, <D as Dependencies<S>>::Resolved) -> Result<HandlerResponse, ApiError>
        + Send
        + Sync
        + 'static,
{
    type Deps = D;

    fn handle(
        &self,
        req: &HandlerRequest,
        state: &S,
        deps: <D as Dependencies<S>>::Resolved,
    ) -> Result<HandlerResponse, ApiError> {
        (self.f)(req, state, deps)
    }
}

/// Object-safe face of [`Handler`] stored in the dispatcher's table.
pub(crate) trait ErasedHandler<S>: Send + Sync {
    fn call(&self, scope: &Scope<'_, S>) -> Result<HandlerResponse, ApiError>;
    fn plan(&self) -> Result<Vec<&'static str>, ApiError>;
}

impl<S, H: Handler<S>> ErasedHandler<S> for H {
    fn call(&self, scope: &Scope<'_, S>) -> Result<HandlerResponse, ApiError> {
        let deps = <H::Deps as Dependencies<S>>::resolve(scope)?;
        debug!(steps = ?scope.evaluated(), "Dependencies resolved");
        self.handle(scope.request(), scope.state(), deps)
    }

    fn plan(&self) -> Result<Vec<&'static str>, ApiError> {
        plan::<S, H::Deps>()
    }
}
