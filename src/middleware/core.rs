use std::time::Duration;

use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiError;

/// A `(before, after)` hook pair wrapped around the handler.
///
/// Layers are registered outermost first. `before` hooks run in registration
/// order; `after` hooks run in reverse, so each layer's teardown sees the
/// response after every inner layer has finished with it.
///
/// A `before` hook may short-circuit: returning `Ok(Some(response))` answers
/// the request directly, `Err(error)` answers it with the translated error.
/// Inner layers and the handler are then skipped, but `after` still runs for
/// this layer and every outer one.
pub trait Middleware: Send + Sync {
    /// Short name used in logs and when asserting the stack order.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn before(&self, _req: &HandlerRequest) -> Result<Option<HandlerResponse>, ApiError> {
        Ok(None)
    }

    /// `elapsed` is measured from the moment this layer's `before` started.
    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _elapsed: Duration) {}
}
