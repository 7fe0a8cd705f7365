use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, trace};

use crate::dispatcher::HandlerRequest;
use crate::error::ApiError;

/// A named unit of the dependency graph producing one value or a failure.
///
/// Steps are marker types; they are never instantiated. `S` is the
/// application state the step may read (stores, settings sources, counters).
pub trait Step<S>: 'static {
    type Output: Send + Sync + 'static;
    /// Predecessors whose outputs this step consumes, as a tuple of steps.
    type Deps: Dependencies<S>;
    const NAME: &'static str;

    fn provide(
        scope: &Scope<'_, S>,
        deps: <Self::Deps as Dependencies<S>>::Resolved,
    ) -> Result<Self::Output, ApiError>;
}

/// A set of steps resolved together, left to right.
///
/// Implemented for `()` and for tuples of up to eight steps.
pub trait Dependencies<S> {
    type Resolved;

    /// Resolve every member, stopping at the first failure.
    fn resolve(scope: &Scope<'_, S>) -> Result<Self::Resolved, ApiError>;

    /// Record the evaluation order without running anything.
    fn visit(planner: &mut Planner) -> Result<(), ApiError>;
}

impl<S> Dependencies<S> for () {
    type Resolved = ();

    fn resolve(_scope: &Scope<'_, S>) -> Result<(), ApiError> {
        Ok(())
    }

    fn visit(_planner: &mut Planner) -> Result<(), ApiError> {
        Ok(())
    }
}

macro_rules! tuple_dependencies {
    ($($step:ident),+) => {
        impl<S, $($step: Step<S>),+> Dependencies<S> for ($($step,)+) {
            type Resolved = ($(Arc<<$step as Step<S>>::Output>,)+);

            fn resolve(scope: &Scope<'_, S>) -> Result<Self::Resolved, ApiError> {
                Ok(($(scope.resolve::<$step>()?,)+))
            }

            fn visit(planner: &mut Planner) -> Result<(), ApiError> {
                $(planner.visit::<S, $step>()?;)+
                Ok(())
            }
        }
    };
}

tuple_dependencies!(A);
tuple_dependencies!(A, B);
tuple_dependencies!(A, B, C);
tuple_dependencies!(A, B, C, D);
tuple_dependencies!(A, B, C, D, E);
tuple_dependencies!(A, B, C, D, E, F);
tuple_dependencies!(A, B, C, D, E, F, G);
tuple_dependencies!(A, B, C, D, E, F, G, H);

fn cycle_error(chain: &[(TypeId, &'static str)], closing: &'static str) -> ApiError {
    let mut names: Vec<&str> = chain.iter().map(|(_, name)| *name).collect();
    names.push(closing);
    ApiError::from(anyhow!("dependency cycle: {}", names.join(" -> ")))
}

/// Per-request resolution cache.
///
/// A scope is confined to the thread handling its request, so interior
/// mutability is a plain `RefCell`. No borrow is held across a call into a
/// step, which lets steps resolve further steps re-entrantly.
pub struct Scope<'r, S> {
    state: &'r S,
    request: &'r HandlerRequest,
    cache: RefCell<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    resolving: RefCell<Vec<(TypeId, &'static str)>>,
    evaluated: RefCell<Vec<&'static str>>,
}

impl<'r, S> Scope<'r, S> {
    pub fn new(state: &'r S, request: &'r HandlerRequest) -> Self {
        Self {
            state,
            request,
            cache: RefCell::new(HashMap::new()),
            resolving: RefCell::new(Vec::new()),
            evaluated: RefCell::new(Vec::new()),
        }
    }

    pub fn state(&self) -> &'r S {
        self.state
    }

    pub fn request(&self) -> &'r HandlerRequest {
        self.request
    }

    /// Resolve `T`, evaluating its predecessors first.
    ///
    /// Returns the cached value when `T` already ran in this scope.
    pub fn resolve<T: Step<S>>(&self) -> Result<Arc<T::Output>, ApiError> {
        let key = TypeId::of::<T>();

        let cached = self.cache.borrow().get(&key).cloned();
        if let Some(hit) = cached {
            trace!(step = T::NAME, "Step cache hit");
            return hit.downcast::<T::Output>().map_err(|_| {
                ApiError::from(anyhow!("cached value for step `{}` has the wrong type", T::NAME))
            });
        }

        {
            let resolving = self.resolving.borrow();
            if resolving.iter().any(|(id, _)| *id == key) {
                return Err(cycle_error(&resolving, T::NAME));
            }
        }

        self.resolving.borrow_mut().push((key, T::NAME));
        let outcome = <T::Deps as Dependencies<S>>::resolve(self).and_then(|deps| {
            trace!(step = T::NAME, "Evaluating step");
            T::provide(self, deps)
        });
        self.resolving.borrow_mut().pop();

        let value = match outcome {
            Ok(value) => Arc::new(value),
            Err(err) => {
                debug!(step = T::NAME, code = err.code(), "Step failed");
                return Err(err);
            }
        };

        self.cache
            .borrow_mut()
            .insert(key, Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        self.evaluated.borrow_mut().push(T::NAME);
        Ok(value)
    }

    /// Names of the steps evaluated so far, in completion order.
    pub fn evaluated(&self) -> Vec<&'static str> {
        self.evaluated.borrow().clone()
    }
}

/// Dry-run walker computing the order [`Scope::resolve`] would evaluate steps in.
#[derive(Debug, Default)]
pub struct Planner {
    order: Vec<&'static str>,
    seen: HashSet<TypeId>,
    visiting: Vec<(TypeId, &'static str)>,
}

impl Planner {
    pub fn visit<S, T: Step<S>>(&mut self) -> Result<(), ApiError> {
        let key = TypeId::of::<T>();
        if self.seen.contains(&key) {
            return Ok(());
        }
        if self.visiting.iter().any(|(id, _)| *id == key) {
            return Err(cycle_error(&self.visiting, T::NAME));
        }

        self.visiting.push((key, T::NAME));
        let result = <T::Deps as Dependencies<S>>::visit(self);
        self.visiting.pop();
        result?;

        self.seen.insert(key);
        self.order.push(T::NAME);
        Ok(())
    }

    pub fn into_order(self) -> Vec<&'static str> {
        self.order
    }
}

/// Evaluation order of `D` without running any step.
pub fn plan<S, D: Dependencies<S>>() -> Result<Vec<&'static str>, ApiError> {
    let mut planner = Planner::default();
    D::visit(&mut planner)?;
    Ok(planner.into_order())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::IncomingRequest;
    use crate::ids::RequestId;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Counters {
        root: AtomicUsize,
        left: AtomicUsize,
        right: AtomicUsize,
        log: Mutex<Vec<&'static str>>,
    }

    impl Counters {
        fn record(&self, name: &'static str) {
            self.log.lock().unwrap().push(name);
        }
    }

    struct Root;
    impl Step<Counters> for Root {
        type Output = u32;
        type Deps = ();
        const NAME: &'static str = "root";
        fn provide(scope: &Scope<'_, Counters>, _: ()) -> Result<u32, ApiError> {
            scope.state().root.fetch_add(1, Ordering::SeqCst);
            scope.state().record(Self::NAME);
            Ok(7)
        }
    }

    struct Left;
    impl Step<Counters> for Left {
        type Output = u32;
        type Deps = (Root,);
        const NAME: &'static str = "left";
        fn provide(scope: &Scope<'_, Counters>, (root,): (Arc<u32>,)) -> Result<u32, ApiError> {
            scope.state().left.fetch_add(1, Ordering::SeqCst);
            scope.state().record(Self::NAME);
            Ok(*root + 1)
        }
    }

    struct Right;
    impl Step<Counters> for Right {
        type Output = u32;
        type Deps = (Root,);
        const NAME: &'static str = "right";
        fn provide(scope: &Scope<'_, Counters>, (root,): (Arc<u32>,)) -> Result<u32, ApiError> {
            scope.state().right.fetch_add(1, Ordering::SeqCst);
            scope.state().record(Self::NAME);
            Ok(*root + 2)
        }
    }

    struct Failing;
    impl Step<Counters> for Failing {
        type Output = ();
        type Deps = (Root,);
        const NAME: &'static str = "failing";
        fn provide(_: &Scope<'_, Counters>, _: (Arc<u32>,)) -> Result<(), ApiError> {
            Err(ApiError::Forbidden("nope".into()))
        }
    }

    struct Ping;
    impl Step<Counters> for Ping {
        type Output = ();
        type Deps = (Pong,);
        const NAME: &'static str = "ping";
        fn provide(_: &Scope<'_, Counters>, _: (Arc<()>,)) -> Result<(), ApiError> {
            Ok(())
        }
    }

    struct Pong;
    impl Step<Counters> for Pong {
        type Output = ();
        type Deps = (Ping,);
        const NAME: &'static str = "pong";
        fn provide(_: &Scope<'_, Counters>, _: (Arc<()>,)) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn request() -> HandlerRequest {
        let incoming = IncomingRequest::new(Method::GET, "/");
        HandlerRequest {
            request_id: RequestId::new(),
            method: incoming.method,
            path: incoming.target,
            handler_name: None,
            path_params: Default::default(),
            query_params: Default::default(),
            headers: incoming.headers,
            body: incoming.body,
            received_at: Instant::now(),
        }
    }

    #[test]
    fn test_shared_predecessor_runs_once() {
        let counters = Counters::default();
        let req = request();
        let scope = Scope::new(&counters, &req);

        let (left, right) = <(Left, Right) as Dependencies<Counters>>::resolve(&scope).unwrap();
        assert_eq!((*left, *right), (8, 9));
        assert_eq!(counters.root.load(Ordering::SeqCst), 1);
        assert_eq!(scope.evaluated(), vec!["root", "left", "right"]);
    }

    #[test]
    fn test_dependents_observe_same_instance() {
        let counters = Counters::default();
        let req = request();
        let scope = Scope::new(&counters, &req);
        let a = scope.resolve::<Root>().unwrap();
        let b = scope.resolve::<Root>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_failure_short_circuits_siblings() {
        let counters = Counters::default();
        let req = request();
        let scope = Scope::new(&counters, &req);

        let err = <(Failing, Left) as Dependencies<Counters>>::resolve(&scope).unwrap_err();
        assert_eq!(err.status().as_u16(), 403);
        assert_eq!(counters.root.load(Ordering::SeqCst), 1);
        assert_eq!(counters.left.load(Ordering::SeqCst), 0);
        assert_eq!(*counters.log.lock().unwrap(), vec!["root"]);
    }

    #[test]
    fn test_cache_is_per_scope() {
        let counters = Counters::default();
        let req = request();
        for _ in 0..3 {
            let scope = Scope::new(&counters, &req);
            scope.resolve::<Left>().unwrap();
        }
        assert_eq!(counters.root.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_plan_matches_execution_order() {
        let order = plan::<Counters, (Left, Right)>().unwrap();
        assert_eq!(order, vec!["root", "left", "right"]);

        let counters = Counters::default();
        let req = request();
        let scope = Scope::new(&counters, &req);
        <(Left, Right) as Dependencies<Counters>>::resolve(&scope).unwrap();
        assert_eq!(*counters.log.lock().unwrap(), order);
    }

    #[test]
    fn test_cycle_is_reported_not_overflowed() {
        let counters = Counters::default();
        let req = request();
        let scope = Scope::new(&counters, &req);
        let err = scope.resolve::<Ping>().unwrap_err();
        assert_eq!(err.code(), "internal_error");
        assert!(err.to_string().contains("ping -> pong -> ping"));

        assert!(plan::<Counters, (Ping,)>().is_err());
    }
}
