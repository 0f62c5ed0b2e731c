use crate::error::ChainError;
use crate::RequestContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// One link of a handler chain.
///
/// A handler reads and writes the [`RequestContext`], may run the rest of the chain with
/// [`RequestContext::next`] to wrap it, and reports failure by returning an error.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> Result<(), ChainError>;
}

/// A shared, type-erased handler, the element type of a handler chain.
pub type BoxHandler = Arc<dyn Handler>;

/// A handler backed by a function or closure returning a boxed future.
pub struct FnHandler<F> {
    f: F,
}

/// Turns a function into a [`Handler`].
///
/// ```
/// use micro_chain::{handler_fn, RequestContext};
///
/// let hello = handler_fn(|ctx: &mut RequestContext| Box::pin(async move { ctx.string("hello", None) }));
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'c> Fn(&'c mut RequestContext) -> BoxFuture<'c, Result<(), ChainError>> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'c> Fn(&'c mut RequestContext) -> BoxFuture<'c, Result<(), ChainError>> + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext) -> Result<(), ChainError> {
        (self.f)(ctx).await
    }
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn call(&self, ctx: &mut RequestContext) -> Result<(), ChainError> {
        (**self).call(ctx).await
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}
