//! Middleware composition.
//!
//! A pipeline is an ordered list of middleware run with onion semantics:
//! each middleware may work before calling [`Next::run`], and again after it
//! returns, so the first registered middleware enters first and leaves last.
//! A middleware that does not call `next` ends the pass early.
//!
//! Handlers may be written in any of the shapes of [`Handler`]; each one is
//! converted into an `Arc<dyn Middleware>` once, when it is registered.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{self, BoxFuture};

use crate::{Context, Error};

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error>;
}

/// The continuation handed to a middleware: the rest of the pipeline.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
    /// one past the highest index dispatched in this pass
    dispatched: &'a AtomicUsize,
    /// continuation of an enclosing pipeline, run once this chain is exhausted
    tail: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    /// Runs the rest of the pipeline.
    ///
    /// Fails with [`ErrorKind::NextCalledMultipleTimes`](crate::ErrorKind::NextCalledMultipleTimes)
    /// when called again after it already ran.
    pub fn run<'c>(&self, ctx: &'c mut Context) -> BoxFuture<'c, Result<(), Error>>
    where
        'a: 'c,
    {
        let Next { chain, index, dispatched, tail } = *self;

        if dispatched.fetch_max(index + 1, Ordering::SeqCst) > index {
            return future::ready(Err(Error::next_called_multiple_times())).boxed();
        }

        async move {
            match chain.get(index) {
                Some(middleware) => {
                    let next = Next { chain, index: index + 1, dispatched, tail };
                    AssertUnwindSafe(middleware.handle(ctx, next))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(Error::from_panic(panic)))
                }
                None => match tail {
                    Some(tail) => tail.run(ctx).await,
                    None => Ok(()),
                },
            }
        }
        .boxed()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).field("len", &self.chain.len()).finish()
    }
}

type CallbackFn = dyn for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>> + Send + Sync;
type SyncFn = dyn Fn(&mut Context) -> Result<(), Error> + Send + Sync;

/// The shapes a handler can be registered in.
pub enum Handler {
    /// `f(ctx, next)` returning a boxed future, calling `next` explicitly
    Callback(Box<CallbackFn>),
    /// `f(ctx)` finishing immediately; the pipeline then proceeds
    Sync(Box<SyncFn>),
    /// a [`Middleware`] implementation, suspending at `next.run(ctx).await`
    Middleware(Arc<dyn Middleware>),
}

impl Handler {
    pub fn callback<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
    {
        Handler::Callback(Box::new(f))
    }

    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Context) -> Result<(), Error> + Send + Sync + 'static,
    {
        Handler::Sync(Box::new(f))
    }

    pub fn middleware<M: Middleware + 'static>(middleware: M) -> Self {
        Handler::Middleware(Arc::new(middleware))
    }

    /// Converts the handler into the single shape the pipeline dispatches.
    pub fn into_middleware(self) -> Arc<dyn Middleware> {
        match self {
            Handler::Callback(f) => Arc::new(CallbackAdapter(f)),
            Handler::Sync(f) => Arc::new(SyncAdapter(f)),
            Handler::Middleware(middleware) => middleware,
        }
    }
}

impl<M: Middleware + 'static> From<M> for Handler {
    fn from(middleware: M) -> Self {
        Handler::middleware(middleware)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Handler::Callback(_) => "Callback",
            Handler::Sync(_) => "Sync",
            Handler::Middleware(_) => "Middleware",
        };
        f.debug_tuple("Handler").field(&shape).finish()
    }
}

struct CallbackAdapter(Box<CallbackFn>);

#[async_trait]
impl Middleware for CallbackAdapter {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        (self.0)(ctx, next).await
    }
}

struct SyncAdapter(Box<SyncFn>);

#[async_trait]
impl Middleware for SyncAdapter {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        (self.0)(ctx)?;
        next.run(ctx).await
    }
}

/// A composed middleware stack.
#[derive(Clone)]
pub struct Pipeline {
    chain: Arc<[Arc<dyn Middleware>]>,
}

impl Pipeline {
    /// Runs the stack against `ctx`.
    pub async fn call(&self, ctx: &mut Context) -> Result<(), Error> {
        let dispatched = AtomicUsize::new(0);
        Next { chain: &self.chain, index: 0, dispatched: &dispatched, tail: None }.run(ctx).await
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

/// A nested pipeline continues with the enclosing one once its own stack is exhausted.
#[async_trait]
impl Middleware for Pipeline {
    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        let dispatched = AtomicUsize::new(0);
        Next { chain: &self.chain, index: 0, dispatched: &dispatched, tail: Some(&next) }.run(ctx).await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("len", &self.chain.len()).finish()
    }
}

/// Composes `handlers`, in order, into one pipeline.
pub fn compose<I>(handlers: I) -> Pipeline
where
    I: IntoIterator,
    I::Item: Into<Handler>,
{
    Pipeline::from_middleware(handlers.into_iter().map(|handler| handler.into().into_middleware()).collect())
}

impl Pipeline {
    pub(crate) fn from_middleware(chain: Vec<Arc<dyn Middleware>>) -> Self {
        Self { chain: chain.into() }
    }
}
