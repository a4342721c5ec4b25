//! Middleware contract and chain execution
//!
//! A middleware is a pair of operations: [`Middleware::init`] runs once at
//! the declaration site and turns raw options into a config; [`Middleware::call`]
//! runs per dispatch, receives the current [`Context`], its config, and the
//! [`Next`] continuation, and produces a derived context. The handler runs
//! after the innermost middleware, on the context the chain accumulated.
//!
//! # Continuation protocol
//!
//! `Next` is consumed by value, so a middleware cannot invoke it twice. A
//! middleware that returns `Ok` without having invoked it at all is treated
//! as a protocol violation and the call fails with `INTERNAL_ERROR`:
//! short-circuiting is expressed by returning `Err`.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::middleware::{from_fn, Next};
//! use nexus_rpc::{Context, RpcResult};
//!
//! let auth = from_fn("auth", |ctx: Context, _config, next: Next| async move {
//!     if ctx.get_assign("current_user").is_none() {
//!         return Err(RpcError::custom("UNAUTHORIZED", "Sign in first"));
//!     }
//!     next.run(ctx).await
//! });
//! ```

use crate::context::Context;
use crate::error::{RpcError, RpcResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// The boxed future a middleware's `call` returns.
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = RpcResult<Context>> + Send>>;

/// A middleware participating in the dispatch chain.
pub trait Middleware: Send + Sync {
    /// Name identifying this middleware in skip lists and diagnostics.
    fn name(&self) -> &str;

    /// Turn declaration-site options into the config passed to every `call`.
    ///
    /// Runs exactly once where the middleware is declared; rejecting the
    /// options fails the build with a `MiddlewareInit` error.
    fn init(&self, opts: serde_json::Value) -> RpcResult<serde_json::Value> {
        Ok(opts)
    }

    /// Process one call, invoking `next` to continue the chain.
    fn call(&self, ctx: Context, config: Arc<serde_json::Value>, next: Next) -> MiddlewareFuture;
}

/// A middleware together with its initialised config, ready to run.
#[derive(Clone)]
pub struct ResolvedMiddleware {
    module: Arc<dyn Middleware>,
    config: Arc<serde_json::Value>,
}

impl ResolvedMiddleware {
    /// Initialise a middleware with its declaration-site options.
    pub fn resolve(
        module: Arc<dyn Middleware>,
        opts: serde_json::Value,
    ) -> Result<Self, RpcError> {
        let config = module.init(opts)?;
        Ok(Self {
            module,
            config: Arc::new(config),
        })
    }

    /// The middleware's name.
    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// The initialised config.
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }
}

impl std::fmt::Debug for ResolvedMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedMiddleware")
            .field("name", &self.module.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Continuation handed to a middleware.
///
/// Consuming `run` makes double invocation impossible; the chain detects a
/// middleware that returned `Ok` without invoking its continuation and fails
/// the call.
pub struct Next {
    chain: Arc<[ResolvedMiddleware]>,
    index: usize,
    invoked: Arc<AtomicBool>,
}

impl Next {
    /// Continue the chain with the given (possibly derived) context.
    pub async fn run(self, ctx: Context) -> RpcResult<Context> {
        self.invoked.store(true, Ordering::Release);
        run_chain(self.chain, self.index, ctx).await
    }
}

fn run_chain(
    chain: Arc<[ResolvedMiddleware]>,
    index: usize,
    ctx: Context,
) -> Pin<Box<dyn Future<Output = RpcResult<Context>> + Send>> {
    Box::pin(async move {
        let Some(entry) = chain.get(index).cloned() else {
            return Ok(ctx);
        };

        let invoked = Arc::new(AtomicBool::new(false));
        let next = Next {
            chain: chain.clone(),
            index: index + 1,
            invoked: invoked.clone(),
        };

        let ctx = entry.module.call(ctx, entry.config.clone(), next).await?;

        if !invoked.load(Ordering::Acquire) {
            warn!(
                middleware = entry.module.name(),
                "middleware returned success without invoking next"
            );
            return Err(RpcError::internal(format!(
                "Middleware '{}' completed without invoking next",
                entry.module.name()
            )));
        }

        Ok(ctx)
    })
}

/// Run a resolved chain to completion, producing the accumulated context.
pub(crate) async fn execute_chain(
    chain: Arc<[ResolvedMiddleware]>,
    ctx: Context,
) -> RpcResult<Context> {
    run_chain(chain, 0, ctx).await
}

// =============================================================================
// Function adapter
// =============================================================================

struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Context, Arc<serde_json::Value>, Next) -> Fut + Send + Sync,
    Fut: Future<Output = RpcResult<Context>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: Context, config: Arc<serde_json::Value>, next: Next) -> MiddlewareFuture {
        Box::pin((self.f)(ctx, config, next))
    }
}

/// Create a middleware from an async function.
///
/// # Example
/// ```rust,ignore
/// let tagging = from_fn("tenant_tag", |ctx: Context, config, next: Next| async move {
///     let tenant = config["tenant"].clone();
///     next.run(ctx.assign("tenant", tenant)).await
/// });
/// ```
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Middleware>
where
    F: Fn(Context, Arc<serde_json::Value>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Context>> + Send + 'static,
{
    Arc::new(FnMiddleware {
        name: name.into(),
        f,
    })
}

// =============================================================================
// Built-in request logger
// =============================================================================

/// Middleware that tags each call with a `request_id` metadata entry and
/// logs the traversal via `tracing`.
///
/// Declared options are passed through unchanged; the logger recognises
/// none today.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn name(&self) -> &str {
        "request_logger"
    }

    fn call(&self, ctx: Context, _config: Arc<serde_json::Value>, next: Next) -> MiddlewareFuture {
        Box::pin(async move {
            let request_id = Uuid::now_v7().to_string();
            debug!(
                request_id = %request_id,
                path = ctx.procedure_path().unwrap_or("<unresolved>"),
                kind = ?ctx.procedure_kind(),
                "dispatching procedure"
            );

            let ctx = ctx.put_metadata("request_id", serde_json::Value::String(request_id.clone()));
            let result = next.run(ctx).await;

            match &result {
                Ok(_) => debug!(request_id = %request_id, "procedure chain completed"),
                Err(e) => debug!(
                    request_id = %request_id,
                    error_code = %e.code,
                    "procedure chain failed"
                ),
            }

            result
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
