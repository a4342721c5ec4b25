#![warn(missing_docs)]
//! # nexus-rpc
//!
//! A transport-agnostic, schema-validated RPC framework core.
//!
//! Declare **procedures** (read-only queries, side-effecting mutations,
//! long-lived subscriptions) with schemas describing their inputs and
//! outputs, organise them into a hierarchical dotted namespace with
//! composable middleware and path aliases, and dispatch calls (singly or
//! in bounded-parallel batches) through an immutable routing table. The
//! core owns resolution, validation, middleware composition, execution,
//! and telemetry; HTTP/WebSocket adapters own the wire.
//!
//! ## Architecture
//!
//! ```text
//! declaration tree ──build──▶ routing table + alias map (frozen)
//!                                     │
//!        Router::call / batch ──lookup┘
//!                │
//!                ▼
//!   before-hooks → input validation → middleware chain → handler
//!                → output validation → after-hooks
//! ```
//!
//! ## Quick Start
//!
//! ### 1. Declare procedures
//!
//! ```rust,ignore
//! use nexus_rpc::prelude::*;
//!
//! #[derive(serde::Deserialize)]
//! struct GetUserInput { id: String }
//!
//! async fn get_user(input: GetUserInput, _ctx: Context) -> RpcResult<serde_json::Value> {
//!     Ok(serde_json::json!({"id": input.id, "name": "Alice"}))
//! }
//!
//! let users = Procedures::builder("users")
//!     .procedure(
//!         Procedure::query("get")
//!             .input(ObjectSchema::new().field("id", FieldSchema::string()))
//!             .handler(get_user),
//!     )
//!     .build()?;
//! ```
//!
//! ### 2. Build the router
//!
//! ```rust,ignore
//! let router = Router::builder()
//!     .middleware(Arc::new(RequestLogger), serde_json::json!({}))
//!     .mount("users", users)
//!     .scope("admin", |s| {
//!         s.middleware(auth, serde_json::json!({"role": "admin"}))
//!             .mount("reports", reports)
//!     })
//!     .alias("getUser", "users.get")
//!     .build()?;
//! ```
//!
//! ### 3. Dispatch
//!
//! ```rust,ignore
//! let ctx = Context::new(Transport::Http);
//! let user = router.call("users.get", serde_json::json!({"id": "42"}), ctx).await?;
//!
//! let results = router
//!     .batch(
//!         vec![
//!             BatchCall::new("users.get", serde_json::json!({"id": "1"})),
//!             BatchCall::new("users.get", serde_json::json!({"id": "2"})),
//!         ],
//!         Context::new(Transport::Http),
//!     )
//!     .await;
//! ```
//!
//! ## Middleware
//!
//! Middleware transforms the per-call [`Context`] in a continuation-passing
//! chain; the handler runs on the context the chain accumulated. Each
//! middleware's `init` runs once at its declaration site.
//!
//! ```rust,ignore
//! use nexus_rpc::middleware::{from_fn, Next};
//!
//! let auth = from_fn("auth", |ctx: Context, _config, next: Next| async move {
//!     if ctx.get_assign("current_user").is_none() {
//!         return Err(RpcError::custom("UNAUTHORIZED", "Sign in first"));
//!     }
//!     next.run(ctx).await
//! });
//! ```
//!
//! ## Error Handling
//!
//! Errors are values with wire-stable codes; handler domain codes pass
//! through verbatim:
//!
//! ```rust,ignore
//! RpcError::not_found("users.gett")           // NOT_FOUND + suggestions
//! RpcError::validation("Validation failed")   // VALIDATION_ERROR + details
//! RpcError::custom("QUOTA_EXCEEDED", "…")     // passthrough
//! ```
//!
//! ## Module Structure
//!
//! - [`Router`] / [`RouterBuilder`] - routing table construction and dispatch
//! - [`Procedures`] / [`Procedure`] - declaring units and their definitions
//! - [`Context`] - per-call bag of transport, assigns, and metadata
//! - [`middleware`] - middleware contract and chain execution
//! - [`schema`] - validator facade and the built-in object schema
//! - [`telemetry`] - dispatch events and pluggable sinks
//! - [`subscription`] - subscription tokens and event channels
//! - [`RpcError`] - error taxonomy
//! - [`CoreConfig`] / [`BatchConfig`] - pipeline and fan-out configuration

mod config;
mod context;
mod error;
mod executor;
pub mod middleware;
pub mod procedure;
mod registry;
mod router;
pub mod schema;
pub mod subscription;
pub mod telemetry;

#[cfg(test)]
mod tests;

// Public API
pub use config::{BatchConfig, ConfigValidationError, CoreConfig};
pub use context::{Context, RawHandle, Transport};
pub use error::{BuildError, ErrorCode, RpcError, RpcResult};
pub use executor::{AfterHook, BeforeHook, CallOptions};
pub use middleware::{Middleware, Next, RequestLogger, ResolvedMiddleware, from_fn};
pub use procedure::{
    BoxedHandler, Deprecated, HttpMethod, Procedure, ProcedureDef, ProcedureKind, ProcedureMeta,
    RestRoute, SourceLocation,
};
pub use registry::{Procedures, ProceduresBuilder};
pub use router::{
    Alias, BatchCall, RouteEntry, Router, RouterBuilder, ScopeBuilder, is_relaxed_path,
    is_strict_path,
};
pub use schema::{FieldSchema, ObjectSchema, ParseMode, Schema, SchemaRef, ValidationError};
pub use telemetry::{CaptureSink, NullSink, TelemetryEvent, TelemetrySink, TracingSink};

/// Prelude for convenient imports.
///
/// ```rust,ignore
/// use nexus_rpc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BatchCall,
        BatchConfig,
        CallOptions,
        Context,
        CoreConfig,
        ErrorCode,
        FieldSchema,
        HttpMethod,
        Middleware,
        Next,
        ObjectSchema,
        ParseMode,
        Procedure,
        ProcedureKind,
        ProcedureMeta,
        Procedures,
        RequestLogger,
        Router,
        RpcError,
        RpcResult,
        Schema,
        SchemaRef,
        Transport,
        from_fn,
    };
    pub use crate::subscription::{Event, SubscriptionId, SubscriptionToken, event_channel};
}
