//! Procedure definitions and the fluent declaration builder
//!
//! A [`ProcedureDef`] is an immutable record describing one unit of RPC
//! work: its name, kind, input/output schemas, handler, metadata, optional
//! REST route, procedure-local middleware, and the source location it was
//! declared at (used in build diagnostics).
//!
//! Definitions are declared through the [`Procedure`] builder and collected
//! into a [`crate::registry::Procedures`] unit:
//!
//! ```rust,ignore
//! use nexus_rpc::{Procedure, ProcedureMeta};
//! use nexus_rpc::schema::{FieldSchema, ObjectSchema};
//!
//! let get_user = Procedure::query("get")
//!     .input(ObjectSchema::new().field("id", FieldSchema::string()))
//!     .meta(ProcedureMeta::new().description("Fetch a user by id").tag("users"))
//!     .handler(|input: GetUserInput, ctx| async move { /* … */ });
//! ```

use crate::context::Context;
use crate::error::{BuildError, RpcError, RpcResult};
use crate::middleware::{Middleware, ResolvedMiddleware};
use crate::schema::{Schema, SchemaRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Kind of procedure being declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureKind {
    /// Read-only operation, idempotent and safe to retry
    Query,
    /// Side-effecting operation, not idempotent
    Mutation,
    /// Long-lived operation yielding a lazy sequence of events
    Subscription,
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// Where a declaration appeared, for build diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    /// Source file of the declaration
    pub file: &'static str,
    /// Line of the declaration
    pub line: u32,
    /// Column of the declaration
    pub column: u32,
}

impl SourceLocation {
    /// Capture the caller's location.
    #[track_caller]
    pub fn capture() -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
            column: loc.column(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// HTTP method of a REST route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// The method's canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A REST route hint consumed by HTTP adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestRoute {
    /// HTTP method
    pub method: HttpMethod,
    /// Path template, e.g. `/users/{id}`
    pub path: String,
}

impl RestRoute {
    /// Create a route hint.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

/// Deprecation marker: a bare flag or a reason string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Deprecated {
    /// Deprecated yes/no
    Flag(bool),
    /// Deprecated with a migration hint
    Reason(String),
}

impl Deprecated {
    /// Whether the marker actually deprecates the procedure.
    pub fn is_active(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Reason(_) => true,
        }
    }
}

/// Metadata attached to a procedure.
///
/// The fields below are the options the core recognises; unknown keys are
/// preserved in `extra` and ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcedureMeta {
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Short summary for documentation consumers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Tags for categorisation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Example inputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<serde_json::Value>,
    /// Deprecation marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<Deprecated>,
    /// Stable operation id for documentation consumers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Per-procedure override of the output-validation default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate_output: Option<bool>,
    /// Unrecognised keys, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProcedureMeta {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the description.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the summary.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Add a tag.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add an example input.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn example(mut self, example: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(example) {
            self.examples.push(value);
        }
        self
    }

    /// Mark as deprecated.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn deprecated(mut self) -> Self {
        self.deprecated = Some(Deprecated::Flag(true));
        self
    }

    /// Mark as deprecated with a migration hint.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn deprecated_because(mut self, reason: impl Into<String>) -> Self {
        self.deprecated = Some(Deprecated::Reason(reason.into()));
        self
    }

    /// Set a stable operation id.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    /// Override the output-validation default for this procedure.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn validate_output(mut self, enabled: bool) -> Self {
        self.validate_output = Some(enabled);
        self
    }

    /// Attach an unrecognised key, preserved verbatim.
    #[must_use = "This method returns a new ProcedureMeta and does not modify self"]
    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Type alias for the boxed async handler function.
///
/// A handler receives the validated (typed) input value and the context the
/// middleware chain accumulated, and produces the output value or an error.
/// Domain error codes pass through to the caller verbatim.
pub type BoxedHandler = Arc<
    dyn Fn(
            serde_json::Value,
            Context,
        ) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Adapt a typed async function into a [`BoxedHandler`].
pub fn into_boxed<In, Out, F, Fut>(f: F) -> BoxedHandler
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(In, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Out>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |raw: serde_json::Value, ctx: Context| {
        let f = f.clone();
        Box::pin(async move {
            let input: In = serde_json::from_value(raw).map_err(|e| {
                warn!(error = %e, "Failed to deserialize validated input");
                RpcError::validation(format!("Invalid input: {}", e))
            })?;

            let output = f(input, ctx).await?;

            serde_json::to_value(output).map_err(|e| {
                warn!(error = %e, "Failed to serialize handler output");
                RpcError::internal(format!("Failed to serialize output: {}", e))
            })
        })
    })
}

/// Immutable procedure record, frozen once registered.
pub struct ProcedureDef {
    name: String,
    kind: ProcedureKind,
    input: Option<SchemaRef>,
    output: Option<SchemaRef>,
    pub(crate) handler: Option<BoxedHandler>,
    meta: ProcedureMeta,
    route: Option<RestRoute>,
    local_middleware: Vec<ResolvedMiddleware>,
    location: SourceLocation,
}

impl ProcedureDef {
    /// The procedure's name, unique within its declaring unit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The procedure's kind.
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// The declared input schema, if any.
    pub fn input(&self) -> Option<&SchemaRef> {
        self.input.as_ref()
    }

    /// The declared output schema, if any.
    pub fn output(&self) -> Option<&SchemaRef> {
        self.output.as_ref()
    }

    /// The procedure's metadata.
    pub fn meta(&self) -> &ProcedureMeta {
        &self.meta
    }

    /// The REST route hint, if any.
    pub fn route(&self) -> Option<&RestRoute> {
        self.route.as_ref()
    }

    /// Procedure-local middleware, in declaration order.
    pub fn local_middleware(&self) -> &[ResolvedMiddleware] {
        &self.local_middleware
    }

    /// Where the procedure was declared.
    pub fn location(&self) -> SourceLocation {
        self.location
    }

    /// Whether an inline handler was declared (as opposed to a named
    /// binding on the declaring unit).
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }
}

impl fmt::Debug for ProcedureDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .field("handler", &self.handler.is_some())
            .field("route", &self.route)
            .field(
                "local_middleware",
                &self
                    .local_middleware
                    .iter()
                    .map(|m| m.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("location", &self.location)
            .finish()
    }
}

/// Fluent builder for a [`ProcedureDef`].
pub struct Procedure {
    def: ProcedureDef,
    pub(crate) errors: Vec<BuildError>,
}

impl Procedure {
    #[track_caller]
    fn new(name: impl Into<String>, kind: ProcedureKind) -> Self {
        Self {
            def: ProcedureDef {
                name: name.into(),
                kind,
                input: None,
                output: None,
                handler: None,
                meta: ProcedureMeta::default(),
                route: None,
                local_middleware: Vec::new(),
                location: SourceLocation::capture(),
            },
            errors: Vec::new(),
        }
    }

    /// Declare a read-only query.
    #[track_caller]
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name, ProcedureKind::Query)
    }

    /// Declare a side-effecting mutation.
    #[track_caller]
    pub fn mutation(name: impl Into<String>) -> Self {
        Self::new(name, ProcedureKind::Mutation)
    }

    /// Declare a subscription.
    #[track_caller]
    pub fn subscription(name: impl Into<String>) -> Self {
        Self::new(name, ProcedureKind::Subscription)
    }

    /// Set the input schema.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn input<S: Schema + 'static>(mut self, schema: S) -> Self {
        self.def.input = Some(Arc::new(schema));
        self
    }

    /// Set a shared input schema handle.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn input_shared(mut self, schema: SchemaRef) -> Self {
        self.def.input = Some(schema);
        self
    }

    /// Set the output schema.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn output<S: Schema + 'static>(mut self, schema: S) -> Self {
        self.def.output = Some(Arc::new(schema));
        self
    }

    /// Set a shared output schema handle.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn output_shared(mut self, schema: SchemaRef) -> Self {
        self.def.output = Some(schema);
        self
    }

    /// Attach metadata.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn meta(mut self, meta: ProcedureMeta) -> Self {
        self.def.meta = meta;
        self
    }

    /// Attach a REST route hint.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn route(mut self, method: HttpMethod, path: impl Into<String>) -> Self {
        self.def.route = Some(RestRoute::new(method, path));
        self
    }

    /// Attach procedure-local middleware; its `init` runs here, once.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn with(mut self, module: Arc<dyn Middleware>, opts: serde_json::Value) -> Self {
        let name = module.name().to_string();
        match ResolvedMiddleware::resolve(module, opts) {
            Ok(resolved) => self.def.local_middleware.push(resolved),
            Err(error) => self.errors.push(BuildError::MiddlewareInit {
                middleware: name,
                error,
            }),
        }
        self
    }

    /// Set a typed async handler.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn handler<In, Out, F, Fut>(mut self, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(In, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Out>> + Send + 'static,
    {
        self.def.handler = Some(into_boxed(f));
        self
    }

    /// Set a raw handler operating directly on JSON values.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn handler_raw(mut self, handler: BoxedHandler) -> Self {
        self.def.handler = Some(handler);
        self
    }

    pub(crate) fn into_def(self) -> (ProcedureDef, Vec<BuildError>) {
        (self.def, self.errors)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_display() {
        assert_eq!(ProcedureKind::Query.to_string(), "query");
        assert_eq!(ProcedureKind::Mutation.to_string(), "mutation");
        assert_eq!(ProcedureKind::Subscription.to_string(), "subscription");
    }

    #[test]
    fn test_builder_captures_location() {
        let (def, errors) = Procedure::query("get").into_def();
        assert!(errors.is_empty());
        assert!(def.location().file.ends_with("procedure.rs"));
        assert!(def.location().line > 0);
    }

    #[test]
    fn test_meta_preserves_unknown_keys() {
        let raw = json!({
            "description": "Fetch a user",
            "tags": ["users"],
            "x_internal_owner": "platform-team"
        });
        let meta: ProcedureMeta = serde_json::from_value(raw).unwrap();

        assert_eq!(meta.description.as_deref(), Some("Fetch a user"));
        assert_eq!(meta.extra["x_internal_owner"], "platform-team");

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["x_internal_owner"], "platform-team");
    }

    #[test]
    fn test_deprecated_variants() {
        assert!(Deprecated::Flag(true).is_active());
        assert!(!Deprecated::Flag(false).is_active());
        assert!(Deprecated::Reason("use users.get_v2".into()).is_active());

        let meta: ProcedureMeta =
            serde_json::from_value(json!({"deprecated": "use users.get_v2"})).unwrap();
        assert!(matches!(meta.deprecated, Some(Deprecated::Reason(_))));

        let meta: ProcedureMeta = serde_json::from_value(json!({"deprecated": true})).unwrap();
        assert!(matches!(meta.deprecated, Some(Deprecated::Flag(true))));
    }

    #[tokio::test]
    async fn test_into_boxed_roundtrip() {
        #[derive(serde::Deserialize)]
        struct Input {
            id: String,
        }

        let handler = into_boxed(|input: Input, _ctx: Context| async move {
            Ok(json!({"id": input.id, "name": "Alice"}))
        });

        let out = handler(json!({"id": "42"}), Context::detached())
            .await
            .unwrap();
        assert_eq!(out["id"], "42");
        assert_eq!(out["name"], "Alice");
    }

    #[tokio::test]
    async fn test_into_boxed_rejects_mismatched_input() {
        #[derive(serde::Deserialize)]
        struct Input {
            #[allow(dead_code)]
            id: i64,
        }

        let handler =
            into_boxed(|_input: Input, _ctx: Context| async move { Ok(json!(null)) });

        let err = handler(json!({"id": "not-a-number"}), Context::detached())
            .await
            .unwrap_err();
        assert_eq!(err.code.as_str(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_http_method_strings() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        let m: HttpMethod = serde_json::from_value(json!("PATCH")).unwrap();
        assert_eq!(m, HttpMethod::Patch);
    }
}
