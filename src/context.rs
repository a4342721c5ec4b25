//! Per-call context for RPC handlers and middleware
//!
//! A [`Context`] is created by the transport adapter (or a test helper),
//! passed by value into the middleware chain, and discarded when the call
//! returns. Every mutation produces a derived copy, so a context is never
//! shared across concurrent calls: assigns written by a middleware are
//! visible only downstream in that same chain.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{Context, Transport};
//!
//! let ctx = Context::new(Transport::Http)
//!     .assign("current_user", serde_json::json!({"id": 42}))
//!     .put_metadata("remote_ip", serde_json::json!("10.0.0.7"));
//!
//! assert!(ctx.get_assign("current_user").is_some());
//! ```

use crate::procedure::ProcedureKind;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The transport a call arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// An HTTP adapter
    Http,
    /// A WebSocket adapter
    WebSocket,
    /// No transport; used by tests and in-process callers
    #[default]
    None,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::WebSocket => write!(f, "websocket"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Opaque transport handle (a connection, a socket) supplied by the adapter.
pub type RawHandle = Arc<dyn Any + Send + Sync>;

/// Per-call context bag.
///
/// Holds the transport kind, opaque transport handles, user-domain assigns
/// (e.g. the authenticated principal), request metadata (request id, remote
/// ip, trace id, ...), and, once dispatch has resolved the call, the
/// procedure's canonical path and kind.
#[derive(Clone)]
pub struct Context {
    transport: Transport,
    raw_conn: Option<RawHandle>,
    raw_socket: Option<RawHandle>,
    assigns: HashMap<String, serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
    procedure_path: Option<String>,
    procedure_kind: Option<ProcedureKind>,
    started_at: Instant,
}

impl Context {
    /// Create a fresh context for the given transport.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            raw_conn: None,
            raw_socket: None,
            assigns: HashMap::new(),
            metadata: HashMap::new(),
            procedure_path: None,
            procedure_kind: None,
            started_at: Instant::now(),
        }
    }

    /// Create a context with no transport, for tests and in-process calls.
    pub fn detached() -> Self {
        Self::new(Transport::None)
    }

    /// The transport this call arrived through.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Attach the adapter's opaque connection handle.
    #[must_use = "This method returns a derived Context and does not modify self"]
    pub fn with_raw_conn(mut self, handle: RawHandle) -> Self {
        self.raw_conn = Some(handle);
        self
    }

    /// Attach the adapter's opaque socket handle.
    #[must_use = "This method returns a derived Context and does not modify self"]
    pub fn with_raw_socket(mut self, handle: RawHandle) -> Self {
        self.raw_socket = Some(handle);
        self
    }

    /// The adapter's opaque connection handle, if any.
    pub fn raw_conn(&self) -> Option<&RawHandle> {
        self.raw_conn.as_ref()
    }

    /// The adapter's opaque socket handle, if any.
    pub fn raw_socket(&self) -> Option<&RawHandle> {
        self.raw_socket.as_ref()
    }

    /// Derive a context with an assign set.
    #[must_use = "This method returns a derived Context and does not modify self"]
    pub fn assign(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.assigns.insert(key.into(), value);
        self
    }

    /// Derive a context with several assigns set.
    #[must_use = "This method returns a derived Context and does not modify self"]
    pub fn assign_many(
        mut self,
        entries: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Self {
        self.assigns.extend(entries);
        self
    }

    /// All assigns on this context.
    pub fn assigns(&self) -> &HashMap<String, serde_json::Value> {
        &self.assigns
    }

    /// Look up a single assign.
    pub fn get_assign(&self, key: &str) -> Option<&serde_json::Value> {
        self.assigns.get(key)
    }

    /// Derive a context with a metadata entry set.
    #[must_use = "This method returns a derived Context and does not modify self"]
    pub fn put_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// All request metadata on this context.
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Look up a single metadata entry.
    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Canonical path of the procedure being executed, set by dispatch.
    pub fn procedure_path(&self) -> Option<&str> {
        self.procedure_path.as_deref()
    }

    /// Kind of the procedure being executed, set by dispatch.
    pub fn procedure_kind(&self) -> Option<ProcedureKind> {
        self.procedure_kind
    }

    /// Monotonic instant this context was created at.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time elapsed since this context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Tag the context with the resolved procedure identity.
    pub(crate) fn for_procedure(mut self, path: impl Into<String>, kind: ProcedureKind) -> Self {
        self.procedure_path = Some(path.into());
        self.procedure_kind = Some(kind);
        self
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::detached()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.transport)
            .field("raw_conn", &self.raw_conn.is_some())
            .field("raw_socket", &self.raw_socket.is_some())
            .field("assigns", &self.assigns)
            .field("metadata", &self.metadata)
            .field("procedure_path", &self.procedure_path)
            .field("procedure_kind", &self.procedure_kind)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
