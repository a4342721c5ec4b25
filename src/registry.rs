//! Per-unit procedure registry
//!
//! A [`Procedures`] value is one *declaring unit*: an ordered collection of
//! procedure definitions with by-name and by-kind indexes, finalised and
//! frozen by [`ProceduresBuilder::build`]. Finalisation checks that every
//! definition either carries an inline handler or has a named binding on the
//! unit, and reports failures with the file and line of the offending
//! declaration.
//!
//! Bindings exist for handlers that cannot be written inline at the
//! declaration: [`ProceduresBuilder::bind`] may appear anywhere before
//! `build()`, and the executor fetches the binding at call time.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{Procedure, Procedures};
//!
//! let users = Procedures::builder("users")
//!     .procedure(Procedure::query("get").handler(get_user))
//!     .procedure(Procedure::query("list"))
//!     .bind("list", list_users)
//!     .build()?;
//! ```

use crate::error::BuildError;
use crate::procedure::{BoxedHandler, Procedure, ProcedureDef, ProcedureKind, into_boxed};
use crate::router::entry::is_strict_segment;
use crate::{Context, RpcResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Frozen collection of procedure definitions for one declaring unit.
pub struct Procedures {
    unit: String,
    defs: Vec<Arc<ProcedureDef>>,
    by_name: HashMap<String, usize>,
    by_kind: HashMap<ProcedureKind, Vec<usize>>,
    bindings: HashMap<String, BoxedHandler>,
}

impl Procedures {
    /// Start declaring a unit.
    pub fn builder(unit: impl Into<String>) -> ProceduresBuilder {
        ProceduresBuilder {
            unit: unit.into(),
            procedures: Vec::new(),
            bindings: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// The unit's name.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// All definitions, in declaration order.
    pub fn list(&self) -> &[Arc<ProcedureDef>] {
        &self.defs
    }

    /// All definitions of one kind, in declaration order.
    pub fn list_by_kind(&self, kind: ProcedureKind) -> Vec<&Arc<ProcedureDef>> {
        self.by_kind
            .get(&kind)
            .map(|indexes| indexes.iter().map(|&i| &self.defs[i]).collect())
            .unwrap_or_default()
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<&Arc<ProcedureDef>> {
        self.by_name.get(name).map(|&i| &self.defs[i])
    }

    /// Whether the unit declares a procedure with this name.
    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All procedure names, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.defs.iter().map(|d| d.name()).collect()
    }

    /// Number of declared procedures.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the unit declares no procedures.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Resolve a definition's handler at call time: the inline handler if
    /// present, otherwise the unit binding with the definition's name.
    pub(crate) fn handler_for(&self, def: &ProcedureDef) -> Option<BoxedHandler> {
        def.handler
            .clone()
            .or_else(|| self.bindings.get(def.name()).cloned())
    }
}

impl std::fmt::Debug for Procedures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedures")
            .field("unit", &self.unit)
            .field("procedures", &self.names())
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Accumulates declarations for one unit; [`ProceduresBuilder::build`]
/// validates and freezes them.
pub struct ProceduresBuilder {
    unit: String,
    procedures: Vec<ProcedureDef>,
    bindings: HashMap<String, BoxedHandler>,
    errors: Vec<BuildError>,
}

impl ProceduresBuilder {
    /// Add a procedure declaration.
    #[must_use = "This method returns a new ProceduresBuilder and does not modify self"]
    pub fn procedure(mut self, procedure: Procedure) -> Self {
        let (def, errors) = procedure.into_def();
        self.errors.extend(errors);
        self.procedures.push(def);
        self
    }

    /// Bind a typed handler to a procedure declared without one. The binding
    /// may appear anywhere before `build()`.
    #[must_use = "This method returns a new ProceduresBuilder and does not modify self"]
    pub fn bind<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(In, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Out>> + Send + 'static,
    {
        self.bind_raw(name, into_boxed(f))
    }

    /// Bind a raw handler to a procedure declared without one.
    #[must_use = "This method returns a new ProceduresBuilder and does not modify self"]
    pub fn bind_raw(mut self, name: impl Into<String>, handler: BoxedHandler) -> Self {
        self.bindings.insert(name.into(), handler);
        self
    }

    /// Validate and freeze the unit.
    pub fn build(self) -> Result<Procedures, BuildError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let mut by_name = HashMap::new();
        let mut by_kind: HashMap<ProcedureKind, Vec<usize>> = HashMap::new();

        for (index, def) in self.procedures.iter().enumerate() {
            if !is_strict_segment(def.name()) {
                return Err(BuildError::InvalidProcedureName {
                    name: def.name().to_string(),
                    location: def.location(),
                });
            }

            if by_name.insert(def.name().to_string(), index).is_some() {
                return Err(BuildError::DuplicateProcedureName {
                    name: def.name().to_string(),
                    location: def.location(),
                });
            }

            if !def.has_handler() && !self.bindings.contains_key(def.name()) {
                return Err(BuildError::MissingHandler {
                    name: def.name().to_string(),
                    unit: self.unit.clone(),
                    location: def.location(),
                });
            }

            if let Some(route) = def.route()
                && route.path.is_empty()
            {
                return Err(BuildError::EmptyRoutePath {
                    name: def.name().to_string(),
                    location: def.location(),
                });
            }

            by_kind.entry(def.kind()).or_default().push(index);
        }

        debug!(
            unit = %self.unit,
            procedures = self.procedures.len(),
            "Procedure unit finalised"
        );

        Ok(Procedures {
            unit: self.unit,
            defs: self.procedures.into_iter().map(Arc::new).collect(),
            by_name,
            by_kind,
            bindings: self.bindings,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
