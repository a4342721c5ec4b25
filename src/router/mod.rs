//! Built router: dispatch and introspection
//!
//! A [`Router`] is the frozen product of the build phase: an immutable
//! routing table plus an alias map, safe for unbounded concurrent reads.
//! Dispatch resolves a dotted path to an entry (consulting aliases on a
//! miss), tags the context with the procedure identity, and hands off to
//! the execution pipeline. [`Router::batch`] fans out over the same table
//! with bounded parallelism and per-call timeouts, returning results in
//! input order.
//!
//! # Example
//! ```rust,ignore
//! let router = Router::builder()
//!     .mount("users", users_unit)
//!     .build()?;
//!
//! let value = router.call("users.get", json!({"id": "42"}), Context::detached()).await?;
//! ```

pub mod builder;
pub mod entry;

pub use builder::{RouterBuilder, ScopeBuilder};
pub use entry::{Alias, RouteEntry, is_relaxed_path, is_strict_path};

use crate::config::{BatchConfig, CoreConfig};
use crate::context::Context;
use crate::error::{RpcError, RpcResult};
use crate::executor::{self, CallOptions};
use crate::procedure::{ProcedureDef, ProcedureKind};
use crate::registry::Procedures;
use crate::telemetry::{TelemetryEvent, TelemetrySink, events};
use entry::suggest_similar;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Maximum number of similar paths suggested on a lookup miss.
const MAX_SUGGESTIONS: usize = 3;

/// One call inside a batch: a procedure path and its raw input.
#[derive(Debug, Clone)]
pub struct BatchCall {
    /// Procedure path (canonical or alias)
    pub path: String,
    /// Raw input value
    pub input: serde_json::Value,
}

impl BatchCall {
    /// Create a batch call.
    pub fn new(path: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            input,
        }
    }
}

/// Immutable routing table with dispatch and introspection surfaces.
pub struct Router {
    pub(crate) name: String,
    pub(crate) entries: Vec<Arc<RouteEntry>>,
    pub(crate) by_path: HashMap<String, Arc<RouteEntry>>,
    pub(crate) aliases: HashMap<String, Alias>,
    pub(crate) units: Vec<Arc<Procedures>>,
    pub(crate) config: CoreConfig,
    pub(crate) batch: BatchConfig,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
}

impl Router {
    /// Start declaring a router.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Call a procedure by path with default options.
    pub async fn call(
        &self,
        path: &str,
        input: serde_json::Value,
        ctx: Context,
    ) -> RpcResult<serde_json::Value> {
        self.call_with(path, input, ctx, &CallOptions::default())
            .await
    }

    /// Call a procedure by path.
    ///
    /// Resolution order: path grammar check, direct lookup, alias lookup.
    /// A miss returns `NOT_FOUND` carrying up to three similar known paths.
    pub async fn call_with(
        &self,
        path: &str,
        input: serde_json::Value,
        ctx: Context,
        opts: &CallOptions,
    ) -> RpcResult<serde_json::Value> {
        self.telemetry.emit(
            TelemetryEvent::new(events::ROUTER_LOOKUP_START)
                .with_system_time()
                .meta("router", self.name.clone())
                .meta("path", path),
        );
        let started = Instant::now();

        if !is_relaxed_path(path) {
            self.emit_lookup_stop(path, started, false);
            return Err(RpcError::invalid_path(path));
        }

        let Some(entry) = self.resolve_entry(path) else {
            let suggestions =
                suggest_similar(path, self.by_path.keys().map(String::as_str), MAX_SUGGESTIONS);
            self.emit_lookup_stop(path, started, false);
            return Err(RpcError::not_found(path).with_suggestions(suggestions));
        };

        let ctx = ctx.for_procedure(entry.path(), entry.kind());
        let result = match entry.resolve_def() {
            Ok(def) => {
                executor::execute(
                    entry.unit(),
                    &def,
                    entry.middleware().clone(),
                    input,
                    ctx,
                    opts,
                    &self.config,
                    &self.telemetry,
                )
                .await
            }
            Err(e) => Err(e),
        };

        self.emit_lookup_stop(path, started, true);
        result
    }

    fn resolve_entry(&self, path: &str) -> Option<&Arc<RouteEntry>> {
        if let Some(entry) = self.by_path.get(path) {
            return Some(entry);
        }

        let alias = self.aliases.get(path)?;
        self.telemetry.emit(
            TelemetryEvent::new(events::ROUTER_ALIAS_RESOLVED)
                .meta("router", self.name.clone())
                .meta("from", alias.from.clone())
                .meta("to", alias.to.clone())
                .meta("deprecated", alias.deprecated),
        );
        if alias.deprecated {
            warn!(from = %alias.from, to = %alias.to, "deprecated alias used");
        }
        self.by_path.get(&alias.to)
    }

    fn emit_lookup_stop(&self, path: &str, started: Instant, found: bool) {
        self.telemetry.emit(
            TelemetryEvent::new(events::ROUTER_LOOKUP_STOP)
                .with_duration(started.elapsed())
                .meta("router", self.name.clone())
                .meta("path", path)
                .meta("found", found),
        );
    }

    /// Fan a batch of calls out over the routing table with the router's
    /// batch configuration.
    pub async fn batch(
        &self,
        calls: Vec<BatchCall>,
        ctx: Context,
    ) -> Vec<RpcResult<serde_json::Value>> {
        self.batch_with(calls, ctx, &CallOptions::default(), &self.batch)
            .await
    }

    /// Fan a batch of calls out with explicit options.
    ///
    /// A batch above `max_batch_size` yields the single-element list
    /// `[Err(BATCH_TOO_LARGE)]`; an empty batch yields an empty list. At
    /// most `max_concurrency` calls are in flight at once, each bounded by
    /// the per-call `timeout`; a timed-out call yields `TIMEOUT` in its slot
    /// while the rest continue. Results are positional: the i-th result
    /// corresponds to the i-th call regardless of completion order.
    pub async fn batch_with(
        &self,
        calls: Vec<BatchCall>,
        ctx: Context,
        opts: &CallOptions,
        config: &BatchConfig,
    ) -> Vec<RpcResult<serde_json::Value>> {
        if calls.len() > config.max_batch_size {
            return vec![Err(RpcError::batch_too_large(
                calls.len(),
                config.max_batch_size,
            ))];
        }
        if calls.is_empty() {
            return Vec::new();
        }

        let paths: Vec<serde_json::Value> = calls
            .iter()
            .map(|call| serde_json::Value::String(call.path.clone()))
            .collect();
        self.telemetry.emit(
            TelemetryEvent::new(events::ROUTER_BATCH_START)
                .with_system_time()
                .measurement("batch_size", calls.len() as u64)
                .meta("router", self.name.clone())
                .meta("paths", serde_json::Value::Array(paths)),
        );
        let started = Instant::now();

        let total = calls.len();
        let timeout = config.timeout;
        let pending = calls.into_iter().enumerate().map(|(index, call)| {
            let ctx = ctx.clone();
            async move {
                let result =
                    match tokio::time::timeout(timeout, self.call_with(&call.path, call.input, ctx, opts))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RpcError::timeout().with_path(call.path)),
                    };
                (index, result)
            }
        });

        let mut slots: Vec<Option<RpcResult<serde_json::Value>>> =
            (0..total).map(|_| None).collect();
        let mut in_flight =
            futures::stream::iter(pending).buffer_unordered(config.max_concurrency.max(1));
        while let Some((index, result)) = in_flight.next().await {
            slots[index] = Some(result);
        }

        let results: Vec<RpcResult<serde_json::Value>> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(RpcError::internal("Batch result slot was not filled")))
            })
            .collect();

        let success_count = results.iter().filter(|r| r.is_ok()).count();
        let error_count = results.len() - success_count;
        self.telemetry.emit(
            TelemetryEvent::new(events::ROUTER_BATCH_STOP)
                .with_duration(started.elapsed())
                .meta("router", self.name.clone())
                .meta("success_count", success_count as u64)
                .meta("error_count", error_count as u64),
        );

        results
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// The router's name, as used in telemetry metadata.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All canonical paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.entries.iter().map(|e| e.path()).collect();
        paths.sort_unstable();
        paths
    }

    /// Whether a canonical path exists (aliases do not count).
    pub fn has(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// The entry at a canonical path.
    pub fn entry(&self, path: &str) -> Option<&RouteEntry> {
        self.by_path.get(path).map(Arc::as_ref)
    }

    /// All entries whose path equals `prefix` or starts with `prefix.`,
    /// sorted by path.
    pub fn entries_by_prefix(&self, prefix: &str) -> Vec<&RouteEntry> {
        let dotted = format!("{}.", prefix);
        let mut matched: Vec<&RouteEntry> = self
            .entries
            .iter()
            .filter(|e| e.path() == prefix || e.path().starts_with(&dotted))
            .map(|e| e.as_ref())
            .collect();
        matched.sort_unstable_by_key(|e| e.path());
        matched
    }

    fn paths_of_kind(&self, kind: ProcedureKind) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .entries
            .iter()
            .filter(|e| e.kind() == kind)
            .map(|e| e.path())
            .collect();
        paths.sort_unstable();
        paths
    }

    /// All query paths, sorted.
    pub fn queries(&self) -> Vec<&str> {
        self.paths_of_kind(ProcedureKind::Query)
    }

    /// All mutation paths, sorted.
    pub fn mutations(&self) -> Vec<&str> {
        self.paths_of_kind(ProcedureKind::Mutation)
    }

    /// All subscription paths, sorted.
    pub fn subscriptions(&self) -> Vec<&str> {
        self.paths_of_kind(ProcedureKind::Subscription)
    }

    /// All aliases, sorted by their alternate path.
    pub fn aliases(&self) -> Vec<&Alias> {
        let mut aliases: Vec<&Alias> = self.aliases.values().collect();
        aliases.sort_unstable_by_key(|a| a.from.as_str());
        aliases
    }

    /// Resolve a path (canonical or alias) to its canonical form.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        if let Some(entry) = self.by_path.get(path) {
            return Some(entry.path());
        }
        self.aliases.get(path).map(|alias| alias.to.as_str())
    }

    /// Names of the resolved middleware chain for a path (canonical or
    /// alias), in execution order.
    pub fn middleware_for(&self, path: &str) -> Option<Vec<&str>> {
        let canonical = self.resolve(path)?;
        self.by_path.get(canonical).map(|e| e.middleware_names())
    }

    /// The procedure definition behind a path (canonical or alias).
    pub fn procedure_for(&self, path: &str) -> Option<Arc<ProcedureDef>> {
        let canonical = self.resolve(path)?;
        let entry = self.by_path.get(canonical)?;
        entry.unit().get(entry.procedure_name()).cloned()
    }

    /// Names of the declaring units behind this table, in first-mount order.
    pub fn units(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.unit()).collect()
    }

    /// The execution-pipeline configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The batch fan-out configuration.
    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("paths", &self.paths())
            .field("aliases", &self.aliases.len())
            .field("units", &self.units())
            .finish()
    }
}
