//! Router build phase
//!
//! [`RouterBuilder`] accumulates a declaration tree of root middleware,
//! nested scopes, procedure mounts, and aliases; [`RouterBuilder::build`]
//! walks it into the frozen routing table, validating as it goes:
//! duplicate paths, malformed segments, and every alias rule.
//!
//! Middleware ordering follows declaration order. A registration only picks
//! up middleware declared *before* it in its own frame and in enclosing
//! frames, so interleaving `middleware` and `mount` calls is meaningful.
//!
//! # Example
//! ```rust,ignore
//! let router = Router::builder()
//!     .middleware(logger, json!({}))
//!     .mount("users", users_unit)
//!     .scope("admin", |s| {
//!         s.middleware(auth, json!({"role": "admin"}))
//!             .mount("actions", admin_unit)
//!     })
//!     .alias("getUsers", "users.list")
//!     .build()?;
//! ```

use crate::config::{BatchConfig, CoreConfig};
use crate::error::BuildError;
use crate::middleware::{Middleware, ResolvedMiddleware};
use crate::procedure::SourceLocation;
use crate::registry::Procedures;
use crate::router::Router;
use crate::router::entry::{
    Alias, RouteEntry, is_relaxed_path, is_strict_segment,
};
use crate::telemetry::{TelemetrySink, TracingSink};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

enum DeclItem {
    Middleware(ResolvedMiddleware),
    Mount {
        at: String,
        unit: Arc<Procedures>,
        skip: Vec<String>,
    },
    Scope {
        prefix: String,
        items: Vec<DeclItem>,
    },
}

struct AliasDecl {
    from: String,
    to: String,
    deprecated: bool,
}

/// Declaration frame for one scope body.
pub struct ScopeBuilder {
    prefix: String,
    items: Vec<DeclItem>,
    errors: Vec<BuildError>,
}

impl ScopeBuilder {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            items: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Declare scope middleware; applies to every registration declared
    /// after it within this scope. `init` runs here, once.
    #[must_use = "This method returns a new ScopeBuilder and does not modify self"]
    pub fn middleware(mut self, module: Arc<dyn Middleware>, opts: serde_json::Value) -> Self {
        let name = module.name().to_string();
        match ResolvedMiddleware::resolve(module, opts) {
            Ok(resolved) => self.items.push(DeclItem::Middleware(resolved)),
            Err(error) => self.errors.push(BuildError::MiddlewareInit {
                middleware: name,
                error,
            }),
        }
        self
    }

    /// Register a procedure unit under `at`.
    #[must_use = "This method returns a new ScopeBuilder and does not modify self"]
    pub fn mount(self, at: impl Into<String>, unit: impl Into<Arc<Procedures>>) -> Self {
        self.mount_skipping(at, unit, Vec::<String>::new())
    }

    /// Register a procedure unit under `at`, dropping the named middleware
    /// from every resolved chain.
    #[must_use = "This method returns a new ScopeBuilder and does not modify self"]
    pub fn mount_skipping(
        mut self,
        at: impl Into<String>,
        unit: impl Into<Arc<Procedures>>,
        skip: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.items.push(DeclItem::Mount {
            at: at.into(),
            unit: unit.into(),
            skip: skip.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Open a nested scope contributing a path prefix.
    #[must_use = "This method returns a new ScopeBuilder and does not modify self"]
    pub fn scope(
        mut self,
        prefix: impl Into<String>,
        f: impl FnOnce(ScopeBuilder) -> ScopeBuilder,
    ) -> Self {
        let inner = f(ScopeBuilder::new(prefix.into()));
        self.errors.extend(inner.errors);
        self.items.push(DeclItem::Scope {
            prefix: inner.prefix,
            items: inner.items,
        });
        self
    }
}

/// Accumulates the declaration tree; [`RouterBuilder::build`] validates and
/// freezes it into a [`Router`].
pub struct RouterBuilder {
    name: String,
    config: CoreConfig,
    batch: BatchConfig,
    telemetry: Arc<dyn TelemetrySink>,
    items: Vec<DeclItem>,
    aliases: Vec<AliasDecl>,
    errors: Vec<BuildError>,
}

impl RouterBuilder {
    pub(crate) fn new() -> Self {
        Self {
            name: "rpc".to_string(),
            config: CoreConfig::default(),
            batch: BatchConfig::default(),
            telemetry: Arc::new(TracingSink),
            items: Vec::new(),
            aliases: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Name the router; appears in telemetry metadata.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the execution-pipeline configuration.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the batch fan-out configuration.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Plug in a telemetry sink; defaults to [`TracingSink`].
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Declare router-level middleware; applies to every registration
    /// declared after it. `init` runs here, once.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn middleware(mut self, module: Arc<dyn Middleware>, opts: serde_json::Value) -> Self {
        let name = module.name().to_string();
        match ResolvedMiddleware::resolve(module, opts) {
            Ok(resolved) => self.items.push(DeclItem::Middleware(resolved)),
            Err(error) => self.errors.push(BuildError::MiddlewareInit {
                middleware: name,
                error,
            }),
        }
        self
    }

    /// Register a procedure unit under `at`.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn mount(self, at: impl Into<String>, unit: impl Into<Arc<Procedures>>) -> Self {
        self.mount_skipping(at, unit, Vec::<String>::new())
    }

    /// Register a procedure unit under `at`, dropping the named middleware
    /// from every resolved chain.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn mount_skipping(
        mut self,
        at: impl Into<String>,
        unit: impl Into<Arc<Procedures>>,
        skip: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.items.push(DeclItem::Mount {
            at: at.into(),
            unit: unit.into(),
            skip: skip.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Open a scope contributing a path prefix and its own middleware list.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn scope(
        mut self,
        prefix: impl Into<String>,
        f: impl FnOnce(ScopeBuilder) -> ScopeBuilder,
    ) -> Self {
        let inner = f(ScopeBuilder::new(prefix.into()));
        self.errors.extend(inner.errors);
        self.items.push(DeclItem::Scope {
            prefix: inner.prefix,
            items: inner.items,
        });
        self
    }

    /// Declare an alternate path for an existing entry.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.push(AliasDecl {
            from: from.into(),
            to: to.into(),
            deprecated: false,
        });
        self
    }

    /// Declare a deprecated alternate path; resolutions are flagged in
    /// telemetry.
    #[must_use = "This method returns a new RouterBuilder and does not modify self"]
    pub fn deprecated_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.push(AliasDecl {
            from: from.into(),
            to: to.into(),
            deprecated: true,
        });
        self
    }

    /// Walk the declaration tree, validate it, and freeze the routing table.
    pub fn build(mut self) -> Result<Router, BuildError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let mut pending: Vec<(RouteEntry, SourceLocation)> = Vec::new();
        let mut prefixes = Vec::new();
        let mut mw_stack = Vec::new();
        walk(&self.items, &mut prefixes, &mut mw_stack, &mut pending)?;

        // Duplicate-path detection across the whole tree.
        let mut locations_by_path: HashMap<&str, Vec<SourceLocation>> = HashMap::new();
        for (entry, location) in &pending {
            locations_by_path
                .entry(entry.path())
                .or_default()
                .push(*location);
        }
        for (entry, _) in &pending {
            let locations = &locations_by_path[entry.path()];
            if locations.len() > 1 {
                return Err(BuildError::DuplicatePath {
                    path: entry.path().to_string(),
                    locations: locations.clone(),
                });
            }
        }

        let entries: Vec<Arc<RouteEntry>> = pending
            .into_iter()
            .map(|(entry, _)| Arc::new(entry))
            .collect();
        let by_path: HashMap<String, Arc<RouteEntry>> = entries
            .iter()
            .map(|entry| (entry.path().to_string(), entry.clone()))
            .collect();

        let aliases = validate_aliases(self.aliases, &by_path)?;

        let mut units: Vec<Arc<Procedures>> = Vec::new();
        for entry in &entries {
            if !units.iter().any(|u| Arc::ptr_eq(u, entry.unit())) {
                units.push(entry.unit().clone());
            }
        }

        debug!(
            router = %self.name,
            entries = entries.len(),
            aliases = aliases.len(),
            units = units.len(),
            "Routing table frozen"
        );

        Ok(Router {
            name: self.name,
            entries,
            by_path,
            aliases,
            units,
            config: self.config,
            batch: self.batch,
            telemetry: self.telemetry,
        })
    }
}

fn walk(
    items: &[DeclItem],
    prefixes: &mut Vec<String>,
    mw_stack: &mut Vec<ResolvedMiddleware>,
    out: &mut Vec<(RouteEntry, SourceLocation)>,
) -> Result<(), BuildError> {
    for item in items {
        match item {
            DeclItem::Middleware(resolved) => mw_stack.push(resolved.clone()),
            DeclItem::Scope { prefix, items } => {
                if !is_strict_segment(prefix) {
                    return Err(BuildError::InvalidSegment {
                        segment: prefix.clone(),
                    });
                }
                prefixes.push(prefix.clone());
                let depth = mw_stack.len();
                walk(items, prefixes, mw_stack, out)?;
                mw_stack.truncate(depth);
                prefixes.pop();
            }
            DeclItem::Mount { at, unit, skip } => {
                if !is_strict_segment(at) {
                    return Err(BuildError::InvalidSegment {
                        segment: at.clone(),
                    });
                }
                for def in unit.list() {
                    let mut segments = prefixes.clone();
                    segments.push(at.clone());
                    segments.push(def.name().to_string());

                    let chain: Vec<ResolvedMiddleware> = mw_stack
                        .iter()
                        .chain(def.local_middleware())
                        .filter(|m| !skip.iter().any(|s| s == m.name()))
                        .cloned()
                        .collect();

                    out.push((
                        RouteEntry::new(
                            segments,
                            def.name().to_string(),
                            def.kind(),
                            unit.clone(),
                            chain.into(),
                        ),
                        def.location(),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_aliases(
    declared: Vec<AliasDecl>,
    by_path: &HashMap<String, Arc<RouteEntry>>,
) -> Result<HashMap<String, Alias>, BuildError> {
    let mut aliases: HashMap<String, Alias> = HashMap::new();

    for decl in &declared {
        if !is_relaxed_path(&decl.from) {
            return Err(BuildError::InvalidAliasName {
                from: decl.from.clone(),
            });
        }
        if aliases.contains_key(&decl.from) {
            return Err(BuildError::DuplicateAlias {
                from: decl.from.clone(),
            });
        }
        if by_path.contains_key(&decl.from) {
            return Err(BuildError::AliasShadowsPath {
                from: decl.from.clone(),
            });
        }
        if declared.iter().any(|other| other.from == decl.to) {
            return Err(BuildError::AliasTargetIsAlias {
                from: decl.from.clone(),
                to: decl.to.clone(),
            });
        }
        if !by_path.contains_key(&decl.to) {
            return Err(BuildError::AliasTargetMissing {
                from: decl.from.clone(),
                to: decl.to.clone(),
            });
        }
        aliases.insert(
            decl.from.clone(),
            Alias {
                from: decl.from.clone(),
                to: decl.to.clone(),
                deprecated: decl.deprecated,
            },
        );
    }

    // Cycle walk. Targets are guaranteed to be canonical paths above, which
    // makes a cycle structurally impossible; the walk stays as
    // defence-in-depth against that rule changing.
    for from in aliases.keys() {
        let mut visited = vec![from.clone()];
        let mut current = from.clone();
        while let Some(alias) = aliases.get(&current) {
            current = alias.to.clone();
            if visited.contains(&current) {
                visited.push(current);
                return Err(BuildError::AliasCycle { chain: visited });
            }
            visited.push(current.clone());
        }
    }

    Ok(aliases)
}
