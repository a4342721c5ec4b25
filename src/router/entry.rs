//! Routing table rows, aliases, and path grammars
//!
//! A [`RouteEntry`] is one pre-assembled row of the routing table: the
//! canonical dotted path, its segments, the procedure's kind, the fully
//! resolved middleware chain, and a back-reference to the declaring unit.
//! The definition itself is fetched from the unit at call time, which keeps
//! captured closures out of the frozen table.
//!
//! Two path grammars exist. Canonical procedure paths use the strict
//! grammar (`[a-z][a-z0-9_]*` segments); aliases may use the relaxed
//! grammar (`[A-Za-z][A-Za-z0-9_]*` segments), which admits legacy
//! camelCase names. Strict is a subset of relaxed.

use crate::error::{RpcError, RpcResult};
use crate::middleware::ResolvedMiddleware;
use crate::procedure::{ProcedureDef, ProcedureKind};
use crate::registry::Procedures;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether `segment` matches the strict identifier grammar
/// `[a-z][a-z0-9_]*`.
pub fn is_strict_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Whether `segment` matches the relaxed identifier grammar
/// `[A-Za-z][A-Za-z0-9_]*`.
pub fn is_relaxed_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `path` is a dotted sequence of strict segments: no empty
/// segments, no leading or trailing dots, ASCII only.
pub fn is_strict_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_strict_segment)
}

/// Whether `path` is a dotted sequence of relaxed segments.
pub fn is_relaxed_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_relaxed_segment)
}

/// Up to `limit` known paths ranked by Jaro similarity to `target`,
/// keeping only scores above 0.7.
///
/// The scan walks every key; acceptable because routing tables are small
/// and this only runs on the miss path.
pub(crate) fn suggest_similar<'a>(
    target: &str,
    candidates: impl Iterator<Item = &'a str>,
    limit: usize,
) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = candidates
        .map(|candidate| (strsim::jaro(target, candidate), candidate))
        .filter(|(score, _)| *score > 0.7)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, candidate)| candidate.to_string())
        .collect()
}

/// One frozen row of the routing table.
pub struct RouteEntry {
    path: String,
    segments: Vec<String>,
    procedure_name: String,
    kind: ProcedureKind,
    unit: Arc<Procedures>,
    middleware: Arc<[ResolvedMiddleware]>,
}

impl RouteEntry {
    pub(crate) fn new(
        segments: Vec<String>,
        procedure_name: String,
        kind: ProcedureKind,
        unit: Arc<Procedures>,
        middleware: Arc<[ResolvedMiddleware]>,
    ) -> Self {
        Self {
            path: segments.join("."),
            segments,
            procedure_name,
            kind,
            unit,
            middleware,
        }
    }

    /// The canonical dotted path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path's segments; joining them with `.` yields [`Self::path`].
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The procedure's name inside its declaring unit.
    pub fn procedure_name(&self) -> &str {
        &self.procedure_name
    }

    /// The procedure's kind.
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// The declaring unit.
    pub fn unit(&self) -> &Arc<Procedures> {
        &self.unit
    }

    /// The fully resolved middleware chain: router-level, then scope stack
    /// outer→inner, then procedure-local, minus skipped modules.
    pub fn middleware(&self) -> &Arc<[ResolvedMiddleware]> {
        &self.middleware
    }

    /// Names of the chain's middleware, in execution order.
    pub fn middleware_names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// Fetch the procedure definition from the declaring unit.
    ///
    /// Runtime indirection: definitions may hold captured closures that are
    /// not embedded in the frozen table.
    pub(crate) fn resolve_def(&self) -> RpcResult<Arc<ProcedureDef>> {
        self.unit.get(&self.procedure_name).cloned().ok_or_else(|| {
            RpcError::internal(format!(
                "Routing table references unknown procedure '{}' in unit '{}'",
                self.procedure_name,
                self.unit.unit()
            ))
        })
    }
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("unit", &self.unit.unit())
            .field("middleware", &self.middleware_names())
            .finish()
    }
}

/// An alternate path resolving to an existing entry's canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    /// The alternate path (relaxed grammar)
    pub from: String,
    /// The canonical target path
    pub to: String,
    /// Whether use of this alias is deprecated
    pub deprecated: bool,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_segment_grammar() {
        for ok in ["users", "get_user", "v2", "a"] {
            assert!(is_strict_segment(ok), "{:?} should be strict", ok);
        }
        for bad in ["Users", "2fast", "_x", "", "get-user", "naïve"] {
            assert!(!is_strict_segment(bad), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_relaxed_segment_grammar() {
        for ok in ["getUsers", "Users", "users", "X1"] {
            assert!(is_relaxed_segment(ok), "{:?} should be relaxed", ok);
        }
        for bad in ["1x", "_x", "", "get-user"] {
            assert!(!is_relaxed_segment(bad), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_path_grammar_edges() {
        assert!(is_strict_path("users.get"));
        assert!(!is_strict_path(""));
        assert!(!is_strict_path(".users"));
        assert!(!is_strict_path("users."));
        assert!(!is_strict_path("users..get"));
        assert!(!is_strict_path("Users.get"));

        assert!(is_relaxed_path("legacy.getUsers"));
        assert!(!is_relaxed_path("Invalid..Path"));
    }

    #[test]
    fn test_suggestions_ranked_and_bounded() {
        let paths = ["users.get", "users.list", "posts.get", "health"];
        let suggestions = suggest_similar("users.gett", paths.iter().copied(), 3);

        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0], "users.get");
        assert!(suggestions.len() <= 3);
    }

    #[test]
    fn test_suggestions_respect_threshold() {
        let paths = ["completely.unrelated"];
        let suggestions = suggest_similar("zz", paths.iter().copied(), 3);
        assert!(suggestions.is_empty());
    }
}
