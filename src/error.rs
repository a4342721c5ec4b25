//! Error types for RPC dispatch and router construction
//!
//! This module provides the wire-stable error taxonomy used by the dispatch
//! pipeline, plus the build-time error type reported when a router or a
//! procedure registry fails validation.
//!
//! # Error Codes
//!
//! Dispatch errors carry an [`ErrorCode`]. The core codes serialize as
//! SCREAMING_SNAKE_CASE strings; any other code returned by a handler passes
//! through verbatim via [`ErrorCode::Custom`].
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{RpcError, ErrorCode};
//!
//! let error = RpcError::new(ErrorCode::NotFound, "Procedure not found: users.gett");
//! let error = RpcError::custom("QUOTA_EXCEEDED", "Monthly quota exhausted");
//! ```

use crate::procedure::SourceLocation;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Wire-stable error codes for RPC dispatch.
///
/// The built-in variants serialize as SCREAMING_SNAKE_CASE strings
/// (e.g. `NotFound` becomes `"NOT_FOUND"`). Domain codes produced by
/// handlers are preserved verbatim as [`ErrorCode::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unknown path and no matching alias
    NotFound,
    /// The path violates both the strict and the relaxed grammar
    InvalidPath,
    /// Input schema rejection; details carry errors grouped by field path
    ValidationError,
    /// A batched call exceeded its per-call deadline
    Timeout,
    /// The batch held more calls than `max_batch_size`
    BatchTooLarge,
    /// Caught panic, response-validation failure, or broken middleware chain
    InternalError,
    /// Any other domain code returned by a handler, passed through verbatim
    Custom(String),
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidPath => "INVALID_PATH",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::BatchTooLarge => "BATCH_TOO_LARGE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        match s {
            "NOT_FOUND" => Self::NotFound,
            "INVALID_PATH" => Self::InvalidPath,
            "VALIDATION_ERROR" => Self::ValidationError,
            "TIMEOUT" => Self::Timeout,
            "BATCH_TOO_LARGE" => Self::BatchTooLarge,
            "INTERNAL_ERROR" => Self::InternalError,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ErrorCode::from(s.as_str()))
    }
}

/// RPC error with a wire-stable code and a human-oriented message.
///
/// The serialized shape is `{code, message, ...}`: `code` is always present,
/// the remaining fields are code-specific and omitted when absent.
///
/// # Example
/// ```rust,ignore
/// use nexus_rpc::RpcError;
///
/// let error = RpcError::not_found("users.gett")
///     .with_suggestions(vec!["users.get".to_string()]);
/// ```
#[derive(Debug, Clone, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Wire-stable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional code-specific details (JSON value)
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    /// The procedure path the error relates to, when known
    #[serde(default)]
    pub path: Option<String>,
    /// Similar known paths, attached to `NOT_FOUND` errors
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
}

impl RpcError {
    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            path: None,
            suggestions: None,
        }
    }

    /// Attach details to the error.
    #[must_use = "This method returns a new RpcError and does not modify self"]
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Attach the procedure path the error relates to.
    #[must_use = "This method returns a new RpcError and does not modify self"]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach similar-path suggestions.
    #[must_use = "This method returns a new RpcError and does not modify self"]
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    // Convenience constructors

    /// Create a NOT_FOUND error for an unknown procedure path.
    pub fn not_found(path: &str) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("Procedure not found: {}", path),
        )
        .with_path(path)
    }

    /// Create an INVALID_PATH error.
    pub fn invalid_path(path: &str) -> Self {
        Self::new(
            ErrorCode::InvalidPath,
            format!("Invalid procedure path: '{}'", path),
        )
        .with_path(path)
    }

    /// Create a VALIDATION_ERROR error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a TIMEOUT error for a batched call that missed its deadline.
    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "Procedure timed out")
    }

    /// Create a BATCH_TOO_LARGE error.
    pub fn batch_too_large(size: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::BatchTooLarge,
            format!("Batch size {} exceeds maximum allowed size {}", size, max),
        )
    }

    /// Create an INTERNAL_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create an error with a domain-specific code, passed through verbatim.
    pub fn custom(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Custom(code.into()), message)
    }
}

impl Serialize for RpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("RpcError", 5)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;

        if let Some(ref details) = self.details {
            state.serialize_field("details", details)?;
        }

        if let Some(ref path) = self.path {
            state.serialize_field("path", path)?;
        }

        if let Some(ref suggestions) = self.suggestions {
            state.serialize_field("suggestions", suggestions)?;
        }

        state.end()
    }
}

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

// =============================================================================
// Build Errors
// =============================================================================

/// Error raised while finalising a procedure registry or building a router.
///
/// Build errors are programming errors in the declaration tree; where the
/// offending declaration is known, the error carries its source location.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum BuildError {
    /// Two registrations produced the same canonical path
    DuplicatePath {
        /// The conflicting path
        path: String,
        /// Declaration sites of every conflicting procedure
        locations: Vec<SourceLocation>,
    },
    /// A procedure name violates the strict identifier grammar
    InvalidProcedureName {
        /// The offending name
        name: String,
        /// Where the procedure was declared
        location: SourceLocation,
    },
    /// Two procedures in one declaring unit share a name
    DuplicateProcedureName {
        /// The duplicated name
        name: String,
        /// Where the second declaration appeared
        location: SourceLocation,
    },
    /// A procedure has neither an inline handler nor a named binding
    MissingHandler {
        /// The procedure name
        name: String,
        /// The declaring unit
        unit: String,
        /// Where the procedure was declared
        location: SourceLocation,
    },
    /// A REST route was declared with an empty path template
    EmptyRoutePath {
        /// The procedure name
        name: String,
        /// Where the procedure was declared
        location: SourceLocation,
    },
    /// A scope prefix or mount segment violates the strict grammar
    InvalidSegment {
        /// The offending segment
        segment: String,
    },
    /// An alias name violates the relaxed identifier grammar
    InvalidAliasName {
        /// The offending alias
        from: String,
    },
    /// An alias points at a path that does not exist
    AliasTargetMissing {
        /// The alias
        from: String,
        /// Its missing target
        to: String,
    },
    /// An alias shadows an existing canonical path
    AliasShadowsPath {
        /// The offending alias
        from: String,
    },
    /// An alias points at another alias instead of a canonical path
    AliasTargetIsAlias {
        /// The alias
        from: String,
        /// The alias it points at
        to: String,
    },
    /// Following aliases revisited a name
    AliasCycle {
        /// The names visited, in order
        chain: Vec<String>,
    },
    /// The same alias name was declared twice
    DuplicateAlias {
        /// The duplicated alias
        from: String,
    },
    /// A middleware's `init` rejected its declared options
    MiddlewareInit {
        /// The middleware name
        middleware: String,
        /// The error `init` returned
        error: RpcError,
    },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatePath { path, locations } => {
                write!(f, "duplicate procedure path '{}' declared at ", path)?;
                for (i, loc) in locations.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", loc)?;
                }
                Ok(())
            }
            Self::InvalidProcedureName { name, location } => {
                write!(
                    f,
                    "invalid procedure name '{}' at {} (expected [a-z][a-z0-9_]*)",
                    name, location
                )
            }
            Self::DuplicateProcedureName { name, location } => {
                write!(f, "duplicate procedure name '{}' at {}", name, location)
            }
            Self::MissingHandler {
                name,
                unit,
                location,
            } => {
                write!(
                    f,
                    "procedure '{}' in unit '{}' (declared at {}) has no handler and no binding",
                    name, unit, location
                )
            }
            Self::EmptyRoutePath { name, location } => {
                write!(
                    f,
                    "procedure '{}' at {} declares a route with an empty path template",
                    name, location
                )
            }
            Self::InvalidSegment { segment } => {
                write!(
                    f,
                    "invalid path segment '{}' (expected [a-z][a-z0-9_]*)",
                    segment
                )
            }
            Self::InvalidAliasName { from } => {
                write!(
                    f,
                    "invalid alias '{}' (expected dotted [A-Za-z][A-Za-z0-9_]* segments)",
                    from
                )
            }
            Self::AliasTargetMissing { from, to } => {
                write!(f, "alias '{}' points at unknown path '{}'", from, to)
            }
            Self::AliasShadowsPath { from } => {
                write!(f, "alias '{}' shadows an existing procedure path", from)
            }
            Self::AliasTargetIsAlias { from, to } => {
                write!(
                    f,
                    "alias '{}' points at '{}', which is itself an alias",
                    from, to
                )
            }
            Self::AliasCycle { chain } => {
                write!(f, "alias cycle: {}", chain.join(" -> "))
            }
            Self::DuplicateAlias { from } => {
                write!(f, "alias '{}' declared more than once", from)
            }
            Self::MiddlewareInit { middleware, error } => {
                write!(
                    f,
                    "middleware '{}' rejected its options: {}",
                    middleware, error
                )
            }
        }
    }
}

impl std::error::Error for BuildError {}

// =============================================================================
// Tests
// =============================================================================
