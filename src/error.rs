//! Engine error types with error codes
//!
//! Error code ranges:
//! - STEN-001-009: Cache errors
//! - STEN-010-019: Configuration errors
//! - STEN-020-029: Context/scope errors
//! - STEN-030-039: Registry errors
//! - STEN-090-099: Internal errors
//!
//! These are the *out-of-band* failures only. Everything a template author
//! can trigger at render time flows through the value model as errored
//! [`Data`](crate::data::Data) and never unwinds; see [`ErrorKind`] for that
//! taxonomy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Out-of-band engine errors (host-facing API surface)
#[derive(Error, Debug)]
pub enum EngineError {
    // ═══════════════════════════════════════════
    // CACHE ERRORS (001-009)
    // ═══════════════════════════════════════════
    #[error("[STEN-001] template '{name}' is already cached")]
    KeyExists { name: String },

    #[error("[STEN-002] background cache task failed: {reason}")]
    Background { reason: String },

    // ═══════════════════════════════════════════
    // CONFIGURATION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[STEN-010] runtime configuration is sealed; '{setting}' can no longer change")]
    Sealed { setting: &'static str },

    #[error("[STEN-011] '{got}' is not a usable tag sigil: {reason}")]
    InvalidSigil { got: char, reason: &'static str },

    // ═══════════════════════════════════════════
    // CONTEXT/SCOPE ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[STEN-020] scope '{scope}' is locked and rejects registration")]
    ScopeLocked { scope: String },

    #[error("[STEN-021] '{name}' in scope '{scope}' is a literal and cannot become a generator")]
    LiteralOverwrite { scope: String, name: String },

    // ═══════════════════════════════════════════
    // REGISTRY ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[STEN-030] entity '{name}' is already registered with an identical signature")]
    DuplicateEntity { name: String },

    // ═══════════════════════════════════════════
    // INTERNAL ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[STEN-090] internal invariant violated: {reason}")]
    Internal { reason: String },
}

impl EngineError {
    /// Get the error code (e.g., "STEN-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyExists { .. } => "STEN-001",
            Self::Background { .. } => "STEN-002",
            Self::Sealed { .. } => "STEN-010",
            Self::InvalidSigil { .. } => "STEN-011",
            Self::ScopeLocked { .. } => "STEN-020",
            Self::LiteralOverwrite { .. } => "STEN-021",
            Self::DuplicateEntity { .. } => "STEN-030",
            Self::Internal { .. } => "STEN-090",
        }
    }
}

impl FixSuggestion for EngineError {
    fn fix_suggestion(&self) -> Option<&str> {
        Some(match self {
            Self::KeyExists { .. } => "Pass replace = true to overwrite a cached template",
            Self::Background { .. } => "Check the tokio runtime is still alive",
            Self::Sealed { .. } => "Configure the sigil and registry before the first render",
            Self::InvalidSigil { .. } => "Use a printable ASCII symbol such as '#' or '$'",
            Self::ScopeLocked { .. } => "Register variables before locking the scope",
            Self::LiteralOverwrite { .. } => "Use a different name or drop the literal first",
            Self::DuplicateEntity { .. } => "Overloads must differ in arity or parameter types",
            Self::Internal { .. } => "This is a parser or host defect; please file a report",
        })
    }
}

/// Taxonomy of render-time faults embedded in errored `Data` values
///
/// These never unwind. Whether an errored value propagates or decays to nil
/// is decided by the stack's soft-error policy at each evaluation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Symbol stack miss; propagates under strict policy, decays otherwise
    MissingVariable,
    /// `Evaluate` lookup failed and the call carries no default
    UndefinedEvaluate,
    /// A non-optional argument evaluated to void
    VoidArgument,
    /// Dynamic overload resolution yielded more than one match
    OverloadAmbiguous,
    /// Dynamic overload resolution yielded no match
    OverloadNone,
    /// Signature type check failed
    TypeMismatch,
    /// An "impossible" branch was reached; indicates a parser defect
    Internal,
}

/// Source position of a call site, attached by the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Template name the position refers to
    pub name: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(name: impl AsRef<str>, line: u32, column: u32) -> Self {
        Self {
            name: crate::atom::atom(name.as_ref()),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.column)
    }
}
