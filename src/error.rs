//! Error types.
//!
//! This module defines [`RegexError`] and the per-layer error types it wraps:
//!
//! - [`ParseError`]: malformed pattern source or flags, raised at construction
//! - [`InternalError`]: a construct reached a pipeline stage that cannot
//!   lower it (a gap in the pipeline, never a matching failure)
//! - [`CompileError`]: a backend failed to lower a CFG
//!
//! "No match" is not an error, and deoptimization is a returned
//! [`Outcome`](crate::backend::Outcome), so neither appears here.

use std::fmt;

use crate::automaton::alphabet::AlphabetError;
use crate::backend::BackendKind;
use crate::config::ConfigError;

// =============================================================================
// ParseError
// =============================================================================

/// Malformed pattern source, with the character offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        ParseError {
            message: message.into(),
            offset,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse error at offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

// =============================================================================
// InternalError
// =============================================================================

/// Construction-time defects. Each aborts the compile operation that hit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    /// AST node the NFA builder has no lowering for
    UnsupportedNode(String),

    /// Transition kind the bytecode compiler has no instruction for
    UnsupportedTransition(String),

    /// Alphabet pair the algebra does not implement
    Alphabet(AlphabetError),

    /// Subset construction exceeded the configured state limit
    DfaTooLarge { limit: usize },

    /// Instruction names a label with no definition
    UndefinedLabel(String),
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalError::UnsupportedNode(node) => {
                write!(f, "Internal error: unsupported AST node: {}", node)
            }
            InternalError::UnsupportedTransition(t) => {
                write!(f, "Internal error: unsupported transition: {}", t)
            }
            InternalError::Alphabet(e) => write!(f, "Internal error: {}", e),
            InternalError::DfaTooLarge { limit } => {
                write!(f, "Internal error: DFA exceeds {} states", limit)
            }
            InternalError::UndefinedLabel(label) => {
                write!(f, "Internal error: undefined label: {}", label)
            }
        }
    }
}

impl std::error::Error for InternalError {}

impl From<AlphabetError> for InternalError {
    fn from(e: AlphabetError) -> Self {
        InternalError::Alphabet(e)
    }
}

// =============================================================================
// CompileError
// =============================================================================

/// Backend failure while lowering a CFG. Always fatal: never downgraded to
/// another backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub backend: BackendKind,
    pub message: String,
}

impl CompileError {
    pub fn new(backend: BackendKind, message: impl Into<String>) -> Self {
        CompileError {
            backend,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} backend compilation error: {}", self.backend, self.message)
    }
}

impl std::error::Error for CompileError {}

// =============================================================================
// RegexError and Result
// =============================================================================

/// Any error surfaced to callers of [`Pattern`](crate::Pattern).
#[derive(Debug, Clone, PartialEq)]
pub enum RegexError {
    Parse(ParseError),
    Internal(InternalError),
    Compile(CompileError),
    Config(ConfigError),
}

impl fmt::Display for RegexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegexError::Parse(e) => write!(f, "{}", e),
            RegexError::Internal(e) => write!(f, "{}", e),
            RegexError::Compile(e) => write!(f, "{}", e),
            RegexError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RegexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegexError::Parse(e) => Some(e),
            RegexError::Internal(e) => Some(e),
            RegexError::Compile(e) => Some(e),
            RegexError::Config(e) => Some(e),
        }
    }
}

impl From<ParseError> for RegexError {
    fn from(e: ParseError) -> Self {
        RegexError::Parse(e)
    }
}

impl From<InternalError> for RegexError {
    fn from(e: InternalError) -> Self {
        RegexError::Internal(e)
    }
}

impl From<AlphabetError> for RegexError {
    fn from(e: AlphabetError) -> Self {
        RegexError::Internal(InternalError::Alphabet(e))
    }
}

impl From<CompileError> for RegexError {
    fn from(e: CompileError) -> Self {
        RegexError::Compile(e)
    }
}

impl From<ConfigError> for RegexError {
    fn from(e: ConfigError) -> Self {
        RegexError::Config(e)
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, RegexError>;
