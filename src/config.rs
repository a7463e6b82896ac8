//! Engine configuration.
//!
//! An [`EngineConfig`] is either built in code:
//!
//! ```rust
//! use rejit::{BackendKind, EngineConfig};
//!
//! let config = EngineConfig::default()
//!     .with_threshold(10)
//!     .with_speculative(true)
//!     .with_backend(BackendKind::Closure);
//! assert_eq!(config.threshold, 10);
//! ```
//!
//! or loaded from the `[engine]` table of a TOML file (`rejit.toml`):
//!
//! ```toml
//! [engine]
//! threshold = 50
//! speculative = true
//! backend = "native"
//! determinize = false
//! max_dfa_states = 10000
//! optimize_layout = true
//! trace = false
//! ```
//!
//! Every key is optional; missing keys keep their default.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::automaton::dfa::DEFAULT_MAX_STATES;
use crate::backend::BackendKind;

/// Interpreted calls before a pattern is compiled
pub const DEFAULT_THRESHOLD: u32 = 100;

/// Settings for one [`Pattern`](crate::Pattern).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Profiled interpreter calls before compilation. Zero compiles on the
    /// first call.
    pub threshold: u32,

    /// Redirect never-taken exits to deoptimization points when compiling.
    pub speculative: bool,

    /// Backend used once the threshold is reached.
    pub backend: BackendKind,

    /// Determinize the automaton before compiling to bytecode. The DFA
    /// program decides whether a subject matches; spans and groups of a
    /// match still come from the NFA program.
    pub determinize: bool,

    /// State limit for determinization.
    pub max_dfa_states: usize,

    /// Schedule blocks so jump targets follow their source block.
    pub optimize_layout: bool,

    /// Log every controller decision at `trace` level.
    pub trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            threshold: DEFAULT_THRESHOLD,
            speculative: false,
            backend: BackendKind::Native,
            determinize: false,
            max_dfa_states: DEFAULT_MAX_STATES,
            optimize_layout: false,
            trace: false,
        }
    }
}

impl EngineConfig {
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_speculative(mut self, speculative: bool) -> Self {
        self.speculative = speculative;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_determinize(mut self, determinize: bool) -> Self {
        self.determinize = determinize;
        self
    }

    pub fn with_max_dfa_states(mut self, max_dfa_states: usize) -> Self {
        self.max_dfa_states = max_dfa_states;
        self
    }

    pub fn with_optimize_layout(mut self, optimize_layout: bool) -> Self {
        self.optimize_layout = optimize_layout;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Parse the `[engine]` table of a TOML document. A document without
    /// the table yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: None,
            message: e.message().to_string(),
        })?;
        file.engine.validate()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|e| e.with_path(path))
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_dfa_states == 0 {
            return Err(ConfigError::Invalid {
                key: "max_dfa_states",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

// =============================================================================
// ConfigError
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// File could not be read
    Io { path: PathBuf, message: String },

    /// Malformed TOML or an unknown key
    Parse { path: Option<PathBuf>, message: String },

    /// Well-formed value outside its domain
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        match self {
            ConfigError::Parse { path: None, message } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, message } => {
                write!(f, "Failed to read {}: {}", path.display(), message)
            }
            ConfigError::Parse {
                path: Some(path),
                message,
            } => write!(f, "Invalid configuration in {}: {}", path.display(), message),
            ConfigError::Parse {
                path: None,
                message,
            } => write!(f, "Invalid configuration: {}", message),
            ConfigError::Invalid { key, message } => {
                write!(f, "Invalid value for {}: {}", key, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.threshold, 100);
        assert!(!config.speculative);
        assert_eq!(config.backend, BackendKind::Native);
        assert!(!config.determinize);
        assert_eq!(config.max_dfa_states, 10_000);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_threshold(3)
            .with_speculative(true)
            .with_backend(BackendKind::Interpreter)
            .with_determinize(true)
            .with_max_dfa_states(50)
            .with_optimize_layout(true)
            .with_trace(true);
        assert_eq!(config.threshold, 3);
        assert!(config.speculative);
        assert_eq!(config.backend, BackendKind::Interpreter);
        assert!(config.determinize);
        assert_eq!(config.max_dfa_states, 50);
        assert!(config.optimize_layout);
        assert!(config.trace);
    }

    #[test]
    fn test_parse_engine_table() {
        let config = EngineConfig::from_toml_str(
            r#"
            [engine]
            threshold = 7
            speculative = true
            backend = "closure"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.threshold, 7);
        assert!(config.speculative);
        assert_eq!(config.backend, BackendKind::Closure);
        assert_eq!(config.max_dfa_states, DEFAULT_MAX_STATES);
    }

    #[test]
    fn test_missing_table_is_default() {
        assert_eq!(
            EngineConfig::from_toml_str("").expect("empty config"),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = EngineConfig::from_toml_str("[engine]\nbackend = \"gpu\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: None, .. }));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(EngineConfig::from_toml_str("[engine]\nthreshhold = 1\n").is_err());
    }

    #[test]
    fn test_zero_dfa_states_is_invalid() {
        let err = EngineConfig::from_toml_str("[engine]\nmax_dfa_states = 0\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "max_dfa_states",
                message: "must be at least 1".to_string()
            }
        );
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::from_file("/nonexistent/rejit.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/rejit.toml"));
    }
}
