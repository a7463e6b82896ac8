//! rejit - Regular Expression Engine with Tiered Compilation
//!
//! This library compiles regular expressions through a series of
//! intermediate representations and runs them on one of several backends.
//!
//! # Architecture
//!
//! The compilation pipeline consists of these stages:
//!
//! 1. **Parsing** (`syntax` module)
//!    - Pattern source and flags into an `Ast`
//!
//! 2. **Automaton Construction** (`automaton` module)
//!    - Worklist NFA builder with tagged transitions
//!    - Optional subset construction into a DFA
//!    - Alphabet algebra (`combine`, `overlay`) over codepoint sets
//!
//! 3. **Bytecode** (`bytecode` module)
//!    - Labelled, linear instruction stream; every state starts with `enter`
//!
//! 4. **Control-Flow Graph** (`cfg` module)
//!    - Extended basic blocks, dead-block elimination, speculative
//!      uncommon-branch elimination, block scheduling
//!
//! 5. **Backends** (`backend` module)
//!    - Graph interpreter, Cranelift native code, closure-threaded code
//!
//! 6. **Adaptive Execution** (`adaptive` module)
//!    - Profiles the bytecode interpreter, promotes hot patterns to compiled
//!      code and deoptimizes when a speculation fails
//!
//! # Example
//!
//! ```rust
//! use rejit::{BackendKind, EngineConfig, Pattern};
//!
//! let config = EngineConfig::default()
//!     .with_threshold(2)
//!     .with_backend(BackendKind::Closure);
//! let pattern = Pattern::with_config(r"(\d+)-(\d+)", None, config)?;
//!
//! for _ in 0..3 {
//!     let caps = pattern.captures("call 555-1234")?.expect("match");
//!     assert_eq!(caps.get(2).map(|m| m.as_str()), Some("1234"));
//! }
//! assert!(pattern.state().is_compiled());
//! # Ok::<(), rejit::RegexError>(())
//! ```

pub mod adaptive;
pub mod automaton;
pub mod backend;
pub mod bytecode;
pub mod cfg;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod pattern;
pub mod profile;
pub mod syntax;
pub mod unicode;

pub use adaptive::{ControllerState, EntryPoint, Hooks};
pub use automaton::Automaton;
pub use backend::{Backend, BackendKind, Compiled, Outcome, Span};
pub use bytecode::{Instruction, Label, Program};
pub use cfg::Cfg;
pub use config::{ConfigError, EngineConfig};
pub use error::{CompileError, InternalError, ParseError, RegexError, Result};
pub use pattern::{Captures, Match, Pattern};
pub use profile::Profile;
pub use unicode::{BlockTable, CharType, PropertyLookup};
