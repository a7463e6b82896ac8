//! Backends turn an optimized [`Cfg`] plus a block schedule into an
//! executable [`Compiled`] unit.
//!
//! All backends implement the same matching semantics (see
//! [`exec`]): leftmost-first backtracking over the bytecode's alternatives,
//! an explored set of `(state, position)` pairs shared across start
//! positions, and `deoptimize` surfacing as [`Outcome::Deoptimize`].
//!
//! - [`InterpreterBackend`]: per-block dispatch over the graph
//! - [`NativeBackend`]: Cranelift JIT
//! - [`ClosureBackend`]: code generated from per-instruction source
//!   templates into threaded closures

pub mod closure;
pub mod exec;
pub mod interpreter;
pub mod native;

pub use closure::{ClosureBackend, ClosureCode};
pub use interpreter::{BytecodeInterpreter, InterpretedCode, InterpreterBackend};
pub use native::{NativeBackend, NativeCode};

use std::fmt;

use serde::Deserialize;

use crate::cfg::{BlockId, Cfg};
use crate::error::{CompileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Interpreter,
    Native,
    Closure,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Interpreter,
        BackendKind::Native,
        BackendKind::Closure,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Interpreter => "interpreter",
            BackendKind::Native => "native",
            BackendKind::Closure => "closure",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Codepoint offsets of a match, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoMatch,
    Match(Span),
    /// A speculative exit was reached; the caller must re-run the subject on
    /// a non-speculative tier.
    Deoptimize,
}

/// Executable form of one graph.
pub trait Compiled: Send {
    fn backend(&self) -> BackendKind;

    /// Search `subject` for the leftmost match. `captures` holds two slots
    /// per group and is overwritten; slots of groups that did not
    /// participate are `None`.
    fn execute(&self, subject: &[u32], captures: &mut [Option<usize>]) -> Result<Outcome>;
}

pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Lower `cfg`, laying blocks out in `schedule` order.
    fn compile(&mut self, cfg: &Cfg, schedule: &[BlockId]) -> Result<Box<dyn Compiled>>;
}

/// Fresh backend of the requested kind.
pub fn backend_for(kind: BackendKind) -> Box<dyn Backend> {
    match kind {
        BackendKind::Interpreter => Box::new(InterpreterBackend::new()),
        BackendKind::Native => Box::new(NativeBackend::new()),
        BackendKind::Closure => Box::new(ClosureBackend::new()),
    }
}

/// A schedule must list every block exactly once, entry first.
pub(crate) fn check_schedule(kind: BackendKind, cfg: &Cfg, schedule: &[BlockId]) -> Result<()> {
    if schedule.first() != Some(&cfg.entry()) {
        return Err(CompileError::new(kind, "schedule does not start at the entry block").into());
    }
    let mut sorted = schedule.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != schedule.len() || sorted != cfg.block_ids() {
        return Err(CompileError::new(kind, "schedule is not a permutation of the blocks").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{DiscoveryOrder, Scheduler};

    fn cfg() -> Cfg {
        let ast = crate::syntax::parse("ab|c", None).expect("parse");
        let program = crate::bytecode::compile(&crate::automaton::nfa::build(&ast).expect("build"))
            .expect("compile");
        Cfg::build(&program).expect("cfg")
    }

    #[test]
    fn test_backend_for_matches_kind() {
        for kind in BackendKind::ALL {
            assert_eq!(backend_for(kind).kind(), kind);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(BackendKind::Native.to_string(), "native");
        assert_eq!(BackendKind::Closure.to_string(), "closure");
    }

    #[test]
    fn test_check_schedule() {
        let cfg = cfg();
        let order = DiscoveryOrder.schedule(&cfg);
        assert!(check_schedule(BackendKind::Interpreter, &cfg, &order).is_ok());

        let mut reversed = order.clone();
        reversed.reverse();
        assert!(check_schedule(BackendKind::Interpreter, &cfg, &reversed).is_err());

        let truncated = &order[..order.len() - 1];
        assert!(check_schedule(BackendKind::Interpreter, &cfg, truncated).is_err());
    }
}
