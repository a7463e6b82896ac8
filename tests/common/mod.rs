//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Once;

use rejit::automaton::nfa;
use rejit::backend::{backend_for, BackendKind, BytecodeInterpreter, Outcome};
use rejit::bytecode::{compile, Program};
use rejit::cfg::{Cfg, DiscoveryOrder, FallthroughOrder, Scheduler};
use rejit::syntax::parse;

static INIT: Once = Once::new();

/// Install a test subscriber once per binary. `RUST_LOG=rejit=debug` shows
/// the pipeline.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn cps(s: &str) -> Vec<u32> {
    s.chars().map(|c| c as u32).collect()
}

pub fn program(source: &str) -> Program {
    let ast = parse(source, None).expect("parse failed");
    compile(&nfa::build(&ast).expect("NFA construction failed")).expect("bytecode compilation failed")
}

/// Result of one executor on one subject: outcome plus capture slots.
pub type Run = (Outcome, Vec<Option<usize>>);

pub fn run_bytecode(program: &Program, subject: &str) -> Run {
    let mut captures = vec![None; 2 * program.group_count()];
    let outcome = BytecodeInterpreter::new(program)
        .expect("invalid program")
        .execute(&cps(subject), &mut captures);
    (outcome, captures)
}

/// Run `program` through `kind` with both schedulers; panics if the two
/// layouts disagree.
pub fn run_backend(program: &Program, kind: BackendKind, subject: &str) -> Run {
    let cfg = Cfg::build(program).expect("CFG construction failed");
    let mut runs = Vec::new();
    for schedule in [DiscoveryOrder.schedule(&cfg), FallthroughOrder.schedule(&cfg)] {
        let code = backend_for(kind)
            .compile(&cfg, &schedule)
            .unwrap_or_else(|e| panic!("{} failed: {}", kind, e));
        let mut captures = vec![None; 2 * program.group_count()];
        let outcome = code
            .execute(&cps(subject), &mut captures)
            .expect("execution failed");
        runs.push((outcome, captures));
    }
    assert_eq!(runs[0], runs[1], "{} layouts disagree", kind);
    runs.swap_remove(0)
}

/// Byte-offset capture slots reported by the `regex` crate, `(?s)` so that
/// `.` also matches newlines.
pub fn oracle(source: &str, subject: &str) -> Option<Vec<Option<usize>>> {
    let re = regex::Regex::new(&format!("(?s){}", source)).expect("oracle rejected pattern");
    re.captures(subject).map(|caps| {
        caps.iter()
            .flat_map(|m| match m {
                Some(m) => [Some(m.start()), Some(m.end())],
                None => [None, None],
            })
            .collect()
    })
}
