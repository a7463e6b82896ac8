//! Where multi-value sets are allowed: the builder never emits them, the
//! bytecode compiler rejects them, and inverted sets lower to `exclude`.

mod common;

use common::{cps, init_tracing, program, run_backend, run_bytecode};
use rejit::automaton::{nfa, Automaton, Role, Transition};
use rejit::backend::{BackendKind, Outcome};
use rejit::bytecode::{compile, Instruction};
use rejit::syntax::parse;
use rejit::{InternalError, RegexError, Span};

fn two_state(transition: impl FnOnce(rejit::automaton::StateId) -> Transition) -> Automaton {
    let mut automaton = Automaton::new();
    let start = automaton.add_state("start", Role::Start);
    let finish = automaton.add_state("finish", Role::Finish);
    automaton.add_transition(start, transition(finish));
    automaton
}

#[test]
fn test_builder_splits_non_inverted_classes() {
    init_tracing();
    let automaton = nfa::build(&parse("[aceg-k\\d]", None).expect("parse")).expect("build");
    for (_, state) in automaton.states() {
        for transition in &state.transitions {
            if let Transition::Set { items, invert, .. } = transition {
                assert!(*invert || items.len() == 1, "multi-value set: {}", transition);
            }
        }
    }
    let p = compile(&automaton).expect("compile");
    assert!(p
        .instructions()
        .iter()
        .all(|i| !matches!(i, Instruction::Exclude { .. })));
}

#[test]
fn test_multi_value_set_is_rejected_by_compiler() {
    init_tracing();
    let automaton = two_state(|target| Transition::Set {
        target,
        items: vec![(0x61, 0x61), (0x63, 0x63)],
        invert: false,
    });
    match compile(&automaton) {
        Err(RegexError::Internal(InternalError::UnsupportedTransition(_))) => {}
        other => panic!("expected UnsupportedTransition, got {:?}", other.map(|p| p.dump())),
    }
}

#[test]
fn test_single_value_set_is_accepted() {
    init_tracing();
    let automaton = two_state(|target| Transition::Set {
        target,
        items: vec![(0x62, 0x62)],
        invert: false,
    });
    let p = compile(&automaton).expect("compile");
    assert_eq!(
        run_bytecode(&p, "abc").0,
        Outcome::Match(Span { start: 1, end: 2 })
    );
}

#[test]
fn test_inverted_sets_lower_to_exclude() {
    init_tracing();
    let automaton = two_state(|target| Transition::Set {
        target,
        items: vec![(0x61, 0x61), (0x63, 0x65)],
        invert: true,
    });
    let p = compile(&automaton).expect("compile");
    assert!(p
        .instructions()
        .iter()
        .any(|i| matches!(i, Instruction::Exclude { .. })));

    let expected = Outcome::Match(Span { start: 1, end: 2 });
    assert_eq!(run_bytecode(&p, "abc").0, expected);
    for kind in BackendKind::ALL {
        assert_eq!(run_backend(&p, kind, "abc").0, expected, "{}", kind);
        assert_eq!(run_backend(&p, kind, "acde").0, Outcome::NoMatch, "{}", kind);
    }
}

#[test]
fn test_negated_class_syntax_uses_exclude() {
    init_tracing();
    let p = program("[^aeiou]+");
    assert!(p
        .instructions()
        .iter()
        .any(|i| matches!(i, Instruction::Exclude { .. })));
    let mut captures = vec![None; 2];
    let outcome = rejit::backend::BytecodeInterpreter::new(&p)
        .expect("valid")
        .execute(&cps("aexyz"), &mut captures);
    assert_eq!(outcome, Outcome::Match(Span { start: 2, end: 5 }));
}
