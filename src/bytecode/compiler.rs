//! Automaton → bytecode.
//!
//! States are visited in discovery order from the start state (worklist plus
//! visited set, see [`Automaton::reachable`]). Per state the compiler emits
//! the state label, `enter`, then `match` for finish states, or one
//! instruction per non-epsilon transition followed by the epsilon
//! alternatives: every epsilon but the last becomes `split`, the last becomes
//! `jump`, and a state without epsilons ends in `jump fail`. A shared `fail:`
//! block closes the program.
//!
//! Sets and inversion: the NFA builder splits non-inverted classes into
//! single values and ranges, so a non-inverted `Set` must hold exactly one
//! codepoint and anything larger is rejected. Inverted `Set`/`Range`
//! transitions lower to `exclude`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::automaton::{Automaton, Transition};
use crate::error::{InternalError, Result};

use super::{Instruction, Label, Program};

pub fn compile(automaton: &Automaton) -> Result<Program> {
    let mut instructions = Vec::new();
    let mut labels = BTreeMap::new();

    for id in automaton.reachable() {
        let state = &automaton[id];
        labels.insert(Label::state(id), instructions.len());
        instructions.push(Instruction::Enter {
            state: id.index() as u32,
        });

        if state.is_finish() {
            instructions.push(Instruction::Match);
            continue;
        }

        let mut epsilons = Vec::new();
        for transition in &state.transitions {
            match lower(transition)? {
                Some(instruction) => instructions.push(instruction),
                None => epsilons.push(Label::state(transition.target())),
            }
        }

        match epsilons.split_last() {
            Some((last, rest)) => {
                for target in rest {
                    instructions.push(Instruction::Split { target: *target });
                }
                instructions.push(Instruction::Jump { target: *last });
            }
            None => instructions.push(Instruction::Jump {
                target: Label::FAIL,
            }),
        }
    }

    labels.insert(Label::FAIL, instructions.len());
    instructions.push(Instruction::Fail);

    debug!(
        target: "rejit::bytecode",
        instructions = instructions.len(),
        labels = labels.len(),
        "Compiled bytecode"
    );

    let program = Program::new(
        instructions,
        labels,
        Label::state(automaton.start()),
        automaton.len(),
        automaton.groups().to_vec(),
    );
    program.validate()?;
    Ok(program)
}

/// Instruction for one transition; `None` for epsilon.
fn lower(transition: &Transition) -> Result<Option<Instruction>> {
    let target = Label::state(transition.target());
    let instruction = match transition {
        Transition::Epsilon { .. } => return Ok(None),
        Transition::Value { value, .. } => Instruction::Read {
            value: *value,
            target,
        },
        Transition::Set {
            items,
            invert: false,
            ..
        } => match items.as_slice() {
            [(lo, hi)] if lo == hi => Instruction::Read { value: *lo, target },
            _ => {
                return Err(InternalError::UnsupportedTransition(format!(
                    "multi-value set {}",
                    transition
                ))
                .into())
            }
        },
        Transition::Set {
            items,
            invert: true,
            ..
        } => Instruction::Exclude {
            items: items.clone().into_boxed_slice(),
            target,
        },
        Transition::Range {
            low,
            high,
            invert: false,
            ..
        } => Instruction::Range {
            low: *low,
            high: *high,
            target,
        },
        Transition::Range {
            low,
            high,
            invert: true,
            ..
        } => Instruction::Exclude {
            items: vec![(*low, *high)].into_boxed_slice(),
            target,
        },
        Transition::Any { .. } => Instruction::Any { target },
        Transition::Type { class, .. } => Instruction::Type {
            class: *class,
            target,
        },
        Transition::BeginAnchor { .. } => Instruction::Begin { target },
        Transition::EndAnchor { .. } => Instruction::End { target },
        Transition::StartCapture { group, .. } => Instruction::CaptureStart {
            group: *group,
            target,
        },
        Transition::EndCapture { group, .. } => Instruction::CaptureEnd {
            group: *group,
            target,
        },
        Transition::PositiveLookahead { literal, .. } => Instruction::Lookahead {
            literal: literal.clone().into_boxed_slice(),
            negated: false,
            target,
        },
        Transition::NegativeLookahead { literal, .. } => Instruction::Lookahead {
            literal: literal.clone().into_boxed_slice(),
            negated: true,
            target,
        },
    };
    Ok(Some(instruction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{nfa, Role, StateId};
    use crate::error::RegexError;
    use crate::syntax::parse;

    fn program(source: &str) -> Program {
        let ast = parse(source, None).expect("parse");
        compile(&nfa::build(&ast).expect("build")).expect("compile")
    }

    #[test]
    fn test_every_state_starts_with_enter() {
        let p = program("a(b|c)*d");
        for (label, &offset) in p.labels() {
            match label.state_index() {
                Some(state) => assert_eq!(p.instructions()[offset], Instruction::Enter { state }),
                None => assert_eq!(p.instructions()[offset], Instruction::Fail),
            }
        }
    }

    #[test]
    fn test_fail_block_is_last() {
        let p = program("abc");
        assert_eq!(p.offset(Label::FAIL), Some(p.len() - 1));
        assert_eq!(p.instructions().last(), Some(&Instruction::Fail));
    }

    #[test]
    fn test_state_layout() {
        let p = program("a");
        let entry = p.offset(p.entry()).expect("entry label");
        assert_eq!(entry, 0);
        assert!(matches!(p.instructions()[1], Instruction::Read { value: 0x61, .. }));
        assert_eq!(
            p.instructions()[2],
            Instruction::Jump {
                target: Label::FAIL
            }
        );
    }

    #[test]
    fn test_epsilons_become_split_then_jump() {
        let p = program("a|b|c");
        let entry = p.offset(p.entry()).expect("entry");
        let ops: Vec<&str> = p.instructions()[entry..entry + 4]
            .iter()
            .map(|i| i.mnemonic())
            .collect();
        assert_eq!(ops, vec!["enter", "split", "split", "jump"]);
    }

    #[test]
    fn test_inverted_transitions_lower_to_exclude() {
        let p = program("[^a-z0-9]");
        assert!(p.instructions().iter().any(|i| matches!(
            i,
            Instruction::Exclude { items, .. } if items.len() == 2
        )));
        let p = program("\\D");
        assert!(p.instructions().iter().any(|i| matches!(
            i,
            Instruction::Exclude { items, .. } if items.as_ref() == [(0x30, 0x39)]
        )));
    }

    fn single_set(items: Vec<(u32, u32)>) -> Automaton {
        let mut a = Automaton::new();
        let start = a.add_state("start", Role::Start);
        let finish = a.add_state("finish", Role::Finish);
        a.add_transition(
            start,
            Transition::Set {
                target: finish,
                items,
                invert: false,
            },
        );
        a
    }

    #[test]
    fn test_single_value_set_compiles_to_read() {
        let p = compile(&single_set(vec![(0x78, 0x78)])).expect("compile");
        assert!(matches!(p.instructions()[1], Instruction::Read { value: 0x78, .. }));
    }

    #[test]
    fn test_multi_value_set_is_rejected() {
        let err = compile(&single_set(vec![(0x61, 0x61), (0x63, 0x63)])).expect_err("reject");
        assert!(matches!(
            err,
            RegexError::Internal(InternalError::UnsupportedTransition(_))
        ));
        let err = compile(&single_set(vec![(0x61, 0x66)])).expect_err("reject");
        assert!(matches!(
            err,
            RegexError::Internal(InternalError::UnsupportedTransition(_))
        ));
    }

    #[test]
    fn test_unreachable_states_are_not_emitted() {
        let mut a = single_set(vec![(0x78, 0x78)]);
        let orphan = a.add_state("orphan", Role::Ordinary);
        let p = compile(&a).expect("compile");
        assert_eq!(p.offset(Label::state(orphan)), None);
        assert_eq!(p.state_count(), 3);
        assert_eq!(p.entry(), Label::state(StateId::new(0)));
    }

    #[test]
    fn test_dump_lists_labels_and_offsets() {
        let dump = program("ab").dump();
        assert!(dump.starts_with("s0:\n  0000  enter s0\n"));
        assert!(dump.contains("read 'a' -> "));
        assert!(dump.ends_with("fail:\n  0008  fail\n"), "{}", dump);
    }
}
