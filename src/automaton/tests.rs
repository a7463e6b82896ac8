use super::alphabet::Alphabet;
use super::*;

fn diamond() -> (Automaton, [StateId; 4]) {
    let mut a = Automaton::new();
    let s0 = a.add_state("s0", Role::Start);
    let s1 = a.add_state("s1", Role::Ordinary);
    let s2 = a.add_state("s2", Role::Ordinary);
    let s3 = a.add_state("s3", Role::Finish);
    a.add_transition(s0, Transition::Epsilon { target: s1 });
    a.add_transition(s0, Transition::StartCapture { target: s2, group: 1 });
    a.add_transition(s1, Transition::Value { target: s3, value: 'x' as u32 });
    a.add_transition(s2, Transition::Epsilon { target: s0 });
    (a, [s0, s1, s2, s3])
}

#[test]
fn test_start_is_first_start_state() {
    let (a, [s0, ..]) = diamond();
    assert_eq!(a.start(), s0);
    assert_eq!(a.len(), 4);
}

#[test]
fn test_epsilon_closure_terminates_on_cycles() {
    let (a, [s0, s1, s2, _]) = diamond();
    assert_eq!(a.epsilon_closure(&[s0], false), vec![s0, s1]);
    assert_eq!(a.epsilon_closure(&[s0], true), vec![s0, s1, s2]);
    assert_eq!(a.epsilon_closure(&[s2], false), vec![s0, s1, s2]);
}

#[test]
fn test_reachable_in_discovery_order() {
    let (mut a, [s0, s1, s2, s3]) = diamond();
    let orphan = a.add_state("orphan", Role::Ordinary);
    let order = a.reachable();
    assert_eq!(order, vec![s0, s1, s2, s3]);
    assert!(!order.contains(&orphan));
}

#[test]
fn test_transition_alphabets() {
    let t = StateId::new(0);
    let inverted = Transition::Set {
        target: t,
        items: vec![(0x61, 0x63)],
        invert: true,
    };
    let alphabet = inverted.alphabet().expect("consuming");
    assert!(!alphabet.contains('b' as u32));
    assert!(alphabet.contains('d' as u32));

    let digits = Transition::Type {
        target: t,
        class: crate::unicode::CharType::Digit,
    };
    assert_eq!(digits.alphabet(), Some(Alphabet::Range(0x30, 0x39)));
    assert_eq!(Transition::BeginAnchor { target: t }.alphabet(), None);
}

#[test]
fn test_overlaps_is_decidable_across_kinds() {
    let t = StateId::new(0);
    let any = Transition::Any { target: t };
    let value = Transition::Value { target: t, value: '5' as u32 };
    let letters = Transition::Range {
        target: t,
        low: 'a' as u32,
        high: 'z' as u32,
        invert: false,
    };
    let digit = Transition::Type {
        target: t,
        class: crate::unicode::CharType::Digit,
    };
    assert!(any.overlaps(&value));
    assert!(value.overlaps(&digit));
    assert!(!letters.overlaps(&digit));
    assert!(!value.overlaps(&Transition::BeginAnchor { target: t }));
    assert!(Transition::EndAnchor { target: t }.overlaps(&Transition::EndAnchor {
        target: StateId::new(3)
    }));
}

#[test]
fn test_with_target() {
    let t = Transition::EndCapture {
        target: StateId::new(1),
        group: 2,
    };
    assert_eq!(
        t.with_target(StateId::new(7)),
        Transition::EndCapture {
            target: StateId::new(7),
            group: 2
        }
    );
}

#[test]
fn test_dump_lists_reachable_states() {
    let (a, _) = diamond();
    let dump = a.dump();
    assert!(dump.contains("s0 [s0] (start): eps -> s1, (1 -> s2"));
    assert!(dump.contains("s3 [s3] (finish):"));
}
