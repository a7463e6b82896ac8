//! Subset construction.
//!
//! Each DFA state stands for the closure of a set of NFA states, where the
//! closure follows epsilon transitions and capture markers (a DFA does not
//! track captures). Outgoing consuming transitions of the members are refined
//! with [`overlay_all`] so that the atoms leaving one DFA state never overlap;
//! atoms that lead to the same state set are merged back with
//! [`combine_all`].
//!
//! Zero-width assertions cannot be decided at construction time. They stay as
//! guarded transitions to the closure of the state set *plus* the assertion's
//! targets, emitted before the consuming transitions. The target is a superset
//! of the source, so taking the assertion never loses a match.
//!
//! Construction is worst-case exponential, so it is opt-in and bounded by a
//! state limit.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{InternalError, Result};

use super::alphabet::{combine_all, overlay_all, Alphabet};
use super::{Automaton, Role, StateId, Transition};

/// Default upper bound on DFA states.
pub const DEFAULT_MAX_STATES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Assertion {
    Begin,
    End,
    Lookahead { literal: Vec<u32>, negated: bool },
}

impl Assertion {
    fn transition(&self, target: StateId) -> Transition {
        match self {
            Assertion::Begin => Transition::BeginAnchor { target },
            Assertion::End => Transition::EndAnchor { target },
            Assertion::Lookahead {
                literal,
                negated: false,
            } => Transition::PositiveLookahead {
                target,
                literal: literal.clone(),
            },
            Assertion::Lookahead {
                literal,
                negated: true,
            } => Transition::NegativeLookahead {
                target,
                literal: literal.clone(),
            },
        }
    }
}

struct Determinizer<'a> {
    nfa: &'a Automaton,
    dfa: Automaton,
    memo: FxHashMap<Vec<StateId>, StateId>,
    work: Vec<(Vec<StateId>, StateId)>,
    max_states: usize,
}

/// Build a DFA equivalent to `nfa` for match/no-match and match start.
pub fn determinize(nfa: &Automaton, max_states: usize) -> Result<Automaton> {
    let mut d = Determinizer {
        nfa,
        dfa: Automaton::new(),
        memo: FxHashMap::default(),
        work: Vec::new(),
        max_states,
    };

    let initial = nfa.epsilon_closure(&[nfa.start()], true);
    let start = d.intern(initial, true)?;
    d.dfa.set_start(start);

    while let Some((set, id)) = d.work.pop() {
        d.expand(&set, id)?;
    }

    d.dfa.mark_deterministic();
    debug!(
        target: "rejit::dfa",
        nfa_states = nfa.len(),
        dfa_states = d.dfa.len(),
        "Determinized automaton"
    );
    Ok(d.dfa)
}

impl Determinizer<'_> {
    fn is_finish(&self, set: &[StateId]) -> bool {
        set.iter().any(|&s| self.nfa[s].is_finish())
    }

    fn intern(&mut self, set: Vec<StateId>, initial: bool) -> Result<StateId> {
        if let Some(&id) = self.memo.get(&set) {
            return Ok(id);
        }
        if self.dfa.len() >= self.max_states {
            return Err(InternalError::DfaTooLarge {
                limit: self.max_states,
            }
            .into());
        }

        let role = if self.is_finish(&set) {
            Role::Finish
        } else if initial {
            Role::Start
        } else {
            Role::Ordinary
        };
        let label = format!(
            "{{{}}}",
            set.iter()
                .map(|s| s.index().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        let id = self.dfa.add_state(label, role);
        self.memo.insert(set.clone(), id);
        self.work.push((set, id));
        Ok(id)
    }

    fn closure_with(&self, set: &[StateId], extra: &[StateId]) -> Vec<StateId> {
        let seeds: Vec<StateId> = set.iter().chain(extra).copied().collect();
        self.nfa.epsilon_closure(&seeds, true)
    }

    fn expand(&mut self, set: &[StateId], id: StateId) -> Result<()> {
        // Finish states end the match; anything after them is unreachable
        if self.is_finish(set) {
            return Ok(());
        }

        let mut assertions: Vec<(Assertion, Vec<StateId>)> = Vec::new();
        let mut consuming: Vec<(Alphabet, StateId)> = Vec::new();

        for &member in set {
            for t in &self.nfa[member].transitions {
                let assertion = match t {
                    Transition::BeginAnchor { .. } => Assertion::Begin,
                    Transition::EndAnchor { .. } => Assertion::End,
                    Transition::PositiveLookahead { literal, .. } => Assertion::Lookahead {
                        literal: literal.clone(),
                        negated: false,
                    },
                    Transition::NegativeLookahead { literal, .. } => Assertion::Lookahead {
                        literal: literal.clone(),
                        negated: true,
                    },
                    Transition::Epsilon { .. }
                    | Transition::StartCapture { .. }
                    | Transition::EndCapture { .. } => continue,
                    Transition::Value { .. }
                    | Transition::Set { .. }
                    | Transition::Range { .. }
                    | Transition::Any { .. }
                    | Transition::Type { .. } => {
                        if let Some(alphabet) = t.alphabet() {
                            if !alphabet.is_empty() {
                                consuming.push((alphabet, t.target()));
                            }
                        }
                        continue;
                    }
                };
                match assertions.iter_mut().find(|(a, _)| *a == assertion) {
                    Some((_, targets)) => targets.push(t.target()),
                    None => assertions.push((assertion, vec![t.target()])),
                }
            }
        }

        for (assertion, targets) in assertions {
            let guarded = self.closure_with(set, &targets);
            if guarded.as_slice() != set {
                let target = self.intern(guarded, false)?;
                self.dfa.add_transition(id, assertion.transition(target));
            }
        }

        let atoms = overlay_all(consuming.iter().map(|(a, _)| a))?;
        let mut by_target: Vec<(Vec<StateId>, Vec<Alphabet>)> = Vec::new();
        for atom in atoms {
            let targets: Vec<StateId> = consuming
                .iter()
                .filter(|(alphabet, _)| atom.is_subset_of(alphabet))
                .map(|(_, target)| *target)
                .collect();
            if targets.is_empty() {
                continue;
            }
            let next = self.nfa.epsilon_closure(&targets, true);
            match by_target.iter_mut().find(|(s, _)| *s == next) {
                Some((_, group)) => group.push(atom),
                None => by_target.push((next, vec![atom])),
            }
        }

        for (next, group) in by_target {
            let target = self.intern(next, false)?;
            let alphabet = combine_all(group.iter())?;
            for transition in alphabet_transitions(&alphabet, target) {
                self.dfa.add_transition(id, transition);
            }
        }
        Ok(())
    }
}

/// Canonical transitions accepting exactly `alphabet`.
fn alphabet_transitions(alphabet: &Alphabet, target: StateId) -> Vec<Transition> {
    if *alphabet == Alphabet::Any {
        return vec![Transition::Any { target }];
    }
    alphabet
        .intervals()
        .into_iter()
        .map(|(lo, hi)| {
            if lo == hi {
                Transition::Value { target, value: lo }
            } else {
                Transition::Range {
                    target,
                    low: lo,
                    high: hi,
                    invert: false,
                }
            }
        })
        .collect()
}
