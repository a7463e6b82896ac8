//! Automaton model shared by the NFA builder, the determinizer and the
//! bytecode compiler.
//!
//! States live in an arena and refer to each other through [`StateId`]
//! handles, so the cycles created by quantifier loops need no shared
//! ownership. Every traversal over an [`Automaton`] uses an explicit worklist
//! and a visited set keyed by handle.
//!
//! ```text
//!   a*b:    s0 --eps--> s2 --'a'--> s3 --eps--> s2
//!                        |
//!                        +--eps--> s1 --'b'--> s4 (finish)
//! ```

pub mod alphabet;
pub mod dfa;
pub mod nfa;

#[cfg(test)]
mod tests;

use std::fmt;
use std::ops::{Index, IndexMut};

use itertools::Itertools;
use smallvec::SmallVec;

use crate::unicode::CharType;
use alphabet::{Alphabet, DisplayCodepoint};

// =============================================================================
// StateId
// =============================================================================

/// A state identifier: an index into the automaton's arena.
///
/// Handles are identity only; their numeric order carries no matching
/// semantics.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StateId(u32);

impl StateId {
    /// Sentinel for "no state".
    pub const NONE: StateId = StateId(u32::MAX);

    #[inline]
    pub fn new(index: usize) -> StateId {
        StateId(index as u32)
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

// =============================================================================
// State and Transition
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Start,
    Finish,
    Ordinary,
}

#[derive(Debug, Clone)]
pub struct State {
    /// Diagnostic name; never consulted by matching.
    pub label: String,
    pub transitions: SmallVec<[Transition; 2]>,
    pub role: Role,
}

impl State {
    pub fn is_finish(&self) -> bool {
        self.role == Role::Finish
    }
}

/// Outgoing edge of a state. Each variant owns the handle of its target.
///
/// `Set` items are sorted, disjoint, non-adjacent inclusive intervals; a
/// single codepoint `c` is stored as `(c, c)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Transition {
    Epsilon { target: StateId },
    Value { target: StateId, value: u32 },
    Set { target: StateId, items: Vec<(u32, u32)>, invert: bool },
    Range { target: StateId, low: u32, high: u32, invert: bool },
    Any { target: StateId },
    Type { target: StateId, class: CharType },
    BeginAnchor { target: StateId },
    EndAnchor { target: StateId },
    StartCapture { target: StateId, group: u32 },
    EndCapture { target: StateId, group: u32 },
    PositiveLookahead { target: StateId, literal: Vec<u32> },
    NegativeLookahead { target: StateId, literal: Vec<u32> },
}

impl Transition {
    pub fn target(&self) -> StateId {
        match self {
            Transition::Epsilon { target }
            | Transition::Value { target, .. }
            | Transition::Set { target, .. }
            | Transition::Range { target, .. }
            | Transition::Any { target }
            | Transition::Type { target, .. }
            | Transition::BeginAnchor { target }
            | Transition::EndAnchor { target }
            | Transition::StartCapture { target, .. }
            | Transition::EndCapture { target, .. }
            | Transition::PositiveLookahead { target, .. }
            | Transition::NegativeLookahead { target, .. } => *target,
        }
    }

    pub fn is_epsilon(&self) -> bool {
        matches!(self, Transition::Epsilon { .. })
    }

    /// Transitions that advance the subject position.
    pub fn is_consuming(&self) -> bool {
        matches!(
            self,
            Transition::Value { .. }
                | Transition::Set { .. }
                | Transition::Range { .. }
                | Transition::Any { .. }
                | Transition::Type { .. }
        )
    }

    /// Codepoints accepted by a consuming transition, `None` for zero-width
    /// ones.
    pub fn alphabet(&self) -> Option<Alphabet> {
        let (alphabet, invert) = match self {
            Transition::Value { value, .. } => (Alphabet::Value(*value), false),
            Transition::Set { items, invert, .. } => {
                (Alphabet::from_intervals(items.iter().copied()), *invert)
            }
            Transition::Range {
                low, high, invert, ..
            } => (Alphabet::range(*low, *high), *invert),
            Transition::Any { .. } => (Alphabet::Any, false),
            Transition::Type { class, .. } => {
                (Alphabet::from_intervals(class.ranges().iter().copied()), false)
            }
            _ => return None,
        };
        Some(if invert { alphabet.complement() } else { alphabet })
    }

    /// True when some input symbol satisfies both transitions. Zero-width
    /// transitions overlap only with a structurally equal test.
    pub fn overlaps(&self, other: &Transition) -> bool {
        match (self.alphabet(), other.alphabet()) {
            (Some(a), Some(b)) => a.intersects(&b),
            (None, None) => self.with_target(StateId::NONE) == other.with_target(StateId::NONE),
            _ => false,
        }
    }

    /// Copy of this transition pointing somewhere else.
    pub fn with_target(&self, target: StateId) -> Transition {
        let mut t = self.clone();
        match &mut t {
            Transition::Epsilon { target: t }
            | Transition::Value { target: t, .. }
            | Transition::Set { target: t, .. }
            | Transition::Range { target: t, .. }
            | Transition::Any { target: t }
            | Transition::Type { target: t, .. }
            | Transition::BeginAnchor { target: t }
            | Transition::EndAnchor { target: t }
            | Transition::StartCapture { target: t, .. }
            | Transition::EndCapture { target: t, .. }
            | Transition::PositiveLookahead { target: t, .. }
            | Transition::NegativeLookahead { target: t, .. } => *t = target,
        }
        t
    }
}

fn literal_text(literal: &[u32]) -> String {
    literal
        .iter()
        .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Epsilon { target } => write!(f, "eps -> {}", target),
            Transition::Value { target, value } => {
                write!(f, "{} -> {}", DisplayCodepoint(*value), target)
            }
            Transition::Set {
                target,
                items,
                invert,
            } => write!(
                f,
                "{}[{}] -> {}",
                if *invert { "^" } else { "" },
                items
                    .iter()
                    .map(|&(lo, hi)| Alphabet::range(lo, hi).to_string())
                    .join(" "),
                target
            ),
            Transition::Range {
                target,
                low,
                high,
                invert,
            } => write!(
                f,
                "{}{}-{} -> {}",
                if *invert { "^" } else { "" },
                DisplayCodepoint(*low),
                DisplayCodepoint(*high),
                target
            ),
            Transition::Any { target } => write!(f, "any -> {}", target),
            Transition::Type { target, class } => write!(f, "{} -> {}", class, target),
            Transition::BeginAnchor { target } => write!(f, "^ -> {}", target),
            Transition::EndAnchor { target } => write!(f, "$ -> {}", target),
            Transition::StartCapture { target, group } => {
                write!(f, "({} -> {}", group, target)
            }
            Transition::EndCapture { target, group } => write!(f, "){} -> {}", group, target),
            Transition::PositiveLookahead { target, literal } => {
                write!(f, "(?={}) -> {}", literal_text(literal), target)
            }
            Transition::NegativeLookahead { target, literal } => {
                write!(f, "(?!{}) -> {}", literal_text(literal), target)
            }
        }
    }
}

// =============================================================================
// Automaton
// =============================================================================

/// Arena of states with a distinguished start state.
#[derive(Debug, Clone)]
pub struct Automaton {
    states: Vec<State>,
    start: StateId,
    /// Capture group names; index 0 is the whole match.
    groups: Vec<Option<String>>,
    deterministic: bool,
}

impl Default for Automaton {
    fn default() -> Self {
        Self::new()
    }
}

impl Automaton {
    pub fn new() -> Self {
        Automaton {
            states: Vec::new(),
            start: StateId::NONE,
            groups: vec![None],
            deterministic: false,
        }
    }

    pub fn add_state(&mut self, label: impl Into<String>, role: Role) -> StateId {
        let id = StateId::new(self.states.len());
        self.states.push(State {
            label: label.into(),
            transitions: SmallVec::new(),
            role,
        });
        if role == Role::Start && self.start.is_none() {
            self.start = id;
        }
        id
    }

    pub fn add_transition(&mut self, from: StateId, transition: Transition) {
        self.states[from.index()].transitions.push(transition);
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn set_start(&mut self, start: StateId) {
        self.start = start;
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> impl Iterator<Item = (StateId, &State)> {
        self.states
            .iter()
            .enumerate()
            .map(|(i, s)| (StateId::new(i), s))
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    pub(crate) fn mark_deterministic(&mut self) {
        self.deterministic = true;
    }

    /// Register capture group `index` (1-based) with an optional name.
    pub fn set_group(&mut self, index: u32, name: Option<String>) {
        let index = index as usize;
        if self.groups.len() <= index {
            self.groups.resize(index + 1, None);
        }
        self.groups[index] = name;
    }

    /// Group names, index 0 being the whole match.
    pub fn groups(&self) -> &[Option<String>] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn set_groups(&mut self, groups: Vec<Option<String>>) {
        self.groups = groups;
    }

    /// States reachable from the start, in discovery order.
    pub fn reachable(&self) -> Vec<StateId> {
        if self.start.is_none() {
            return Vec::new();
        }
        let mut seen = vec![false; self.states.len()];
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        seen[self.start.index()] = true;
        queue.push_back(self.start);

        while let Some(id) = queue.pop_front() {
            order.push(id);
            for t in &self.states[id.index()].transitions {
                let target = t.target();
                if !seen[target.index()] {
                    seen[target.index()] = true;
                    queue.push_back(target);
                }
            }
        }
        order
    }

    /// Sorted set of states reachable from `seeds` through epsilon transitions,
    /// and through capture markers when `through_captures` is set.
    pub fn epsilon_closure(&self, seeds: &[StateId], through_captures: bool) -> Vec<StateId> {
        let mut seen = vec![false; self.states.len()];
        let mut stack: Vec<StateId> = Vec::with_capacity(seeds.len() * 2);
        let mut closure = Vec::new();

        for &seed in seeds {
            if !seen[seed.index()] {
                seen[seed.index()] = true;
                stack.push(seed);
            }
        }

        while let Some(id) = stack.pop() {
            closure.push(id);
            for t in &self.states[id.index()].transitions {
                let follow = match t {
                    Transition::Epsilon { .. } => true,
                    Transition::StartCapture { .. } | Transition::EndCapture { .. } => {
                        through_captures
                    }
                    _ => false,
                };
                let target = t.target();
                if follow && !seen[target.index()] {
                    seen[target.index()] = true;
                    stack.push(target);
                }
            }
        }

        closure.sort_unstable();
        closure
    }

    /// Multi-line listing: one state per line with its transitions.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for id in self.reachable() {
            let state = &self[id];
            let role = match state.role {
                Role::Start => " (start)",
                Role::Finish => " (finish)",
                Role::Ordinary => "",
            };
            out.push_str(&format!("{} [{}]{}:", id, state.label, role));
            if !state.transitions.is_empty() {
                out.push(' ');
                out.push_str(&state.transitions.iter().map(|t| t.to_string()).join(", "));
            }
            out.push('\n');
        }
        out
    }
}

impl Index<StateId> for Automaton {
    type Output = State;

    fn index(&self, id: StateId) -> &State {
        &self.states[id.index()]
    }
}

impl IndexMut<StateId> for Automaton {
    fn index_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id.index()]
    }
}
