//! Linear bytecode for automata.
//!
//! A [`Program`] is an instruction sequence plus a label→offset map. Each
//! automaton state becomes a labelled run of instructions:
//!
//! ```text
//! s0:
//!   0000  enter s0
//!   0001  read 'a' -> s1
//!   0002  jump fail
//! s1:
//!   0003  enter s1
//!   0004  match
//! fail:
//!   0005  fail
//! ```
//!
//! Every target-bearing instruction except `jump` is an *alternative*: when
//! its test holds, execution records a backtrack point at the following
//! instruction and transfers to the target; otherwise it falls through. A
//! backtrack point in front of `jump fail` would only fail again, so
//! executors skip recording it.

pub mod compiler;

pub use compiler::compile;

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::automaton::alphabet::{Alphabet, DisplayCodepoint};
use crate::automaton::StateId;
use crate::error::{InternalError, Result};
use crate::unicode::CharType;

// =============================================================================
// Label
// =============================================================================

/// Symbolic jump target. State labels carry the automaton state index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Label(u32);

impl Label {
    /// Shared failure block.
    pub const FAIL: Label = Label(u32::MAX);
    /// Synthetic deoptimization block inserted by speculative optimization.
    pub const DEOPTIMIZE: Label = Label(u32::MAX - 1);

    pub fn state(id: StateId) -> Label {
        Label(id.index() as u32)
    }

    /// Automaton state index, `None` for the synthetic labels.
    pub fn state_index(self) -> Option<u32> {
        if self == Label::FAIL || self == Label::DEOPTIMIZE {
            None
        } else {
            Some(self.0)
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Label::FAIL => write!(f, "fail"),
            Label::DEOPTIMIZE => write!(f, "deopt"),
            Label(n) => write!(f, "s{}", n),
        }
    }
}

// =============================================================================
// Instruction
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// First instruction of every state: fails if the state was already
    /// explored at the current position.
    Enter { state: u32 },
    Begin { target: Label },
    End { target: Label },
    Any { target: Label },
    Read { value: u32, target: Label },
    Range { low: u32, high: u32, target: Label },
    /// Consume one codepoint outside every interval of `items`.
    Exclude { items: Box<[(u32, u32)]>, target: Label },
    Type { class: CharType, target: Label },
    Lookahead { literal: Box<[u32]>, negated: bool, target: Label },
    CaptureStart { group: u32, target: Label },
    CaptureEnd { group: u32, target: Label },
    /// Non-final epsilon alternative.
    Split { target: Label },
    Jump { target: Label },
    Match,
    Fail,
    Deoptimize,
}

impl Instruction {
    pub fn target(&self) -> Option<Label> {
        match self {
            Instruction::Begin { target }
            | Instruction::End { target }
            | Instruction::Any { target }
            | Instruction::Read { target, .. }
            | Instruction::Range { target, .. }
            | Instruction::Exclude { target, .. }
            | Instruction::Type { target, .. }
            | Instruction::Lookahead { target, .. }
            | Instruction::CaptureStart { target, .. }
            | Instruction::CaptureEnd { target, .. }
            | Instruction::Split { target }
            | Instruction::Jump { target } => Some(*target),
            Instruction::Enter { .. }
            | Instruction::Match
            | Instruction::Fail
            | Instruction::Deoptimize => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut Label> {
        match self {
            Instruction::Begin { target }
            | Instruction::End { target }
            | Instruction::Any { target }
            | Instruction::Read { target, .. }
            | Instruction::Range { target, .. }
            | Instruction::Exclude { target, .. }
            | Instruction::Type { target, .. }
            | Instruction::Lookahead { target, .. }
            | Instruction::CaptureStart { target, .. }
            | Instruction::CaptureEnd { target, .. }
            | Instruction::Split { target }
            | Instruction::Jump { target } => Some(target),
            Instruction::Enter { .. }
            | Instruction::Match
            | Instruction::Fail
            | Instruction::Deoptimize => None,
        }
    }

    /// Ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Jump { .. }
                | Instruction::Match
                | Instruction::Fail
                | Instruction::Deoptimize
        )
    }

    /// Conditional transfer that records a backtrack point when taken.
    pub fn is_alternative(&self) -> bool {
        self.target().is_some() && !matches!(self, Instruction::Jump { .. })
    }

    /// `jump fail`: resuming here can only fail.
    pub fn is_fail_jump(&self) -> bool {
        matches!(self, Instruction::Jump { target: Label::FAIL }) || *self == Instruction::Fail
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Enter { .. } => "enter",
            Instruction::Begin { .. } => "begin",
            Instruction::End { .. } => "end",
            Instruction::Any { .. } => "any",
            Instruction::Read { .. } => "read",
            Instruction::Range { .. } => "range",
            Instruction::Exclude { .. } => "exclude",
            Instruction::Type { .. } => "type",
            Instruction::Lookahead { negated: false, .. } => "lookahead",
            Instruction::Lookahead { negated: true, .. } => "neglookahead",
            Instruction::CaptureStart { .. } => "capture_start",
            Instruction::CaptureEnd { .. } => "capture_end",
            Instruction::Split { .. } => "split",
            Instruction::Jump { .. } => "jump",
            Instruction::Match => "match",
            Instruction::Fail => "fail",
            Instruction::Deoptimize => "deoptimize",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Instruction::Enter { state } => write!(f, "{} s{}", m, state),
            Instruction::Begin { target }
            | Instruction::End { target }
            | Instruction::Any { target }
            | Instruction::Split { target } => write!(f, "{} -> {}", m, target),
            Instruction::Jump { target } => write!(f, "{} {}", m, target),
            Instruction::Read { value, target } => {
                write!(f, "{} {} -> {}", m, DisplayCodepoint(*value), target)
            }
            Instruction::Range { low, high, target } => write!(
                f,
                "{} {}-{} -> {}",
                m,
                DisplayCodepoint(*low),
                DisplayCodepoint(*high),
                target
            ),
            Instruction::Exclude { items, target } => write!(
                f,
                "{} [{}] -> {}",
                m,
                items
                    .iter()
                    .map(|&(lo, hi)| Alphabet::range(lo, hi).to_string())
                    .join(" "),
                target
            ),
            Instruction::Type { class, target } => write!(f, "{} {} -> {}", m, class, target),
            Instruction::Lookahead {
                literal, target, ..
            } => write!(
                f,
                "{} {:?} -> {}",
                m,
                literal
                    .iter()
                    .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect::<String>(),
                target
            ),
            Instruction::CaptureStart { group, target }
            | Instruction::CaptureEnd { group, target } => {
                write!(f, "{} {} -> {}", m, group, target)
            }
            Instruction::Match | Instruction::Fail | Instruction::Deoptimize => {
                write!(f, "{}", m)
            }
        }
    }
}

// =============================================================================
// Program
// =============================================================================

/// Compiled bytecode. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: BTreeMap<Label, usize>,
    entry: Label,
    states: usize,
    groups: Vec<Option<String>>,
}

impl Program {
    pub(crate) fn new(
        instructions: Vec<Instruction>,
        labels: BTreeMap<Label, usize>,
        entry: Label,
        states: usize,
        groups: Vec<Option<String>>,
    ) -> Self {
        Program {
            instructions,
            labels,
            entry,
            states,
            groups,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn labels(&self) -> &BTreeMap<Label, usize> {
        &self.labels
    }

    pub fn offset(&self, label: Label) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    pub fn entry(&self) -> Label {
        self.entry
    }

    /// Number of automaton states; `enter` operands are below this bound.
    pub fn state_count(&self) -> usize {
        self.states
    }

    pub fn groups(&self) -> &[Option<String>] {
        &self.groups
    }

    /// Capture groups including group 0 (the whole match).
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Structural checks every executor relies on: the entry and `fail`
    /// labels exist, every target is defined, `enter` operands are in range
    /// and the last instruction is a terminator.
    pub fn validate(&self) -> Result<()> {
        for label in [self.entry, Label::FAIL] {
            if self.offset(label).is_none() {
                return Err(InternalError::UndefinedLabel(label.to_string()).into());
            }
        }
        for instruction in &self.instructions {
            if let Some(target) = instruction.target() {
                if !self.labels.contains_key(&target) {
                    return Err(InternalError::UndefinedLabel(target.to_string()).into());
                }
            }
            if let Instruction::Enter { state } = instruction {
                if *state as usize >= self.states {
                    return Err(InternalError::UndefinedLabel(format!("s{}", state)).into());
                }
            }
        }
        if self.labels.values().any(|&offset| offset >= self.instructions.len())
            || !self.instructions.last().is_some_and(Instruction::is_terminator)
        {
            return Err(InternalError::UndefinedLabel("end of program".to_string()).into());
        }
        Ok(())
    }

    /// Textual listing: each label on its own line followed by its
    /// instructions with their offsets.
    pub fn dump(&self) -> String {
        let mut by_offset: BTreeMap<usize, Vec<Label>> = BTreeMap::new();
        for (label, offset) in &self.labels {
            by_offset.entry(*offset).or_default().push(*label);
        }

        let mut output = String::new();
        for (offset, instruction) in self.instructions.iter().enumerate() {
            if let Some(labels) = by_offset.get(&offset) {
                for label in labels {
                    output.push_str(&format!("{}:\n", label));
                }
            }
            output.push_str(&format!("  {:04}  {}\n", offset, instruction));
        }
        output
    }
}
