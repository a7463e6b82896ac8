//! Execution core shared by the interpreters and the closure backend.
//!
//! Matching is a backtracking search:
//!
//! 1. An alternative whose test holds pushes a resume point at the next
//!    instruction (unless that instruction is `jump fail`) and continues at
//!    its target; a failing test falls through.
//! 2. Capture markers additionally push a restore entry holding the slot's
//!    previous value, so backtracking undoes the write.
//! 3. `fail` pops the stack. With the stack empty the attempt at the current
//!    start position is over and the search moves one codepoint right.
//! 4. `enter` fails when the `(state, position)` pair was explored before.
//!    The explored set survives across start positions: a pair that failed
//!    once fails from every later start too, because nothing that happens
//!    after `enter` depends on where the attempt began.
//!
//! Step 4 bounds the work per call by states × (subject length + 1).

use crate::bytecode::{Instruction, Label};
use crate::unicode::classify;

use super::{Outcome, Span};

// =============================================================================
// Explored set
// =============================================================================

/// Bitset over `(state, position)` pairs.
#[derive(Debug, Clone)]
pub struct Visited {
    bits: Vec<u64>,
    stride: usize,
}

impl Visited {
    pub fn new(states: usize, subject_len: usize) -> Self {
        let stride = subject_len + 1;
        Visited {
            bits: vec![0; (states * stride).div_ceil(64).max(1)],
            stride,
        }
    }

    /// Mark the pair; `false` if it was already marked.
    #[inline]
    pub fn insert(&mut self, state: u32, pos: usize) -> bool {
        let index = state as usize * self.stride + pos;
        let (word, bit) = (index / 64, index % 64);
        match self.bits.get_mut(word) {
            Some(w) => {
                let fresh = *w & (1 << bit) == 0;
                *w |= 1 << bit;
                fresh
            }
            None => false,
        }
    }
}

// =============================================================================
// Backtrack stack
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<P> {
    Resume { at: P, pos: usize },
    Restore { slot: usize, old: Option<usize> },
}

#[derive(Debug, Clone)]
pub struct Backtrack<P> {
    frames: Vec<Frame<P>>,
}

impl<P: Copy> Default for Backtrack<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Copy> Backtrack<P> {
    pub fn new() -> Self {
        Backtrack { frames: Vec::new() }
    }

    #[inline]
    pub fn push_resume(&mut self, at: P, pos: usize) {
        self.frames.push(Frame::Resume { at, pos });
    }

    #[inline]
    pub fn push_restore(&mut self, slot: usize, old: Option<usize>) {
        self.frames.push(Frame::Restore { slot, old });
    }

    /// Undo capture writes down to the most recent resume point and return
    /// it, or `None` once the stack is exhausted.
    pub fn pop(&mut self, captures: &mut [Option<usize>]) -> Option<(P, usize)> {
        while let Some(frame) = self.frames.pop() {
            match frame {
                Frame::Resume { at, pos } => return Some((at, pos)),
                Frame::Restore { slot, old } => {
                    if let Some(s) = captures.get_mut(slot) {
                        *s = old;
                    }
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

/// Evaluate the test of an alternative at `pos`. Returns the position
/// after it when the test holds. Terminators, `enter` and `jump` have no
/// test and return `None`.
#[inline]
pub fn test(instruction: &Instruction, subject: &[u32], pos: usize) -> Option<usize> {
    let current = subject.get(pos).copied();
    let holds = match instruction {
        Instruction::Begin { .. } => pos == 0,
        Instruction::End { .. } => pos == subject.len(),
        Instruction::Any { .. } => return current.map(|_| pos + 1),
        Instruction::Read { value, .. } => {
            return current.filter(|c| c == value).map(|_| pos + 1)
        }
        Instruction::Range { low, high, .. } => {
            return current
                .filter(|c| (*low..=*high).contains(c))
                .map(|_| pos + 1)
        }
        Instruction::Exclude { items, .. } => {
            return current
                .filter(|c| !items.iter().any(|&(lo, hi)| (lo..=hi).contains(c)))
                .map(|_| pos + 1)
        }
        Instruction::Type { class, .. } => {
            return current.filter(|&c| classify(c, *class)).map(|_| pos + 1)
        }
        Instruction::Lookahead {
            literal, negated, ..
        } => subject[pos.min(subject.len())..].starts_with(literal) != *negated,
        Instruction::CaptureStart { .. }
        | Instruction::CaptureEnd { .. }
        | Instruction::Split { .. } => true,
        Instruction::Enter { .. }
        | Instruction::Jump { .. }
        | Instruction::Match
        | Instruction::Fail
        | Instruction::Deoptimize => false,
    };
    holds.then_some(pos)
}

/// Capture slot written by a marker instruction.
#[inline]
pub fn capture_slot(instruction: &Instruction) -> Option<usize> {
    match instruction {
        Instruction::CaptureStart { group, .. } => Some(2 * *group as usize),
        Instruction::CaptureEnd { group, .. } => Some(2 * *group as usize + 1),
        _ => None,
    }
}

// =============================================================================
// Search loop
// =============================================================================

/// Instruction storage an executor walks. `P` is the executor's program
/// counter.
pub trait Code {
    type Pc: Copy;

    fn entry(&self) -> Self::Pc;
    fn fetch(&self, pc: Self::Pc) -> &Instruction;
    /// Instruction after `pc` in the same block.
    fn next(&self, pc: Self::Pc) -> Self::Pc;
    /// Where a taken exit of the instruction at `pc` continues.
    fn target(&self, pc: Self::Pc, label: Label) -> Self::Pc;
    fn state_count(&self) -> usize;
}

/// Observer hooks for profiling executors. The default methods do nothing,
/// so [`NoProbe`] compiles down to the bare loop.
pub trait Probe<P> {
    #[inline]
    fn enter(&mut self, _state: u32) {}
    #[inline]
    fn exit(&mut self, _pc: P, _taken: bool) {}
}

pub struct NoProbe;

impl<P> Probe<P> for NoProbe {}

/// Leftmost-first search of `subject`, filling `captures` on a match.
pub fn run<C, R>(code: &C, probe: &mut R, subject: &[u32], captures: &mut [Option<usize>]) -> Outcome
where
    C: Code,
    R: Probe<C::Pc>,
{
    let len = subject.len();
    let mut visited = Visited::new(code.state_count(), len);
    let mut stack: Backtrack<C::Pc> = Backtrack::new();
    captures.fill(None);

    for start in 0..=len {
        let mut pc = code.entry();
        let mut pos = start;

        loop {
            let instruction = code.fetch(pc);
            let failed = match instruction {
                Instruction::Enter { state } => {
                    probe.enter(*state);
                    if visited.insert(*state, pos) {
                        pc = code.next(pc);
                        false
                    } else {
                        true
                    }
                }
                Instruction::Match => {
                    if let [begin, end, ..] = captures {
                        *begin = Some(start);
                        *end = Some(pos);
                    }
                    return Outcome::Match(Span { start, end: pos });
                }
                Instruction::Fail => true,
                Instruction::Deoptimize => return Outcome::Deoptimize,
                Instruction::Jump { target } => {
                    probe.exit(pc, true);
                    pc = code.target(pc, *target);
                    false
                }
                _ => {
                    let Some(target) = instruction.target() else {
                        return Outcome::NoMatch;
                    };
                    match test(instruction, subject, pos) {
                        Some(after) => {
                            probe.exit(pc, true);
                            let resume = code.next(pc);
                            if !code.fetch(resume).is_fail_jump() {
                                stack.push_resume(resume, pos);
                            }
                            if let Some(slot) = capture_slot(instruction) {
                                if let Some(value) = captures.get_mut(slot) {
                                    stack.push_restore(slot, *value);
                                    *value = Some(pos);
                                }
                            }
                            pos = after;
                            pc = code.target(pc, target);
                        }
                        None => {
                            probe.exit(pc, false);
                            pc = code.next(pc);
                        }
                    }
                    false
                }
            };

            if failed {
                match stack.pop(captures) {
                    Some((at, p)) => {
                        pc = at;
                        pos = p;
                    }
                    None => break,
                }
            }
        }
    }
    Outcome::NoMatch
}
