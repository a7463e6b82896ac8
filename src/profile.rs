//! Branch and entry profiling for the bytecode interpreter.
//!
//! Counters are keyed by bytecode offset. Every target-bearing instruction
//! records whether its exit was taken (the test held and control moved to
//! the target) or not taken (control fell through); `jump` always counts as
//! taken. `enter` records one entry per state. A profile is only meaningful
//! for the program it was sized for and is reset whenever a new compiled
//! unit is installed.

use crate::bytecode::{Instruction, Program};

/// Saturation bound for every counter.
pub const MAX_COUNT: u64 = u64::MAX - 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitCounts {
    pub taken: u64,
    pub not_taken: u64,
}

impl ExitCounts {
    pub fn executions(&self) -> u64 {
        self.taken.saturating_add(self.not_taken)
    }

    /// Fraction of executions that took the exit; 0.0 if never executed.
    pub fn probability(&self) -> f64 {
        match self.executions() {
            0 => 0.0,
            n => self.taken as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Profile {
    exits: Vec<ExitCounts>,
    entries: Vec<u64>,
    invocations: u64,
}

impl Profile {
    /// Empty profile sized for `program`.
    pub fn new(program: &Program) -> Self {
        Profile {
            exits: vec![ExitCounts::default(); program.len()],
            entries: vec![0; program.state_count()],
            invocations: 0,
        }
    }

    #[inline]
    pub fn record_exit(&mut self, pc: usize, taken: bool) {
        if let Some(counts) = self.exits.get_mut(pc) {
            let counter = if taken {
                &mut counts.taken
            } else {
                &mut counts.not_taken
            };
            *counter = counter.saturating_add(1).min(MAX_COUNT);
        }
    }

    #[inline]
    pub fn record_entry(&mut self, state: u32) {
        if let Some(count) = self.entries.get_mut(state as usize) {
            *count = count.saturating_add(1).min(MAX_COUNT);
        }
    }

    pub fn record_invocation(&mut self) {
        self.invocations = self.invocations.saturating_add(1).min(MAX_COUNT);
    }

    pub fn exit(&self, pc: usize) -> ExitCounts {
        self.exits.get(pc).copied().unwrap_or_default()
    }

    pub fn exit_probability(&self, pc: usize) -> f64 {
        self.exit(pc).probability()
    }

    /// An exit that was never taken during profiling.
    pub fn is_uncommon(&self, pc: usize) -> bool {
        self.exit(pc).taken == 0
    }

    pub fn entries(&self, state: u32) -> u64 {
        self.entries.get(state as usize).copied().unwrap_or(0)
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn reset(&mut self) {
        self.exits.fill(ExitCounts::default());
        self.entries.fill(0);
        self.invocations = 0;
    }

    /// `pc  taken/not_taken  probability` for every exercised exit of
    /// `program`.
    pub fn dump(&self, program: &Program) -> String {
        let mut output = format!("invocations: {}\n", self.invocations);
        for (pc, instruction) in program.instructions().iter().enumerate() {
            match instruction {
                Instruction::Enter { state } => {
                    output.push_str(&format!(
                        "  {:04}  {:<24} entries={}\n",
                        pc,
                        instruction.to_string(),
                        self.entries(*state)
                    ));
                }
                _ if instruction.target().is_some() => {
                    let counts = self.exit(pc);
                    output.push_str(&format!(
                        "  {:04}  {:<24} taken={} not_taken={} p={:.2}\n",
                        pc,
                        instruction.to_string(),
                        counts.taken,
                        counts.not_taken,
                        counts.probability()
                    ));
                }
                _ => {}
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::nfa;
    use crate::bytecode::compile;
    use crate::syntax::parse;

    fn program() -> Program {
        compile(&nfa::build(&parse("ab", None).expect("parse")).expect("build")).expect("compile")
    }

    #[test]
    fn test_probability_of_unexecuted_exit_is_zero() {
        let profile = Profile::new(&program());
        assert_eq!(profile.exit_probability(1), 0.0);
        assert!(profile.is_uncommon(1));
    }

    #[test]
    fn test_probability() {
        let mut profile = Profile::new(&program());
        profile.record_exit(1, true);
        profile.record_exit(1, false);
        profile.record_exit(1, false);
        profile.record_exit(1, true);
        assert_eq!(profile.exit(1), ExitCounts { taken: 2, not_taken: 2 });
        assert_eq!(profile.exit_probability(1), 0.5);
        assert!(!profile.is_uncommon(1));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut profile = Profile::new(&program());
        profile.record_exit(10_000, true);
        profile.record_entry(10_000);
        assert_eq!(profile.exit(10_000), ExitCounts::default());
        assert_eq!(profile.entries(10_000), 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut profile = Profile::new(&program());
        profile.record_exit(1, true);
        profile.record_entry(0);
        profile.record_invocation();
        profile.reset();
        assert_eq!(profile.exit(1), ExitCounts::default());
        assert_eq!(profile.entries(0), 0);
        assert_eq!(profile.invocations(), 0);
    }

    #[test]
    fn test_dump() {
        let p = program();
        let mut profile = Profile::new(&p);
        profile.record_entry(0);
        profile.record_exit(1, true);
        let dump = profile.dump(&p);
        assert!(dump.contains("entries=1"));
        assert!(dump.contains("taken=1 not_taken=0 p=1.00"));
    }
}
