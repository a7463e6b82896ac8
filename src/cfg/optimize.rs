//! Graph-level optimization phases.
//!
//! - [`DeadBlockElimination`]: removes every non-entry block without
//!   predecessors until none is left. A block that only jumps to itself
//!   is still dead.
//! - [`UncommonBranchElimination`]: speculative. Exits that the profile saw
//!   taken zero times are redirected to a synthetic `deopt` block, after
//!   which dead-block elimination runs again.

use tracing::debug;

use crate::bytecode::{Instruction, Label};
use crate::profile::Profile;

use super::{BlockId, Cfg, CfgInstruction};

// =============================================================================
// Dead block elimination
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DceStats {
    /// Blocks present before the pass
    pub blocks_found: usize,
    pub blocks_removed: usize,
    /// Sweeps until the fixed point, the last one removing nothing
    pub iterations: usize,
}

#[derive(Debug, Default)]
pub struct DeadBlockElimination {
    stats: DceStats,
}

impl DeadBlockElimination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &DceStats {
        &self.stats
    }

    pub fn run(&mut self, cfg: &mut Cfg) -> &DceStats {
        self.stats = DceStats {
            blocks_found: cfg.len(),
            ..DceStats::default()
        };
        cfg.recompute_predecessors();

        loop {
            self.stats.iterations += 1;
            let dead: Vec<BlockId> = cfg
                .blocks()
                .filter(|b| b.id != cfg.entry())
                .filter(|b| b.predecessors.iter().all(|&p| p == b.id))
                .map(|b| b.id)
                .collect();
            if dead.is_empty() {
                break;
            }
            for id in dead {
                if cfg.remove_block(id).is_some() {
                    self.stats.blocks_removed += 1;
                }
            }
            cfg.recompute_predecessors();
        }

        debug!(
            target: "rejit::cfg::optimize",
            found = self.stats.blocks_found,
            removed = self.stats.blocks_removed,
            iterations = self.stats.iterations,
            "Dead block elimination"
        );
        &self.stats
    }
}

// =============================================================================
// Uncommon branch elimination
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncommonBranchStats {
    pub exits_redirected: usize,
    pub dce: DceStats,
}

/// Rewrites never-taken exits into deoptimization exits.
pub struct UncommonBranchElimination<'p> {
    profile: &'p Profile,
    stats: UncommonBranchStats,
}

impl<'p> UncommonBranchElimination<'p> {
    pub fn new(profile: &'p Profile) -> Self {
        UncommonBranchElimination {
            profile,
            stats: UncommonBranchStats::default(),
        }
    }

    pub fn stats(&self) -> &UncommonBranchStats {
        &self.stats
    }

    pub fn run(&mut self, cfg: &mut Cfg) -> &UncommonBranchStats {
        self.stats = UncommonBranchStats::default();

        let mut redirected = 0;
        for id in cfg.block_ids() {
            let Some(block) = cfg.block_mut(id) else {
                continue;
            };
            for i in &mut block.instructions {
                let Some(pc) = i.origin else { continue };
                let Some(target) = i.instruction.target_mut() else {
                    continue;
                };
                if *target != Label::DEOPTIMIZE && self.profile.is_uncommon(pc) {
                    *target = Label::DEOPTIMIZE;
                    redirected += 1;
                }
            }
        }

        if redirected > 0 && cfg.block_for(Label::DEOPTIMIZE).is_none() {
            cfg.add_block(
                "deopt",
                Label::DEOPTIMIZE,
                vec![CfgInstruction::synthetic(Instruction::Deoptimize)],
            );
        }
        self.stats.exits_redirected = redirected;
        self.stats.dce = DeadBlockElimination::new().run(cfg).clone();

        debug!(
            target: "rejit::cfg::optimize",
            redirected,
            removed = self.stats.dce.blocks_removed,
            "Uncommon branch elimination"
        );
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::nfa;
    use crate::bytecode::{compile, Program};
    use crate::syntax::parse;

    fn program(source: &str) -> Program {
        compile(&nfa::build(&parse(source, None).expect("parse")).expect("build")).expect("compile")
    }

    /// Profile in which every exit was taken at least once.
    fn saturated(program: &Program) -> Profile {
        let mut profile = Profile::new(program);
        for pc in 0..program.len() {
            profile.record_exit(pc, true);
        }
        profile
    }

    #[test]
    fn test_dce_on_clean_graph_is_noop() {
        let mut cfg = Cfg::build(&program("a(b|c)*d")).expect("cfg");
        let before = cfg.len();
        let stats = DeadBlockElimination::new().run(&mut cfg).clone();
        assert_eq!(stats.blocks_removed, 0);
        assert_eq!(stats.iterations, 1);
        assert_eq!(cfg.len(), before);
    }

    #[test]
    fn test_dce_removes_chains_of_dead_blocks() {
        let p = program("abc");
        let mut cfg = Cfg::build(&p).expect("cfg");
        // cut the entry off from the rest: everything but entry and fail dies
        let entry = cfg.entry();
        for i in &mut cfg.block_mut(entry).expect("entry").instructions {
            if let Some(target) = i.instruction.target_mut() {
                *target = Label::FAIL;
            }
        }
        let stats = DeadBlockElimination::new().run(&mut cfg).clone();
        assert_eq!(cfg.len(), 2);
        assert!(stats.iterations > 2, "{:?}", stats);
        assert!(cfg.block(entry).is_some());
    }

    #[test]
    fn test_dce_removes_self_loops() {
        let p = program("a");
        let mut cfg = Cfg::build(&p).expect("cfg");
        let entry = cfg.entry();
        let label = Label::state(crate::automaton::StateId::new(99));
        let orphan = cfg.add_block(
            "orphan",
            label,
            vec![CfgInstruction::synthetic(Instruction::Jump { target: label })],
        );
        DeadBlockElimination::new().run(&mut cfg);
        assert!(cfg.block(orphan).is_none());
        assert!(cfg.block(entry).is_some());
    }

    #[test]
    fn test_dce_is_idempotent() {
        let p = program("(x|y)+z");
        let mut cfg = Cfg::build(&p).expect("cfg");
        DeadBlockElimination::new().run(&mut cfg);
        let dump = cfg.dump();
        let stats = DeadBlockElimination::new().run(&mut cfg).clone();
        assert_eq!(stats.blocks_removed, 0);
        assert_eq!(cfg.dump(), dump);
    }

    #[test]
    fn test_uncommon_exits_go_to_deopt() {
        let p = program("a(bcde)?f");
        let mut cfg = Cfg::build(&p).expect("cfg");
        let profile = Profile::new(&p);
        let stats = UncommonBranchElimination::new(&profile).run(&mut cfg).clone();
        assert!(stats.exits_redirected > 0);
        let deopt = cfg.block_for(Label::DEOPTIMIZE).expect("deopt block");
        // nothing was ever taken, so only the entry and the deopt block survive
        assert_eq!(cfg.len(), 2);
        assert_eq!(cfg.successors(cfg.entry()), vec![deopt]);
    }

    #[test]
    fn test_common_exits_are_kept() {
        let p = program("a(bcde)?f");
        let mut cfg = Cfg::build(&p).expect("cfg");
        let before = cfg.dump();
        let profile = saturated(&p);
        let stats = UncommonBranchElimination::new(&profile).run(&mut cfg).clone();
        assert_eq!(stats.exits_redirected, 0);
        assert!(cfg.block_for(Label::DEOPTIMIZE).is_none());
        assert_eq!(cfg.dump(), before);
    }

    #[test]
    fn test_uncommon_branch_elimination_is_idempotent() {
        let p = program("a(bcde)?f");
        // every exit taken except the read of 'b' inside the optional group
        let mut profile = Profile::new(&p);
        for (pc, instruction) in p.instructions().iter().enumerate() {
            if !matches!(instruction, Instruction::Read { value, .. } if *value == 'b' as u32) {
                profile.record_exit(pc, true);
            }
        }

        let mut cfg = Cfg::build(&p).expect("cfg");
        UncommonBranchElimination::new(&profile).run(&mut cfg);
        let once = cfg.dump();
        let second = UncommonBranchElimination::new(&profile).run(&mut cfg).clone();
        assert_eq!(second.exits_redirected, 0);
        assert_eq!(second.dce.blocks_removed, 0);
        assert_eq!(cfg.dump(), once);
        assert!(cfg.block_for(Label::DEOPTIMIZE).is_some());
        assert!(cfg.block(cfg.entry()).is_some());
    }
}
