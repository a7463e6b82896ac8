//! Control-flow graph of extended basic blocks.
//!
//! [`Cfg::build`] splits a [`Program`] at offset 0 and at every labelled
//! offset. A block runs until its first terminator; a block that would fall
//! into the next block start gets a synthetic `jump` to it, so every block
//! ends in `jump`, `match`, `fail` or `deoptimize` and only the first
//! instruction of a block is ever a jump target.
//!
//! Every instruction remembers the bytecode offset it came from
//! ([`CfgInstruction::origin`]), which is how profile data collected on the
//! bytecode is mapped onto the graph.

pub mod optimize;
pub mod schedule;

pub use optimize::{DceStats, DeadBlockElimination, UncommonBranchElimination, UncommonBranchStats};
pub use schedule::{DiscoveryOrder, FallthroughOrder, Scheduler};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::bytecode::{Instruction, Label, Program};
use crate::error::{InternalError, Result};

/// Handle of a block inside one [`Cfg`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Instruction plus the bytecode offset it was copied from. Synthetic
/// instructions have no origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfgInstruction {
    pub instruction: Instruction,
    pub origin: Option<usize>,
}

impl CfgInstruction {
    pub fn synthetic(instruction: Instruction) -> Self {
        CfgInstruction {
            instruction,
            origin: None,
        }
    }
}

/// Extended basic block.
#[derive(Debug, Clone)]
pub struct Ebb {
    pub id: BlockId,
    pub name: String,
    /// Label the block is entered through, `None` for an unlabelled entry.
    pub label: Option<Label>,
    /// Automaton state the block belongs to.
    pub state: Option<u32>,
    pub instructions: Vec<CfgInstruction>,
    pub predecessors: BTreeSet<BlockId>,
}

impl Ebb {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().map(|i| &i.instruction)
    }

    /// Target labels in instruction order, duplicates removed.
    pub fn exit_labels(&self) -> Vec<Label> {
        let mut labels = Vec::new();
        for target in self
            .instructions
            .iter()
            .filter_map(|i| i.instruction.target())
        {
            if !labels.contains(&target) {
                labels.push(target);
            }
        }
        labels
    }
}

// =============================================================================
// Cfg
// =============================================================================

#[derive(Debug, Clone)]
pub struct Cfg {
    blocks: BTreeMap<BlockId, Ebb>,
    exit_map: BTreeMap<Label, BlockId>,
    entry: BlockId,
    states: usize,
    groups: Vec<Option<String>>,
    next_id: u32,
}

impl Cfg {
    /// Split `program` into blocks. Fails on a target label the program
    /// does not define.
    pub fn build(program: &Program) -> Result<Cfg> {
        let instructions = program.instructions();

        let mut starts: BTreeMap<usize, Vec<Label>> = BTreeMap::new();
        starts.entry(0).or_default();
        for (label, &offset) in program.labels() {
            starts.entry(offset).or_default().push(*label);
        }

        let mut blocks = BTreeMap::new();
        let mut exit_map = BTreeMap::new();
        let mut at_offset: BTreeMap<usize, BlockId> = BTreeMap::new();
        let offsets: Vec<usize> = starts.keys().copied().collect();

        for (index, &start) in offsets.iter().enumerate() {
            if start >= instructions.len() {
                continue;
            }
            let id = BlockId(index as u32);
            let next_start = offsets.get(index + 1).copied();
            let labels = &starts[&start];

            let mut body = Vec::new();
            let mut pc = start;
            loop {
                if Some(pc) == next_start || pc >= instructions.len() {
                    // Fall into the next block through an explicit jump
                    let target = next_start
                        .and_then(|next| starts.get(&next))
                        .and_then(|labels| labels.first().copied())
                        .unwrap_or(Label::FAIL);
                    body.push(CfgInstruction::synthetic(Instruction::Jump { target }));
                    break;
                }
                let instruction = instructions[pc].clone();
                let terminator = instruction.is_terminator();
                body.push(CfgInstruction {
                    instruction,
                    origin: Some(pc),
                });
                if terminator {
                    break;
                }
                pc += 1;
            }

            let label = labels.first().copied();
            for label in labels {
                exit_map.insert(*label, id);
            }
            at_offset.insert(start, id);
            blocks.insert(
                id,
                Ebb {
                    id,
                    name: label.map_or_else(|| "entry".to_string(), |l| l.to_string()),
                    label,
                    state: label.and_then(Label::state_index),
                    instructions: body,
                    predecessors: BTreeSet::new(),
                },
            );
        }

        let entry_offset = program.offset(program.entry()).unwrap_or(0);
        let entry = at_offset
            .get(&entry_offset)
            .copied()
            .ok_or_else(|| InternalError::UndefinedLabel(program.entry().to_string()))?;

        let mut cfg = Cfg {
            next_id: blocks.len() as u32,
            blocks,
            exit_map,
            entry,
            states: program.state_count(),
            groups: program.groups().to_vec(),
        };
        cfg.validate()?;
        cfg.recompute_predecessors();

        debug!(
            target: "rejit::cfg",
            blocks = cfg.len(),
            instructions = program.len(),
            "Built control-flow graph"
        );
        Ok(cfg)
    }

    /// Every target label must name a block.
    pub fn validate(&self) -> Result<()> {
        for block in self.blocks.values() {
            for label in block.exit_labels() {
                if !self.exit_map.contains_key(&label) {
                    return Err(InternalError::UndefinedLabel(label.to_string()).into());
                }
            }
        }
        Ok(())
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&Ebb> {
        self.blocks.get(&id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Ebb> {
        self.blocks.values()
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    pub fn exit_map(&self) -> &BTreeMap<Label, BlockId> {
        &self.exit_map
    }

    pub fn block_for(&self, label: Label) -> Option<BlockId> {
        self.exit_map.get(&label).copied()
    }

    /// Automaton states; `enter` operands are below this bound.
    pub fn state_count(&self) -> usize {
        self.states
    }

    pub fn groups(&self) -> &[Option<String>] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|b| b.instructions.len()).sum()
    }

    /// Successor blocks in instruction order.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let Some(block) = self.blocks.get(&id) else {
            return Vec::new();
        };
        let mut successors = Vec::new();
        for label in block.exit_labels() {
            if let Some(&target) = self.exit_map.get(&label) {
                if !successors.contains(&target) {
                    successors.push(target);
                }
            }
        }
        successors
    }

    pub fn predecessors(&self, id: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.blocks.get(&id).map(|b| &b.predecessors)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> Option<&mut Ebb> {
        self.blocks.get_mut(&id)
    }

    pub(crate) fn add_block(
        &mut self,
        name: impl Into<String>,
        label: Label,
        instructions: Vec<CfgInstruction>,
    ) -> BlockId {
        let id = BlockId(self.next_id);
        self.next_id += 1;
        self.blocks.insert(
            id,
            Ebb {
                id,
                name: name.into(),
                label: Some(label),
                state: label.state_index(),
                instructions,
                predecessors: BTreeSet::new(),
            },
        );
        self.exit_map.insert(label, id);
        id
    }

    /// Drop a block and every label that named it. The entry block stays.
    pub(crate) fn remove_block(&mut self, id: BlockId) -> Option<Ebb> {
        if id == self.entry {
            return None;
        }
        let removed = self.blocks.remove(&id)?;
        self.exit_map.retain(|_, block| *block != id);
        Some(removed)
    }

    pub(crate) fn recompute_predecessors(&mut self) {
        let edges: Vec<(BlockId, BlockId)> = self
            .blocks
            .keys()
            .flat_map(|&from| {
                self.successors(from)
                    .into_iter()
                    .map(move |to| (from, to))
            })
            .collect();

        for block in self.blocks.values_mut() {
            block.predecessors.clear();
        }
        for (from, to) in edges {
            if let Some(block) = self.blocks.get_mut(&to) {
                block.predecessors.insert(from);
            }
        }
    }

    /// Blocks in id order, each with its predecessors, instructions (origin
    /// offset or `----` for synthetic ones) and `label -> successor` edges.
    pub fn dump(&self) -> String {
        let mut output = String::new();
        for block in self.blocks.values() {
            let predecessors = if block.predecessors.is_empty() {
                "-".to_string()
            } else {
                block
                    .predecessors
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let marker = if block.id == self.entry { " (entry)" } else { "" };
            output.push_str(&format!(
                "{} [{}]{} preds: {}\n",
                block.name, block.id, marker, predecessors
            ));
            for i in &block.instructions {
                match i.origin {
                    Some(pc) => output.push_str(&format!("  {:04}  {}\n", pc, i.instruction)),
                    None => output.push_str(&format!("  ----  {}\n", i.instruction)),
                }
            }
            for label in block.exit_labels() {
                if let Some(target) = self.exit_map.get(&label) {
                    output.push_str(&format!("  {} -> {} [{}]\n", block.name, label, target));
                }
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::{nfa, StateId};
    use crate::bytecode::compile;
    use crate::syntax::parse;

    fn cfg(source: &str) -> Cfg {
        let ast = parse(source, None).expect("parse");
        let program = compile(&nfa::build(&ast).expect("build")).expect("compile");
        Cfg::build(&program).expect("cfg")
    }

    fn s(n: usize) -> Label {
        Label::state(StateId::new(n))
    }

    #[test]
    fn test_one_block_per_label() {
        let ast = parse("a(b|c)d", None).expect("parse");
        let program = compile(&nfa::build(&ast).expect("build")).expect("compile");
        let cfg = Cfg::build(&program).expect("cfg");
        assert_eq!(cfg.len(), program.labels().len());
        assert_eq!(cfg.block(cfg.entry()).and_then(|b| b.label), Some(program.entry()));
    }

    #[test]
    fn test_every_block_ends_in_terminator() {
        let cfg = cfg("x(y|z)*w?");
        for block in cfg.blocks() {
            let terminator = block.terminator().expect("non-empty block");
            assert!(terminator.is_terminator(), "{}", block.name);
            let inner = &block.instructions[..block.instructions.len() - 1];
            assert!(inner.iter().all(|i| !i.instruction.is_terminator()));
        }
    }

    #[test]
    fn test_origins_point_back_into_bytecode() {
        let ast = parse("ab|c", None).expect("parse");
        let program = compile(&nfa::build(&ast).expect("build")).expect("compile");
        let cfg = Cfg::build(&program).expect("cfg");
        for block in cfg.blocks() {
            for i in &block.instructions {
                if let Some(pc) = i.origin {
                    assert_eq!(program.instructions()[pc], i.instruction);
                }
            }
        }
    }

    #[test]
    fn test_fallthrough_gets_synthetic_jump() {
        let mut labels = BTreeMap::new();
        labels.insert(s(0), 0);
        labels.insert(s(1), 2);
        labels.insert(Label::FAIL, 3);
        let program = Program::new(
            vec![
                Instruction::Enter { state: 0 },
                Instruction::Read {
                    value: 0x61,
                    target: s(1),
                },
                Instruction::Match,
                Instruction::Fail,
            ],
            labels,
            s(0),
            2,
            vec![None],
        );
        let cfg = Cfg::build(&program).expect("cfg");
        let entry = cfg.block(cfg.entry()).expect("entry");
        assert_eq!(
            entry.instructions.last(),
            Some(&CfgInstruction::synthetic(Instruction::Jump { target: s(1) }))
        );
        assert_eq!(cfg.successors(cfg.entry()), vec![BlockId(1)]);
    }

    #[test]
    fn test_undefined_label_is_rejected() {
        let mut labels = BTreeMap::new();
        labels.insert(s(0), 0);
        let program = Program::new(
            vec![
                Instruction::Enter { state: 0 },
                Instruction::Jump { target: s(7) },
            ],
            labels,
            s(0),
            1,
            vec![None],
        );
        let err = Cfg::build(&program).expect_err("undefined");
        assert!(matches!(
            err,
            crate::error::RegexError::Internal(InternalError::UndefinedLabel(ref l)) if l == "s7"
        ));
    }

    #[test]
    fn test_predecessors_match_successors() {
        let cfg = cfg("(ab|cd)+e");
        for block in cfg.blocks() {
            for succ in cfg.successors(block.id) {
                assert!(cfg.predecessors(succ).expect("block").contains(&block.id));
            }
        }
    }

    #[test]
    fn test_dump_shows_edges() {
        let dump = cfg("ab").dump();
        assert!(dump.starts_with("s0 [b0] (entry) preds: -\n  0000  enter s0\n"), "{}", dump);
        assert!(dump.contains("  s0 -> s2 [b1]\n"), "{}", dump);
        assert!(dump.contains("  s0 -> fail ["), "{}", dump);
    }
}
