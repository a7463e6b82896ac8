//! Interpreters.
//!
//! [`BytecodeInterpreter`] walks the linear [`Program`] and is the tier every
//! pattern starts in; it can feed a [`Profile`]. [`InterpreterBackend`] is
//! the graph-level backend: it flattens a scheduled [`Cfg`] into per-block
//! instruction vectors with pre-resolved targets and dispatches block by
//! block.

use tracing::debug;

use crate::bytecode::{Instruction, Label, Program};
use crate::cfg::{BlockId, Cfg};
use crate::error::{CompileError, Result};
use crate::profile::Profile;

use super::exec::{self, Code, NoProbe, Probe};
use super::{check_schedule, Backend, BackendKind, Compiled, Outcome};

// =============================================================================
// Bytecode interpreter
// =============================================================================

pub struct BytecodeInterpreter<'p> {
    program: &'p Program,
    fail: usize,
}

impl<'p> BytecodeInterpreter<'p> {
    pub fn new(program: &'p Program) -> Result<Self> {
        program.validate()?;
        Ok(Self::prevalidated(program))
    }

    /// Wrap a program that already passed [`Program::validate`].
    pub(crate) fn prevalidated(program: &'p Program) -> Self {
        let fail = program
            .offset(Label::FAIL)
            .unwrap_or(program.len().saturating_sub(1));
        BytecodeInterpreter { program, fail }
    }

    pub fn execute(&self, subject: &[u32], captures: &mut [Option<usize>]) -> Outcome {
        exec::run(self, &mut NoProbe, subject, captures)
    }

    /// Execute and record branch outcomes into `profile`.
    pub fn execute_profiled(
        &self,
        subject: &[u32],
        captures: &mut [Option<usize>],
        profile: &mut Profile,
    ) -> Outcome {
        profile.record_invocation();
        exec::run(self, profile, subject, captures)
    }
}

impl Code for BytecodeInterpreter<'_> {
    type Pc = usize;

    #[inline]
    fn entry(&self) -> usize {
        self.program.offset(self.program.entry()).unwrap_or(self.fail)
    }

    #[inline]
    fn fetch(&self, pc: usize) -> &Instruction {
        &self.program.instructions()[pc]
    }

    #[inline]
    fn next(&self, pc: usize) -> usize {
        pc + 1
    }

    #[inline]
    fn target(&self, _pc: usize, label: Label) -> usize {
        self.program.offset(label).unwrap_or(self.fail)
    }

    fn state_count(&self) -> usize {
        self.program.state_count()
    }
}

impl Probe<usize> for Profile {
    #[inline]
    fn enter(&mut self, state: u32) {
        self.record_entry(state);
    }

    #[inline]
    fn exit(&mut self, pc: usize, taken: bool) {
        self.record_exit(pc, taken);
    }
}

// =============================================================================
// Graph interpreter
// =============================================================================

/// Position inside [`InterpretedCode`]: block index in schedule order and
/// instruction index inside the block.
pub type BlockPc = (u32, u32);

/// One block with its targets resolved to schedule indices.
#[derive(Debug, Clone)]
struct FlatBlock {
    instructions: Vec<Instruction>,
    targets: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct InterpretedCode {
    blocks: Vec<FlatBlock>,
    states: usize,
}

impl InterpretedCode {
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Code for InterpretedCode {
    type Pc = BlockPc;

    #[inline]
    fn entry(&self) -> BlockPc {
        (0, 0)
    }

    #[inline]
    fn fetch(&self, (block, index): BlockPc) -> &Instruction {
        &self.blocks[block as usize].instructions[index as usize]
    }

    #[inline]
    fn next(&self, (block, index): BlockPc) -> BlockPc {
        (block, index + 1)
    }

    #[inline]
    fn target(&self, (block, index): BlockPc, _label: Label) -> BlockPc {
        (self.blocks[block as usize].targets[index as usize], 0)
    }

    fn state_count(&self) -> usize {
        self.states
    }
}

impl Compiled for InterpretedCode {
    fn backend(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn execute(&self, subject: &[u32], captures: &mut [Option<usize>]) -> Result<Outcome> {
        Ok(exec::run(self, &mut NoProbe, subject, captures))
    }
}

#[derive(Debug, Default)]
pub struct InterpreterBackend;

impl InterpreterBackend {
    pub fn new() -> Self {
        InterpreterBackend
    }

    /// Flatten `cfg` without boxing, for callers that want the concrete type.
    pub fn lower(&self, cfg: &Cfg, schedule: &[BlockId]) -> Result<InterpretedCode> {
        check_schedule(BackendKind::Interpreter, cfg, schedule)?;

        let index_of = |label: Label| -> Result<u32> {
            cfg.block_for(label)
                .and_then(|id| schedule.iter().position(|&b| b == id))
                .map(|i| i as u32)
                .ok_or_else(|| {
                    CompileError::new(
                        BackendKind::Interpreter,
                        format!("undefined label {}", label),
                    )
                    .into()
                })
        };

        let mut blocks = Vec::with_capacity(schedule.len());
        for &id in schedule {
            let Some(block) = cfg.block(id) else {
                return Err(
                    CompileError::new(BackendKind::Interpreter, format!("missing {}", id)).into(),
                );
            };
            let mut instructions = Vec::with_capacity(block.instructions.len());
            let mut targets = Vec::with_capacity(block.instructions.len());
            for i in &block.instructions {
                targets.push(match i.instruction.target() {
                    Some(label) => index_of(label)?,
                    None => u32::MAX,
                });
                instructions.push(i.instruction.clone());
            }
            blocks.push(FlatBlock {
                instructions,
                targets,
            });
        }

        debug!(
            target: "rejit::backend::interpreter",
            blocks = blocks.len(),
            "Lowered graph for interpretation"
        );
        Ok(InterpretedCode {
            blocks,
            states: cfg.state_count(),
        })
    }
}

impl Backend for InterpreterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn compile(&mut self, cfg: &Cfg, schedule: &[BlockId]) -> Result<Box<dyn Compiled>> {
        Ok(Box::new(self.lower(cfg, schedule)?))
    }
}
