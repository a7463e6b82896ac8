//! Cranelift IR generation for scheduled graphs.
//!
//! The generated function has the signature
//! `fn(frame: *mut NativeFrame, start: i64) -> i64` and performs one match
//! attempt from `start`. It returns the match end, [`NO_MATCH`] once the
//! backtrack stack is exhausted, or [`DEOPTIMIZE`].
//!
//! Layout:
//!
//! - one Cranelift block per graph block, taking the position as its only
//!   parameter;
//! - every alternative splits its block: the fall-through continues in a
//!   fresh block (position parameter), and, when a resume point is needed, a
//!   parameterless resume block reloads the position from the frame and
//!   jumps to the fall-through;
//! - a shared backtrack block calls `rejit_runtime_pop` and dispatches on
//!   the returned resume id with a [`Switch`]. Switch edges carry no block
//!   arguments, which is why resume blocks reload the position.

use cranelift::codegen::ir::{BlockArg, FuncRef};
use cranelift::prelude::*;
use cranelift_frontend::Switch;
use cranelift_module::FuncId;

use crate::backend::exec::capture_slot;
use crate::backend::BackendKind;
use crate::bytecode::{Instruction, Label};
use crate::cfg::{BlockId, Cfg};
use crate::error::{CompileError, Result};

use super::runtime::{DEOPTIMIZE, LEN_OFFSET, NO_MATCH, RESUME_POS_OFFSET, SUBJECT_OFFSET};

/// Runtime helpers imported into the generated function.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeFuncs {
    pub visit: FuncId,
    pub push: FuncId,
    pub capture: FuncId,
    pub pop: FuncId,
    pub classify: FuncId,
}

/// Helper references resolved inside one function.
#[derive(Clone, Copy)]
pub struct RuntimeRefs {
    pub visit: FuncRef,
    pub push: FuncRef,
    pub capture: FuncRef,
    pub pop: FuncRef,
    pub classify: FuncRef,
}

fn error(message: impl Into<String>) -> crate::error::RegexError {
    CompileError::new(BackendKind::Native, message).into()
}

/// IR emitter for one scheduled graph.
pub struct CodegenContext<'a, 'b> {
    pub builder: &'a mut FunctionBuilder<'b>,
    refs: RuntimeRefs,

    /// Pointer to the `NativeFrame`
    frame: Value,
    subject: Value,
    len: Value,

    /// Entry block of every graph block, indexed by schedule position
    blocks: Vec<Block>,
    /// Graph block id → schedule position
    positions: Vec<(BlockId, usize)>,
    backtrack: Block,
    /// Resume blocks in resume-id order, each with the fall-through block
    /// it continues in
    resumes: Vec<(Block, Block)>,
}

impl<'a, 'b> CodegenContext<'a, 'b> {
    /// Emit the function prologue and create one block per graph block.
    pub fn new(
        builder: &'a mut FunctionBuilder<'b>,
        refs: RuntimeRefs,
        schedule: &[BlockId],
    ) -> Self {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        let frame = builder.block_params(entry)[0];
        let start = builder.block_params(entry)[1];

        let subject = builder
            .ins()
            .load(types::I64, MemFlags::trusted(), frame, SUBJECT_OFFSET);
        let len = builder
            .ins()
            .load(types::I64, MemFlags::trusted(), frame, LEN_OFFSET);

        let blocks: Vec<Block> = schedule
            .iter()
            .map(|_| {
                let block = builder.create_block();
                builder.append_block_param(block, types::I64);
                block
            })
            .collect();
        let backtrack = builder.create_block();

        if let Some(&first) = blocks.first() {
            builder.ins().jump(first, &[BlockArg::Value(start)]);
        } else {
            let none = builder.ins().iconst(types::I64, NO_MATCH);
            builder.ins().return_(&[none]);
        }

        CodegenContext {
            builder,
            refs,
            frame,
            subject,
            len,
            blocks,
            positions: schedule.iter().enumerate().map(|(i, &id)| (id, i)).collect(),
            backtrack,
            resumes: Vec::new(),
        }
    }

    fn block_of(&self, cfg: &Cfg, label: Label) -> Result<Block> {
        let id = cfg
            .block_for(label)
            .ok_or_else(|| error(format!("undefined label {}", label)))?;
        self.positions
            .iter()
            .find(|(b, _)| *b == id)
            .map(|&(_, i)| self.blocks[i])
            .ok_or_else(|| error(format!("{} is not scheduled", id)))
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Emit the instructions of the graph block at schedule position `index`.
    pub fn emit_block(&mut self, cfg: &Cfg, index: usize, id: BlockId) -> Result<()> {
        let block = cfg
            .block(id)
            .ok_or_else(|| error(format!("missing {}", id)))?;
        let head = self.blocks[index];
        self.builder.switch_to_block(head);
        let mut pos = self.builder.block_params(head)[0];

        for (i, ci) in block.instructions.iter().enumerate() {
            let needs_resume = block
                .instructions
                .get(i + 1)
                .is_some_and(|next| !next.instruction.is_fail_jump());
            match self.emit_instruction(cfg, &ci.instruction, pos, needs_resume)? {
                Some(next) => pos = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Per-instruction templates. Returns the position value of the
    /// fall-through block, or `None` after a terminator.
    fn emit_instruction(
        &mut self,
        cfg: &Cfg,
        instruction: &Instruction,
        pos: Value,
        needs_resume: bool,
    ) -> Result<Option<Value>> {
        match instruction {
            Instruction::Enter { state } => {
                let state = self.builder.ins().iconst(types::I64, *state as i64);
                let call = self
                    .builder
                    .ins()
                    .call(self.refs.visit, &[self.frame, state, pos]);
                let fresh = self.builder.inst_results(call)[0];
                let (cont, next) = self.continuation();
                self.builder
                    .ins()
                    .brif(fresh, cont, &[BlockArg::Value(pos)], self.backtrack, &[]);
                self.builder.switch_to_block(cont);
                Ok(Some(next))
            }

            Instruction::Jump { target } => {
                let target = self.block_of(cfg, *target)?;
                self.builder.ins().jump(target, &[BlockArg::Value(pos)]);
                Ok(None)
            }

            Instruction::Match => {
                self.builder.ins().return_(&[pos]);
                Ok(None)
            }

            Instruction::Fail => {
                self.builder.ins().jump(self.backtrack, &[]);
                Ok(None)
            }

            Instruction::Deoptimize => {
                let signal = self.builder.ins().iconst(types::I64, DEOPTIMIZE);
                self.builder.ins().return_(&[signal]);
                Ok(None)
            }

            _ => {
                let target = instruction
                    .target()
                    .ok_or_else(|| error(format!("{} has no target", instruction)))?;
                let target = self.block_of(cfg, target)?;
                self.emit_alternative(instruction, pos, target, needs_resume)
                    .map(Some)
            }
        }
    }

    /// Fresh fall-through block and its position parameter.
    fn continuation(&mut self) -> (Block, Value) {
        let cont = self.builder.create_block();
        let next = self.builder.append_block_param(cont, types::I64);
        (cont, next)
    }

    fn emit_alternative(
        &mut self,
        instruction: &Instruction,
        pos: Value,
        target: Block,
        needs_resume: bool,
    ) -> Result<Value> {
        let (cont, next) = self.continuation();
        let taken = self.builder.create_block();

        // Test: branch to `taken` when it holds, to `cont` otherwise
        let advance = match instruction {
            Instruction::Begin { .. } => {
                let holds = self.builder.ins().icmp_imm(IntCC::Equal, pos, 0);
                self.branch(holds, taken, cont, pos);
                0
            }
            Instruction::End { .. } => {
                let holds = self.builder.ins().icmp(IntCC::Equal, pos, self.len);
                self.branch(holds, taken, cont, pos);
                0
            }
            Instruction::Any { .. } => {
                let holds = self
                    .builder
                    .ins()
                    .icmp(IntCC::UnsignedLessThan, pos, self.len);
                self.branch(holds, taken, cont, pos);
                1
            }
            Instruction::Read { value, .. } => {
                let c = self.load_char(pos, 0, cont, pos);
                let holds = self.builder.ins().icmp_imm(IntCC::Equal, c, *value as i64);
                self.branch(holds, taken, cont, pos);
                1
            }
            Instruction::Range { low, high, .. } => {
                let c = self.load_char(pos, 0, cont, pos);
                let holds = self.in_range(c, *low, *high);
                self.branch(holds, taken, cont, pos);
                1
            }
            Instruction::Exclude { items, .. } => {
                let c = self.load_char(pos, 0, cont, pos);
                let mut inside = self.builder.ins().iconst(types::I8, 0);
                for &(low, high) in items.iter() {
                    let hit = self.in_range(c, low, high);
                    inside = self.builder.ins().bor(inside, hit);
                }
                let holds = self.builder.ins().icmp_imm(IntCC::Equal, inside, 0);
                self.branch(holds, taken, cont, pos);
                1
            }
            Instruction::Type { class, .. } => {
                let c = self.load_char(pos, 0, cont, pos);
                let class = self.builder.ins().iconst(types::I64, class.id() as i64);
                let call = self.builder.ins().call(self.refs.classify, &[c, class]);
                let result = self.builder.inst_results(call)[0];
                let holds = self.builder.ins().icmp_imm(IntCC::NotEqual, result, 0);
                self.branch(holds, taken, cont, pos);
                1
            }
            Instruction::Lookahead {
                literal, negated, ..
            } => {
                let (on_match, on_mismatch) = if *negated {
                    (None, Some(taken))
                } else {
                    (Some(taken), None)
                };
                self.emit_literal(literal, pos, on_match, on_mismatch, cont);
                0
            }
            Instruction::CaptureStart { .. }
            | Instruction::CaptureEnd { .. }
            | Instruction::Split { .. } => {
                self.builder.ins().jump(taken, &[]);
                0
            }
            Instruction::Enter { .. }
            | Instruction::Jump { .. }
            | Instruction::Match
            | Instruction::Fail
            | Instruction::Deoptimize => {
                return Err(error(format!("{} is not an alternative", instruction)))
            }
        };

        // Taken path: record the resume point and capture, then transfer
        self.builder.switch_to_block(taken);
        if needs_resume {
            let resume = self.builder.create_block();
            let id = self.resumes.len() as i64;
            self.resumes.push((resume, cont));
            let id = self.builder.ins().iconst(types::I64, id);
            self.builder
                .ins()
                .call(self.refs.push, &[self.frame, id, pos]);
        }
        if let Some(slot) = capture_slot(instruction) {
            let slot = self.builder.ins().iconst(types::I64, slot as i64);
            self.builder
                .ins()
                .call(self.refs.capture, &[self.frame, slot, pos]);
        }
        let after = if advance == 0 {
            pos
        } else {
            self.builder.ins().iadd_imm(pos, advance)
        };
        self.builder.ins().jump(target, &[BlockArg::Value(after)]);

        self.builder.switch_to_block(cont);
        Ok(next)
    }

    fn branch(&mut self, holds: Value, taken: Block, cont: Block, pos: Value) {
        self.builder
            .ins()
            .brif(holds, taken, &[], cont, &[BlockArg::Value(pos)]);
    }

    fn in_range(&mut self, c: Value, low: u32, high: u32) -> Value {
        if low == high {
            return self.builder.ins().icmp_imm(IntCC::Equal, c, low as i64);
        }
        let above = self
            .builder
            .ins()
            .icmp_imm(IntCC::UnsignedGreaterThanOrEqual, c, low as i64);
        let below = self
            .builder
            .ins()
            .icmp_imm(IntCC::UnsignedLessThanOrEqual, c, high as i64);
        self.builder.ins().band(above, below)
    }

    /// Load the codepoint at `pos + offset`, branching to `out_of_bounds`
    /// (with `fallback` as its position argument) past the end. Leaves the
    /// builder in the in-bounds block.
    fn load_char(&mut self, pos: Value, offset: i64, out_of_bounds: Block, fallback: Value) -> Value {
        let index = if offset == 0 {
            pos
        } else {
            self.builder.ins().iadd_imm(pos, offset)
        };
        let in_bounds = self
            .builder
            .ins()
            .icmp(IntCC::UnsignedLessThan, index, self.len);
        let load = self.builder.create_block();
        self.builder.ins().brif(
            in_bounds,
            load,
            &[],
            out_of_bounds,
            &[BlockArg::Value(fallback)],
        );

        self.builder.switch_to_block(load);
        let byte_offset = self.builder.ins().ishl_imm(index, 2);
        let address = self.builder.ins().iadd(self.subject, byte_offset);
        let c = self
            .builder
            .ins()
            .load(types::I32, MemFlags::trusted(), address, 0);
        self.builder.ins().uextend(types::I64, c)
    }

    /// Compare `literal` against the subject at `pos`. Control reaches
    /// `on_match` when every codepoint matches and `on_mismatch` otherwise;
    /// `None` means the fall-through `cont` block.
    fn emit_literal(
        &mut self,
        literal: &[u32],
        pos: Value,
        on_match: Option<Block>,
        on_mismatch: Option<Block>,
        cont: Block,
    ) {
        let matched = self.builder.create_block();
        let mismatched = self.builder.create_block();

        for (k, &expected) in literal.iter().enumerate() {
            let checked = self.builder.create_block();
            let c = self.load_char_or(pos, k as i64, mismatched);
            let equal = self.builder.ins().icmp_imm(IntCC::Equal, c, expected as i64);
            self.builder
                .ins()
                .brif(equal, checked, &[], mismatched, &[]);
            self.builder.switch_to_block(checked);
        }
        self.builder.ins().jump(matched, &[]);

        for (block, exit) in [(matched, on_match), (mismatched, on_mismatch)] {
            self.builder.switch_to_block(block);
            match exit {
                Some(target) => self.builder.ins().jump(target, &[]),
                None => self.builder.ins().jump(cont, &[BlockArg::Value(pos)]),
            };
        }
    }

    /// Like [`Self::load_char`] for a parameterless out-of-bounds block.
    fn load_char_or(&mut self, pos: Value, offset: i64, out_of_bounds: Block) -> Value {
        let index = self.builder.ins().iadd_imm(pos, offset);
        let in_bounds = self
            .builder
            .ins()
            .icmp(IntCC::UnsignedLessThan, index, self.len);
        let load = self.builder.create_block();
        self.builder
            .ins()
            .brif(in_bounds, load, &[], out_of_bounds, &[]);

        self.builder.switch_to_block(load);
        let byte_offset = self.builder.ins().ishl_imm(index, 2);
        let address = self.builder.ins().iadd(self.subject, byte_offset);
        let c = self
            .builder
            .ins()
            .load(types::I32, MemFlags::trusted(), address, 0);
        self.builder.ins().uextend(types::I64, c)
    }

    // =========================================================================
    // Backtracking
    // =========================================================================

    /// Emit the shared backtrack block and seal everything.
    pub fn finish(self) {
        let exhausted = self.builder.create_block();
        let dispatch = self.builder.create_block();

        self.builder.switch_to_block(self.backtrack);
        let call = self.builder.ins().call(self.refs.pop, &[self.frame]);
        let resume = self.builder.inst_results(call)[0];
        let empty = self
            .builder
            .ins()
            .icmp_imm(IntCC::SignedLessThan, resume, 0);
        self.builder.ins().brif(empty, exhausted, &[], dispatch, &[]);

        self.builder.switch_to_block(dispatch);
        let mut switch = Switch::new();
        for (id, &(block, _)) in self.resumes.iter().enumerate() {
            switch.set_entry(id as u128, block);
        }
        switch.emit(self.builder, resume, exhausted);

        self.builder.switch_to_block(exhausted);
        let none = self.builder.ins().iconst(types::I64, NO_MATCH);
        self.builder.ins().return_(&[none]);

        for &(block, cont) in &self.resumes {
            self.builder.switch_to_block(block);
            let resumed = self.builder.ins().load(
                types::I64,
                MemFlags::trusted(),
                self.frame,
                RESUME_POS_OFFSET,
            );
            self.builder.ins().jump(cont, &[BlockArg::Value(resumed)]);
        }

        self.builder.seal_all_blocks();
    }

    pub fn resume_points(&self) -> usize {
        self.resumes.len()
    }
}
