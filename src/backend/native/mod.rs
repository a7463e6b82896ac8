//! Native backend: scheduled graphs compiled to machine code with Cranelift.
//!
//! Each compilation owns a fresh `JITModule` with the runtime helpers
//! registered as symbols, so a [`NativeCode`] unit is self-contained and its
//! code memory is released when it is dropped.

pub mod codegen;
pub mod runtime;

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use tracing::{debug, trace};

use crate::cfg::{BlockId, Cfg};
use crate::error::{CompileError, Result};

use self::codegen::{CodegenContext, RuntimeFuncs, RuntimeRefs};
use self::runtime::{FrameState, NativeFrame, DEOPTIMIZE, NO_MATCH};
use super::{check_schedule, Backend, BackendKind, Compiled, Outcome, Span};

/// Signature of a compiled match attempt.
type MatchFn = unsafe extern "C" fn(*mut NativeFrame, i64) -> i64;

fn compile_error(message: impl Into<String>) -> crate::error::RegexError {
    CompileError::new(BackendKind::Native, message).into()
}

// =============================================================================
// Compiled code
// =============================================================================

pub struct NativeCode {
    /// Owns the code memory behind `function`
    module: Option<JITModule>,
    function: MatchFn,
    states: usize,
    resume_points: usize,
}

// Safety: the module is never touched after finalization except to free it
// on drop, and the finalized code is read-only.
unsafe impl Send for NativeCode {}

impl NativeCode {
    pub fn resume_points(&self) -> usize {
        self.resume_points
    }
}

impl std::fmt::Debug for NativeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeCode")
            .field("function", &format!("{:p}", self.function as *const ()))
            .field("states", &self.states)
            .field("resume_points", &self.resume_points)
            .finish()
    }
}

impl Drop for NativeCode {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // Safety: no reference to the compiled function outlives self
            unsafe { module.free_memory() };
        }
    }
}

impl Compiled for NativeCode {
    fn backend(&self) -> BackendKind {
        BackendKind::Native
    }

    fn execute(&self, subject: &[u32], captures: &mut [Option<usize>]) -> Result<Outcome> {
        let mut state = FrameState::new(self.states, subject.len(), captures.len());
        let mut frame = NativeFrame {
            subject: subject.as_ptr(),
            len: subject.len() as i64,
            resume_pos: 0,
            state: &mut state,
        };

        for start in 0..=subject.len() {
            // Safety: `frame` points at live subject and state for the call
            let result = unsafe { (self.function)(&mut frame, start as i64) };
            match result {
                NO_MATCH => continue,
                DEOPTIMIZE => return Ok(Outcome::Deoptimize),
                end if end >= start as i64 => {
                    let end = end as usize;
                    captures.copy_from_slice(&state.captures);
                    if let [begin, finish, ..] = captures {
                        *begin = Some(start);
                        *finish = Some(end);
                    }
                    return Ok(Outcome::Match(Span { start, end }));
                }
                other => {
                    return Err(compile_error(format!(
                        "compiled code returned {} at {}",
                        other, start
                    )))
                }
            }
        }
        captures.fill(None);
        Ok(Outcome::NoMatch)
    }
}

// =============================================================================
// Backend
// =============================================================================

#[derive(Debug, Default)]
pub struct NativeBackend {
    func_counter: usize,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_module() -> Result<JITModule> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| compile_error(format!("Failed to set opt_level: {}", e)))?;

        let isa_builder = cranelift_native::builder()
            .map_err(|e| compile_error(format!("Failed to create ISA builder: {}", e)))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| compile_error(format!("Failed to create ISA: {}", e)))?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        Self::register_runtime_symbols(&mut builder);
        Ok(JITModule::new(builder))
    }

    fn register_runtime_symbols(builder: &mut JITBuilder) {
        builder.symbol("rejit_runtime_visit", runtime::rejit_runtime_visit as *const u8);
        builder.symbol("rejit_runtime_push", runtime::rejit_runtime_push as *const u8);
        builder.symbol("rejit_runtime_capture", runtime::rejit_runtime_capture as *const u8);
        builder.symbol("rejit_runtime_pop", runtime::rejit_runtime_pop as *const u8);
        builder.symbol("rejit_runtime_classify", runtime::rejit_runtime_classify as *const u8);
    }

    fn declare_runtime_funcs(module: &mut JITModule) -> Result<RuntimeFuncs> {
        let mut declare = |name: &str, params: usize, returns: bool| -> Result<FuncId> {
            let mut sig = module.make_signature();
            for _ in 0..params {
                sig.params.push(AbiParam::new(types::I64));
            }
            if returns {
                sig.returns.push(AbiParam::new(types::I64));
            }
            module
                .declare_function(name, Linkage::Import, &sig)
                .map_err(|e| compile_error(format!("Failed to declare {}: {}", name, e)))
        };

        Ok(RuntimeFuncs {
            // visit: fn(frame, state, pos) -> fresh
            visit: declare("rejit_runtime_visit", 3, true)?,
            // push: fn(frame, resume, pos)
            push: declare("rejit_runtime_push", 3, false)?,
            // capture: fn(frame, slot, pos)
            capture: declare("rejit_runtime_capture", 3, false)?,
            // pop: fn(frame) -> resume id
            pop: declare("rejit_runtime_pop", 1, true)?,
            // classify: fn(cp, class) -> bool
            classify: declare("rejit_runtime_classify", 2, true)?,
        })
    }

    pub fn lower(&mut self, cfg: &Cfg, schedule: &[BlockId]) -> Result<NativeCode> {
        check_schedule(BackendKind::Native, cfg, schedule)?;

        let mut module = Self::make_module()?;
        let funcs = Self::declare_runtime_funcs(&mut module)?;

        let func_name = format!("rejit_match_{}", self.func_counter);
        self.func_counter += 1;

        // fn(*mut NativeFrame, start) -> end | NO_MATCH | DEOPTIMIZE
        let mut sig = module.make_signature();
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));

        let func_id = module
            .declare_function(&func_name, Linkage::Local, &sig)
            .map_err(|e| compile_error(format!("Failed to declare function: {}", e)))?;

        let mut ctx = module.make_context();
        ctx.func.signature = sig;

        let resume_points = {
            let mut func_ctx = FunctionBuilderContext::new();
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut func_ctx);
            let refs = RuntimeRefs {
                visit: module.declare_func_in_func(funcs.visit, builder.func),
                push: module.declare_func_in_func(funcs.push, builder.func),
                capture: module.declare_func_in_func(funcs.capture, builder.func),
                pop: module.declare_func_in_func(funcs.pop, builder.func),
                classify: module.declare_func_in_func(funcs.classify, builder.func),
            };

            let mut codegen = CodegenContext::new(&mut builder, refs, schedule);
            for (index, &id) in schedule.iter().enumerate() {
                codegen.emit_block(cfg, index, id)?;
            }
            let resume_points = codegen.resume_points();
            codegen.finish();
            builder.finalize();
            resume_points
        };

        trace!(target: "rejit::backend::native::ir", ir = %ctx.func.display(), "Generated IR");

        module
            .define_function(func_id, &mut ctx)
            .map_err(|e| compile_error(format!("Failed to define function: {}", e)))?;
        module.clear_context(&mut ctx);
        module
            .finalize_definitions()
            .map_err(|e| compile_error(format!("Failed to finalize definitions: {}", e)))?;

        let code_ptr = module.get_finalized_function(func_id);
        // Safety: the function was declared with exactly this signature
        let function = unsafe { std::mem::transmute::<*const u8, MatchFn>(code_ptr) };

        debug!(
            target: "rejit::backend::native",
            function = %func_name,
            blocks = schedule.len(),
            resume_points,
            "Compiled native matcher"
        );

        Ok(NativeCode {
            module: Some(module),
            function,
            states: cfg.state_count(),
            resume_points,
        })
    }
}

impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn compile(&mut self, cfg: &Cfg, schedule: &[BlockId]) -> Result<Box<dyn Compiled>> {
        Ok(Box::new(self.lower(cfg, schedule)?))
    }
}
