//! Adaptive execution: profile, compile, speculate, deoptimize.
//!
//! ```text
//! Interpreting { budget }  --budget reaches 0-->  Compiled / Speculative
//!        ^                                              |
//!        +------------- Outcome::Deoptimize ------------+
//! ```
//!
//! A pattern starts in the profiling bytecode interpreter. Each call spends
//! one unit of budget; when the budget is exhausted the program is lowered
//! to a graph, optimized, scheduled and compiled with the configured
//! backend. In speculative mode exits the profile never saw taken are
//! replaced with deoptimization points. Hitting one reinstalls the
//! interpreter with a fresh budget and the call is retried there.
//!
//! Every transition goes through [`Controller::install`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::backend::{backend_for, BackendKind, BytecodeInterpreter, Compiled, Outcome};
use crate::bytecode::Program;
use crate::cfg::{
    Cfg, DeadBlockElimination, DiscoveryOrder, FallthroughOrder, Scheduler,
    UncommonBranchElimination,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::profile::Profile;

/// What a call to the pattern currently runs.
pub enum EntryPoint {
    /// Profiling bytecode interpreter; `budget` calls left before compiling
    Interpreting { budget: u32 },

    /// Compiled without speculation, never deoptimizes
    Compiled(Box<dyn Compiled>),

    /// Compiled with uncommon exits redirected to deoptimization points
    Speculative(Box<dyn Compiled>),
}

impl EntryPoint {
    pub fn state(&self) -> ControllerState {
        match self {
            EntryPoint::Interpreting { budget } => ControllerState::Interpreting { budget: *budget },
            EntryPoint::Compiled(code) => ControllerState::Compiled(code.backend()),
            EntryPoint::Speculative(code) => ControllerState::Speculative(code.backend()),
        }
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.state(), f)
    }
}

/// Observable summary of an [`EntryPoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Interpreting { budget: u32 },
    Compiled(BackendKind),
    Speculative(BackendKind),
}

impl ControllerState {
    pub fn is_compiled(&self) -> bool {
        !matches!(self, ControllerState::Interpreting { .. })
    }
}

/// Transition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hooks {
    /// Compiled units installed
    pub compiled: u64,

    /// Speculative units abandoned after reaching a deoptimization point
    pub deoptimized: u64,
}

// =============================================================================
// Compilation pipeline
// =============================================================================

/// Lower `program` to a graph, optimize and schedule it, and compile it
/// with `kind`.
///
/// With a profile the pass list includes uncommon-branch elimination, so the
/// result may return [`Outcome::Deoptimize`].
pub fn compile_program(
    program: &Program,
    profile: Option<&Profile>,
    kind: BackendKind,
    optimize_layout: bool,
) -> Result<Box<dyn Compiled>> {
    let mut cfg = Cfg::build(program)?;

    let dce = DeadBlockElimination::new().run(&mut cfg).clone();
    debug!(
        target: "rejit::adaptive",
        removed = dce.blocks_removed,
        blocks = cfg.len(),
        "Dead block elimination"
    );

    if let Some(profile) = profile {
        let mut ube = UncommonBranchElimination::new(profile);
        let stats = ube.run(&mut cfg);
        debug!(
            target: "rejit::adaptive",
            redirected = stats.exits_redirected,
            removed = stats.dce.blocks_removed,
            blocks = cfg.len(),
            "Uncommon branch elimination"
        );
    }

    let schedule = if optimize_layout {
        FallthroughOrder.schedule(&cfg)
    } else {
        DiscoveryOrder.schedule(&cfg)
    };

    backend_for(kind).compile(&cfg, &schedule)
}

// =============================================================================
// Controller
// =============================================================================

pub struct Controller {
    program: Arc<Program>,
    profile: Profile,
    entry: EntryPoint,
    hooks: Hooks,
    config: EngineConfig,
}

impl Controller {
    pub fn new(program: Arc<Program>, config: EngineConfig) -> Result<Self> {
        program.validate()?;
        let profile = Profile::new(&program);
        Ok(Controller {
            entry: EntryPoint::Interpreting {
                budget: config.threshold,
            },
            program,
            profile,
            hooks: Hooks::default(),
            config,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn hooks(&self) -> Hooks {
        self.hooks
    }

    pub fn state(&self) -> ControllerState {
        self.entry.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The only place the entry point changes.
    pub fn install(&mut self, entry: EntryPoint) {
        if self.config.trace {
            trace!(
                target: "rejit::adaptive",
                from = ?self.entry.state(),
                to = ?entry.state(),
                "Install entry point"
            );
        }
        self.entry = entry;
    }

    /// Compile with `kind` now, without speculation.
    pub fn compile(&mut self, kind: BackendKind) -> Result<()> {
        let code = compile_program(&self.program, None, kind, self.config.optimize_layout)?;
        self.install(EntryPoint::Compiled(code));
        self.profile.reset();
        self.hooks.compiled += 1;
        info!(target: "rejit::adaptive", backend = %kind, "Compiled on request");
        Ok(())
    }

    /// Restart profiling with new settings. The next `threshold` calls are
    /// interpreted.
    pub fn profile_with(&mut self, kind: BackendKind, threshold: u32, speculative: bool) {
        self.config.backend = kind;
        self.config.threshold = threshold;
        self.config.speculative = speculative;
        self.profile.reset();
        self.install(EntryPoint::Interpreting { budget: threshold });
    }

    /// Run one search, transitioning tiers as needed.
    pub fn execute(&mut self, subject: &[u32], captures: &mut [Option<usize>]) -> Result<Outcome> {
        loop {
            let outcome = match &self.entry {
                EntryPoint::Interpreting { budget: 0 } => {
                    self.promote()?;
                    continue;
                }
                EntryPoint::Interpreting { budget } => {
                    let budget = *budget - 1;
                    if self.config.trace {
                        trace!(target: "rejit::adaptive", budget, "Interpreting");
                    }
                    let outcome = BytecodeInterpreter::prevalidated(&self.program).execute_profiled(
                        subject,
                        captures,
                        &mut self.profile,
                    );
                    self.install(EntryPoint::Interpreting { budget });
                    if budget == 0 {
                        self.promote()?;
                    }
                    return Ok(outcome);
                }
                EntryPoint::Compiled(code) | EntryPoint::Speculative(code) => {
                    code.execute(subject, captures)?
                }
            };

            match outcome {
                Outcome::Deoptimize => self.deoptimize(),
                outcome => return Ok(outcome),
            }
        }
    }

    fn promote(&mut self) -> Result<()> {
        // Speculating on an empty profile would deoptimize on every input.
        let speculate = self.config.speculative && self.profile.invocations() > 0;
        let profile = speculate.then_some(&self.profile);
        let code = compile_program(
            &self.program,
            profile,
            self.config.backend,
            self.config.optimize_layout,
        )?;

        let entry = if speculate {
            EntryPoint::Speculative(code)
        } else {
            EntryPoint::Compiled(code)
        };
        self.install(entry);
        self.profile.reset();
        self.hooks.compiled += 1;
        info!(
            target: "rejit::adaptive",
            backend = %self.config.backend,
            speculative = speculate,
            compiled = self.hooks.compiled,
            "Promoted to compiled code"
        );
        Ok(())
    }

    fn deoptimize(&mut self) {
        self.install(EntryPoint::Interpreting {
            budget: self.config.threshold,
        });
        self.hooks.deoptimized += 1;
        info!(
            target: "rejit::adaptive",
            deoptimized = self.hooks.deoptimized,
            "Deoptimized to the interpreter"
        );
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("entry", &self.entry)
            .field("hooks", &self.hooks)
            .field("config", &self.config)
            .finish()
    }
}
