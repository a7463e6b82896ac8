//! Source-level backend.
//!
//! Every instruction kind has a source template. Code generation renders the
//! templates of a scheduled graph into a Rust-like listing (kept for
//! inspection via [`ClosureCode::source`]) and, in lockstep, instantiates the
//! closure that implements each template. Blocks become vectors of boxed
//! closures; a threaded loop runs them, each closure returning the next
//! control transfer.
//!
//! ```text
//! block 0 /* b0 s0 */ {
//!     if !t.visit(0) { return Fail; }
//!     if t.peek() == Some(97) { t.take(None, None, t.pos + 1); return Goto(1); }
//!     return Goto(3);
//! }
//! ```

use std::fmt;

use tracing::debug;

use crate::bytecode::{Instruction, Label};
use crate::cfg::{BlockId, Cfg};
use crate::error::{CompileError, Result};
use crate::unicode::classify;

use super::exec::{capture_slot, Backtrack, Visited};
use super::{check_schedule, Backend, BackendKind, Compiled, Outcome, Span};

// =============================================================================
// Runtime
// =============================================================================

type Pc = (u32, u32);

/// Control transfer returned by every closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Next,
    Goto(u32),
    Fail,
    Match,
    Deoptimize,
}

/// Mutable matcher state threaded through the closures.
pub struct Thread<'s> {
    subject: &'s [u32],
    pub pos: usize,
    captures: &'s mut [Option<usize>],
    stack: Backtrack<Pc>,
    visited: Visited,
}

impl Thread<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.subject.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subject.is_empty()
    }

    #[inline]
    pub fn peek(&self) -> Option<u32> {
        self.subject.get(self.pos).copied()
    }

    #[inline]
    pub fn rest(&self) -> &[u32] {
        &self.subject[self.pos.min(self.subject.len())..]
    }

    #[inline]
    pub fn visit(&mut self, state: u32) -> bool {
        self.visited.insert(state, self.pos)
    }

    /// Take an alternative: record the resume point and the capture write,
    /// then move to `after`.
    #[inline]
    pub fn take(&mut self, resume: Option<Pc>, slot: Option<usize>, after: usize) {
        if let Some(at) = resume {
            self.stack.push_resume(at, self.pos);
        }
        if let Some(slot) = slot {
            if let Some(value) = self.captures.get_mut(slot) {
                self.stack.push_restore(slot, *value);
                *value = Some(self.pos);
            }
        }
        self.pos = after;
    }
}

type Op = Box<dyn Fn(&mut Thread<'_>) -> Control + Send + Sync>;

// =============================================================================
// Templates
// =============================================================================

fn template(instruction: &Instruction) -> &'static str {
    match instruction {
        Instruction::Enter { .. } => "if !t.visit({state}) { return Fail; }",
        Instruction::Begin { .. } => {
            "if t.pos == 0 { t.take({resume}, None, t.pos); return Goto({target}); }"
        }
        Instruction::End { .. } => {
            "if t.pos == t.len() { t.take({resume}, None, t.pos); return Goto({target}); }"
        }
        Instruction::Any { .. } => {
            "if t.pos < t.len() { t.take({resume}, None, t.pos + 1); return Goto({target}); }"
        }
        Instruction::Read { .. } => {
            "if t.peek() == Some({value}) { t.take({resume}, None, t.pos + 1); return Goto({target}); }"
        }
        Instruction::Range { .. } => {
            "if matches!(t.peek(), Some({low}..={high})) { t.take({resume}, None, t.pos + 1); return Goto({target}); }"
        }
        Instruction::Exclude { .. } => {
            "if matches!(t.peek(), Some(c) if !in_any(c, &[{items}])) { t.take({resume}, None, t.pos + 1); return Goto({target}); }"
        }
        Instruction::Type { .. } => {
            "if matches!(t.peek(), Some(c) if classify(c, {class})) { t.take({resume}, None, t.pos + 1); return Goto({target}); }"
        }
        Instruction::Lookahead { negated: false, .. } => {
            "if t.rest().starts_with(&[{literal}]) { t.take({resume}, None, t.pos); return Goto({target}); }"
        }
        Instruction::Lookahead { negated: true, .. } => {
            "if !t.rest().starts_with(&[{literal}]) { t.take({resume}, None, t.pos); return Goto({target}); }"
        }
        Instruction::CaptureStart { .. } | Instruction::CaptureEnd { .. } => {
            "t.take({resume}, Some({slot}), t.pos); return Goto({target});"
        }
        Instruction::Split { .. } => "t.take({resume}, None, t.pos); return Goto({target});",
        Instruction::Jump { .. } => "return Goto({target});",
        Instruction::Match => "return Match;",
        Instruction::Fail => "return Fail;",
        Instruction::Deoptimize => "return Deoptimize;",
    }
}

fn render(template: &str, bindings: &[(&str, String)]) -> String {
    let mut line = template.to_string();
    for (name, value) in bindings {
        line = line.replace(&format!("{{{}}}", name), value);
    }
    line
}

fn join<T: fmt::Display>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Operands of one instruction as template bindings.
fn bindings(instruction: &Instruction, resume: Option<Pc>, target: u32) -> Vec<(&'static str, String)> {
    let mut b = vec![
        (
            "resume",
            match resume {
                Some((block, index)) => format!("Some(({}, {}))", block, index),
                None => "None".to_string(),
            },
        ),
        ("target", target.to_string()),
    ];
    match instruction {
        Instruction::Enter { state } => b.push(("state", state.to_string())),
        Instruction::Read { value, .. } => b.push(("value", value.to_string())),
        Instruction::Range { low, high, .. } => {
            b.push(("low", low.to_string()));
            b.push(("high", high.to_string()));
        }
        Instruction::Exclude { items, .. } => b.push((
            "items",
            join(items.iter().map(|(lo, hi)| format!("({}, {})", lo, hi))),
        )),
        Instruction::Type { class, .. } => b.push(("class", format!("CharType::{:?}", class))),
        Instruction::Lookahead { literal, .. } => b.push(("literal", join(literal.iter()))),
        _ => {}
    }
    if let Some(slot) = capture_slot(instruction) {
        b.push(("slot", slot.to_string()));
    }
    b
}

// =============================================================================
// Closure constructors
// =============================================================================

/// Closure for an alternative whose test is `test`.
fn alternative<F>(test: F, resume: Option<Pc>, slot: Option<usize>, goto: u32) -> Op
where
    F: Fn(&[u32], usize) -> Option<usize> + Send + Sync + 'static,
{
    Box::new(move |t: &mut Thread<'_>| match test(t.subject, t.pos) {
        Some(after) => {
            t.take(resume, slot, after);
            Control::Goto(goto)
        }
        None => Control::Next,
    })
}

fn step(instruction: &Instruction, resume: Option<Pc>, goto: u32) -> Op {
    match instruction.clone() {
        Instruction::Enter { state } => Box::new(move |t: &mut Thread<'_>| {
            if t.visit(state) {
                Control::Next
            } else {
                Control::Fail
            }
        }),
        Instruction::Begin { .. } => {
            alternative(|_, pos| (pos == 0).then_some(pos), resume, None, goto)
        }
        Instruction::End { .. } => alternative(
            |s: &[u32], pos| (pos == s.len()).then_some(pos),
            resume,
            None,
            goto,
        ),
        Instruction::Any { .. } => alternative(
            |s: &[u32], pos| (pos < s.len()).then_some(pos + 1),
            resume,
            None,
            goto,
        ),
        Instruction::Read { value, .. } => alternative(
            move |s: &[u32], pos| (s.get(pos) == Some(&value)).then_some(pos + 1),
            resume,
            None,
            goto,
        ),
        Instruction::Range { low, high, .. } => alternative(
            move |s: &[u32], pos| {
                s.get(pos)
                    .filter(|c| (low..=high).contains(*c))
                    .map(|_| pos + 1)
            },
            resume,
            None,
            goto,
        ),
        Instruction::Exclude { items, .. } => alternative(
            move |s: &[u32], pos| {
                s.get(pos)
                    .filter(|c| !items.iter().any(|&(lo, hi)| (lo..=hi).contains(*c)))
                    .map(|_| pos + 1)
            },
            resume,
            None,
            goto,
        ),
        Instruction::Type { class, .. } => alternative(
            move |s: &[u32], pos| {
                s.get(pos)
                    .filter(|&&c| classify(c, class))
                    .map(|_| pos + 1)
            },
            resume,
            None,
            goto,
        ),
        Instruction::Lookahead {
            literal, negated, ..
        } => alternative(
            move |s: &[u32], pos| {
                (s[pos.min(s.len())..].starts_with(&literal) != negated).then_some(pos)
            },
            resume,
            None,
            goto,
        ),
        marker @ (Instruction::CaptureStart { .. } | Instruction::CaptureEnd { .. }) => {
            alternative(|_, pos| Some(pos), resume, capture_slot(&marker), goto)
        }
        Instruction::Split { .. } => alternative(|_, pos| Some(pos), resume, None, goto),
        Instruction::Jump { .. } => Box::new(move |_: &mut Thread<'_>| Control::Goto(goto)),
        Instruction::Match => Box::new(|_: &mut Thread<'_>| Control::Match),
        Instruction::Fail => Box::new(|_: &mut Thread<'_>| Control::Fail),
        Instruction::Deoptimize => Box::new(|_: &mut Thread<'_>| Control::Deoptimize),
    }
}

// =============================================================================
// Compiled code
// =============================================================================

pub struct ClosureCode {
    blocks: Vec<Vec<Op>>,
    source: String,
    states: usize,
}

impl ClosureCode {
    /// Listing the closures were generated from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for ClosureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureCode")
            .field("blocks", &self.blocks.len())
            .field("states", &self.states)
            .finish()
    }
}

impl Compiled for ClosureCode {
    fn backend(&self) -> BackendKind {
        BackendKind::Closure
    }

    fn execute(&self, subject: &[u32], captures: &mut [Option<usize>]) -> Result<Outcome> {
        captures.fill(None);
        let mut t = Thread {
            subject,
            pos: 0,
            captures,
            stack: Backtrack::new(),
            visited: Visited::new(self.states, subject.len()),
        };

        for start in 0..=subject.len() {
            t.pos = start;
            let (mut block, mut index) = (0u32, 0u32);
            loop {
                let op = &self.blocks[block as usize][index as usize];
                match op(&mut t) {
                    Control::Next => index += 1,
                    Control::Goto(next) => {
                        block = next;
                        index = 0;
                    }
                    Control::Fail => match t.stack.pop(t.captures) {
                        Some(((b, i), pos)) => {
                            block = b;
                            index = i;
                            t.pos = pos;
                        }
                        None => break,
                    },
                    Control::Match => {
                        if let [begin, end, ..] = &mut t.captures[..] {
                            *begin = Some(start);
                            *end = Some(t.pos);
                        }
                        return Ok(Outcome::Match(Span { start, end: t.pos }));
                    }
                    Control::Deoptimize => return Ok(Outcome::Deoptimize),
                }
            }
        }
        Ok(Outcome::NoMatch)
    }
}

// =============================================================================
// Backend
// =============================================================================

#[derive(Debug, Default)]
pub struct ClosureBackend {
    source: Option<String>,
}

impl ClosureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing of the most recent compilation.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn lower(&self, cfg: &Cfg, schedule: &[BlockId]) -> Result<ClosureCode> {
        check_schedule(BackendKind::Closure, cfg, schedule)?;

        let index_of = |label: Label| -> Result<u32> {
            cfg.block_for(label)
                .and_then(|id| schedule.iter().position(|&b| b == id))
                .map(|i| i as u32)
                .ok_or_else(|| {
                    CompileError::new(BackendKind::Closure, format!("undefined label {}", label))
                        .into()
                })
        };

        let mut blocks = Vec::with_capacity(schedule.len());
        let mut source = String::new();
        for (block_index, &id) in schedule.iter().enumerate() {
            let Some(block) = cfg.block(id) else {
                return Err(CompileError::new(BackendKind::Closure, format!("missing {}", id)).into());
            };
            source.push_str(&format!(
                "block {} /* {} {} */ {{\n",
                block_index, id, block.name
            ));

            let mut ops = Vec::with_capacity(block.instructions.len());
            for (index, i) in block.instructions.iter().enumerate() {
                let instruction = &i.instruction;
                let goto = match instruction.target() {
                    Some(label) => index_of(label)?,
                    None => u32::MAX,
                };
                let resume = block
                    .instructions
                    .get(index + 1)
                    .filter(|next| !next.instruction.is_fail_jump())
                    .map(|_| (block_index as u32, index as u32 + 1));

                source.push_str("    ");
                source.push_str(&render(
                    template(instruction),
                    &bindings(instruction, resume.filter(|_| instruction.is_alternative()), goto),
                ));
                source.push('\n');
                ops.push(step(instruction, resume, goto));
            }
            source.push_str("}\n");
            blocks.push(ops);
        }

        debug!(
            target: "rejit::backend::closure",
            blocks = blocks.len(),
            bytes = source.len(),
            "Generated closure code"
        );
        Ok(ClosureCode {
            blocks,
            source,
            states: cfg.state_count(),
        })
    }
}

impl Backend for ClosureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Closure
    }

    fn compile(&mut self, cfg: &Cfg, schedule: &[BlockId]) -> Result<Box<dyn Compiled>> {
        let code = self.lower(cfg, schedule)?;
        self.source = Some(code.source.clone());
        Ok(Box::new(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::nfa;
    use crate::backend::BytecodeInterpreter;
    use crate::bytecode::{compile, Program};
    use crate::cfg::{DiscoveryOrder, Scheduler};
    use crate::syntax::parse;

    fn program(source: &str) -> Program {
        compile(&nfa::build(&parse(source, None).expect("parse")).expect("build")).expect("compile")
    }

    fn cps(s: &str) -> Vec<u32> {
        s.chars().map(|c| c as u32).collect()
    }

    fn lower(p: &Program) -> ClosureCode {
        let cfg = Cfg::build(p).expect("cfg");
        let order = DiscoveryOrder.schedule(&cfg);
        ClosureBackend::new().lower(&cfg, &order).expect("lower")
    }

    #[test]
    fn test_listing_renders_templates() {
        let code = lower(&program("a"));
        let source = code.source();
        assert!(source.starts_with("block 0 /* b0 s0 */ {\n    if !t.visit(0) { return Fail; }\n"));
        assert!(source.contains("if t.peek() == Some(97) { t.take(None, None, t.pos + 1); return Goto("));
        assert!(source.contains("    return Match;\n"));
        assert!(!source.contains("{target}"));
    }

    #[test]
    fn test_listing_shows_resume_points() {
        let code = lower(&program("a|b"));
        assert!(code.source().contains("t.take(Some((0, 2)), None, t.pos); return Goto("));
    }

    #[test]
    fn test_backend_keeps_last_listing() {
        let p = program("x+");
        let cfg = Cfg::build(&p).expect("cfg");
        let order = DiscoveryOrder.schedule(&cfg);
        let mut backend = ClosureBackend::new();
        assert!(backend.source().is_none());
        let compiled = backend.compile(&cfg, &order).expect("compile");
        assert_eq!(compiled.backend(), BackendKind::Closure);
        assert!(backend.source().is_some_and(|s| s.contains("Some(120)")));
    }

    #[test]
    fn test_agrees_with_bytecode_interpreter() {
        for (source, subject) in [
            ("(a|ab)(c|bcd)(d*)", "abcd"),
            ("\\s*(\\w+)\\s*=\\s*(\\d+)", "  width = 42;"),
            ("[^,]+", ",,abc,"),
            ("x(?=yz)", "xyxyz"),
            ("x(?!y)", "xyxz"),
            ("(a*)*b", "aaaa"),
            ("$", "abc"),
        ] {
            let p = program(source);
            let code = lower(&p);
            let mut expected = vec![None; 2 * p.group_count()];
            let mut actual = vec![None; 2 * p.group_count()];
            let want = BytecodeInterpreter::new(&p)
                .expect("valid")
                .execute(&cps(subject), &mut expected);
            let got = code.execute(&cps(subject), &mut actual).expect("execute");
            assert_eq!(got, want, "{}", source);
            assert_eq!(actual, expected, "{}", source);
        }
    }
}
