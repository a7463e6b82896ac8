//! Compiled patterns and match presentation.
//!
//! ```rust
//! use rejit::Pattern;
//!
//! let pattern = Pattern::new(r"(?<key>\w+)=(\d+)", None)?;
//! let caps = pattern.captures("set width=42")?.expect("match");
//! assert_eq!(caps.as_str(), "width=42");
//! assert_eq!(caps.name("key").map(|m| m.as_str()), Some("width"));
//! assert_eq!(caps.get(2).map(|m| m.range()), Some(10..12));
//! # Ok::<(), rejit::RegexError>(())
//! ```
//!
//! Matching is leftmost-first: the earliest start wins, and at that start
//! alternatives and quantifiers are tried in priority order (greedy).
//! Offsets reported by [`Match`] are byte offsets into the subject.
//!
//! A determinized pattern runs its DFA program through the adaptive
//! controller to decide whether the subject matches at all. Spans and groups
//! of a match are then recovered from the NFA program, so both modes report
//! the same captures.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::adaptive::{Controller, ControllerState, Hooks};
use crate::automaton::{dfa, nfa, Automaton};
use crate::backend::{BackendKind, BytecodeInterpreter, Outcome};
use crate::bytecode::{self, Program};
use crate::cfg::Cfg;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::syntax;

pub struct Pattern {
    source: String,
    automaton: Automaton,
    program: Arc<Program>,
    /// NFA program for spans and groups when `program` is deterministic
    groups_program: Option<Program>,
    controller: Mutex<Controller>,
}

impl Pattern {
    /// Compile `source` with the default configuration. `flags` may contain
    /// `i` (case-insensitive).
    pub fn new(source: &str, flags: Option<&str>) -> Result<Pattern> {
        Self::with_config(source, flags, EngineConfig::default())
    }

    pub fn with_config(source: &str, flags: Option<&str>, config: EngineConfig) -> Result<Pattern> {
        let ast = syntax::parse(source, flags)?;
        let mut automaton = nfa::build(&ast)?;
        let mut groups_program = None;
        if config.determinize {
            let nfa_program = bytecode::compile(&automaton)?;
            nfa_program.validate()?;
            groups_program = Some(nfa_program);
            automaton = dfa::determinize(&automaton, config.max_dfa_states)?;
        }
        let program = Arc::new(bytecode::compile(&automaton)?);

        debug!(
            target: "rejit::pattern",
            source,
            states = automaton.len(),
            instructions = program.len(),
            deterministic = config.determinize,
            "Pattern compiled to bytecode"
        );

        let controller = Controller::new(Arc::clone(&program), config)?;
        Ok(Pattern {
            source: source.to_string(),
            automaton,
            program,
            groups_program,
            controller: Mutex::new(controller),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Capture groups including group 0.
    pub fn group_count(&self) -> usize {
        self.groups_program().group_count()
    }

    pub fn group_names(&self) -> &[Option<String>] {
        self.groups_program().groups()
    }

    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    /// Program run by the adaptive controller; the DFA program when the
    /// pattern is determinized.
    pub fn program(&self) -> &Program {
        &self.program
    }

    fn groups_program(&self) -> &Program {
        self.groups_program.as_ref().unwrap_or(&self.program)
    }

    /// Freshly built, unoptimized graph for this pattern's program.
    pub fn cfg(&self) -> Result<Cfg> {
        Cfg::build(&self.program)
    }

    pub fn is_match(&self, subject: &str) -> Result<bool> {
        let subject: Vec<u32> = subject.chars().map(|c| c as u32).collect();
        Ok(self.decide(&subject)?.is_some())
    }

    /// Leftmost-first match with its capture groups.
    pub fn captures<'s>(&self, subject: &'s str) -> Result<Option<Captures<'s>>> {
        let codepoints: Vec<u32> = subject.chars().map(|c| c as u32).collect();
        let Some(slots) = self.search(&codepoints)? else {
            return Ok(None);
        };
        let offsets: Vec<usize> = subject
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(subject.len()))
            .collect();
        let slots = slots
            .into_iter()
            .map(|slot| slot.and_then(|cp| offsets.get(cp).copied()))
            .collect();
        Ok(Some(Captures {
            subject,
            slots,
            names: self.group_names().to_vec(),
        }))
    }

    /// Leftmost-first match without its groups.
    pub fn find<'s>(&self, subject: &'s str) -> Result<Option<Match<'s>>> {
        Ok(self.captures(subject)?.and_then(|c| c.get(0)))
    }

    /// Compile now with `kind`, without speculation.
    pub fn compile(&self, kind: BackendKind) -> Result<()> {
        self.controller.lock().compile(kind)
    }

    /// Go back to profiling: the next `threshold` calls are interpreted,
    /// then the pattern is compiled with `kind`.
    pub fn profile(&self, kind: BackendKind, threshold: u32, speculative: bool) -> Result<()> {
        self.controller.lock().profile_with(kind, threshold, speculative);
        Ok(())
    }

    pub fn hooks(&self) -> Hooks {
        self.controller.lock().hooks()
    }

    pub fn state(&self) -> ControllerState {
        self.controller.lock().state()
    }

    /// Branch profile collected since the last compilation, as text.
    pub fn profile_dump(&self) -> String {
        self.controller.lock().profile().dump(&self.program)
    }

    /// Run the controller's program; slots of a match, if any.
    fn decide(&self, subject: &[u32]) -> Result<Option<Vec<Option<usize>>>> {
        let mut slots = vec![None; 2 * self.program.group_count()];
        match self.controller.lock().execute(subject, &mut slots)? {
            Outcome::Match(_) => Ok(Some(slots)),
            Outcome::NoMatch | Outcome::Deoptimize => Ok(None),
        }
    }

    fn search(&self, subject: &[u32]) -> Result<Option<Vec<Option<usize>>>> {
        let Some(slots) = self.decide(subject)? else {
            return Ok(None);
        };
        let Some(groups_program) = &self.groups_program else {
            return Ok(Some(slots));
        };

        let mut slots = vec![None; 2 * groups_program.group_count()];
        match BytecodeInterpreter::prevalidated(groups_program).execute(subject, &mut slots) {
            Outcome::Match(_) => Ok(Some(slots)),
            Outcome::NoMatch | Outcome::Deoptimize => Ok(None),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

// =============================================================================
// Match presentation
// =============================================================================

/// One matched span of the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'s> {
    subject: &'s str,
    start: usize,
    end: usize,
}

impl<'s> Match<'s> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_str(&self) -> &'s str {
        &self.subject[self.start..self.end]
    }
}

/// Groups of one match. Group 0 is the whole match; a group that did not
/// participate is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures<'s> {
    subject: &'s str,
    slots: Vec<Option<usize>>,
    names: Vec<Option<String>>,
}

impl<'s> Captures<'s> {
    pub fn get(&self, group: usize) -> Option<Match<'s>> {
        let start = (*self.slots.get(2 * group)?)?;
        let end = (*self.slots.get(2 * group + 1)?)?;
        Some(Match {
            subject: self.subject,
            start,
            end,
        })
    }

    pub fn name(&self, name: &str) -> Option<Match<'s>> {
        let group = self
            .names
            .iter()
            .position(|n| n.as_deref() == Some(name))?;
        self.get(group)
    }

    /// Number of groups including group 0.
    pub fn len(&self) -> usize {
        self.slots.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn start(&self) -> usize {
        self.get(0).map_or(0, |m| m.start)
    }

    pub fn end(&self) -> usize {
        self.get(0).map_or(0, |m| m.end)
    }

    pub fn as_str(&self) -> &'s str {
        self.get(0).map_or("", |m| m.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<Match<'s>>> + '_ {
        (0..self.len()).map(move |g| self.get(g))
    }
}
