//! NFA construction from the AST.
//!
//! Construction is driven by a worklist of `(node, entry, exit)` items: each
//! pop lowers one node between two states and pushes its children, so no call
//! recursion is involved and depth is bounded by memory only.
//!
//! Every item adds transitions only to its own `entry` state and to states it
//! allocates itself, never to `exit` (which belongs to the successor item).
//! The order in which items are popped therefore has no effect on transition
//! priority.

use itertools::Itertools;
use tracing::debug;

use crate::error::{InternalError, ParseError, Result};
use crate::syntax::{Ast, Class, ClassItem, Flags, Node};
use crate::unicode::{BlockTable, CharType, PropertyLookup};

use super::alphabet::{invert_intervals, merge_intervals};
use super::{Automaton, Role, StateId, Transition};

/// Upper bound on the case spellings a case-insensitive lookahead expands to.
const MAX_LOOKAHEAD_SPELLINGS: usize = 64;

/// Build an NFA using the default property table.
pub fn build(ast: &Ast) -> Result<Automaton> {
    build_with(ast, &BlockTable)
}

/// Build an NFA, resolving `\p{..}` through `properties`.
pub fn build_with(ast: &Ast, properties: &dyn PropertyLookup) -> Result<Automaton> {
    NfaBuilder::new(properties, ast.flags).run(ast)
}

struct NfaBuilder<'p> {
    automaton: Automaton,
    properties: &'p dyn PropertyLookup,
    flags: Flags,
}

impl<'p> NfaBuilder<'p> {
    fn new(properties: &'p dyn PropertyLookup, flags: Flags) -> Self {
        NfaBuilder {
            automaton: Automaton::new(),
            properties,
            flags,
        }
    }

    fn state(&mut self, label: &str) -> StateId {
        self.automaton.add_state(label, Role::Ordinary)
    }

    fn edge(&mut self, from: StateId, transition: Transition) {
        self.automaton.add_transition(from, transition);
    }

    fn epsilon(&mut self, from: StateId, target: StateId) {
        self.edge(from, Transition::Epsilon { target });
    }

    fn run(mut self, ast: &Ast) -> Result<Automaton> {
        let start = self.automaton.add_state("start", Role::Start);
        let finish = self.automaton.add_state("finish", Role::Finish);
        self.automaton.set_groups(ast.groups.clone());

        let mut work: Vec<(&Node, StateId, StateId)> = vec![(&ast.root, start, finish)];

        while let Some((node, entry, exit)) = work.pop() {
            match node {
                Node::Empty => self.epsilon(entry, exit),

                Node::Literal(c) => {
                    for value in self.case_variants(*c) {
                        self.edge(entry, Transition::Value { target: exit, value });
                    }
                }

                Node::Any => self.edge(entry, Transition::Any { target: exit }),

                Node::Class(class) => {
                    let intervals = self.class_intervals(class)?;
                    self.lower_intervals(entry, exit, intervals, class.negated);
                }

                Node::Type {
                    class,
                    negated: false,
                } => self.edge(
                    entry,
                    Transition::Type {
                        target: exit,
                        class: *class,
                    },
                ),

                Node::Type {
                    class,
                    negated: true,
                } => self.lower_intervals(entry, exit, class.ranges().to_vec(), true),

                Node::Property {
                    name,
                    negated,
                    offset,
                } => {
                    let intervals = self.property(name, *offset)?;
                    self.lower_intervals(entry, exit, intervals, *negated);
                }

                Node::Begin => self.edge(entry, Transition::BeginAnchor { target: exit }),
                Node::End => self.edge(entry, Transition::EndAnchor { target: exit }),

                Node::Concat(nodes) => {
                    let mut from = entry;
                    for (i, child) in nodes.iter().enumerate() {
                        let to = if i + 1 == nodes.len() {
                            exit
                        } else {
                            self.state("concat")
                        };
                        work.push((child, from, to));
                        from = to;
                    }
                    if nodes.is_empty() {
                        self.epsilon(entry, exit);
                    }
                }

                Node::Alternation(alternatives) => {
                    for alternative in alternatives {
                        let branch = self.state("alt");
                        self.epsilon(entry, branch);
                        work.push((alternative, branch, exit));
                    }
                }

                Node::Group {
                    index: Some(group),
                    node: inner,
                } => {
                    let inner_entry = self.state("group");
                    let inner_exit = self.state("group_end");
                    self.edge(
                        entry,
                        Transition::StartCapture {
                            target: inner_entry,
                            group: *group,
                        },
                    );
                    self.edge(
                        inner_exit,
                        Transition::EndCapture {
                            target: exit,
                            group: *group,
                        },
                    );
                    work.push((inner.as_ref(), inner_entry, inner_exit));
                }

                Node::Group {
                    index: None,
                    node: inner,
                } => work.push((inner.as_ref(), entry, exit)),

                Node::Repeat {
                    node: body,
                    min,
                    max,
                } => self.lower_repeat(&mut work, body.as_ref(), *min, *max, entry, exit),

                Node::Lookahead {
                    negated,
                    node: inner,
                } => {
                    let Some(text) = inner.as_literal() else {
                        return Err(InternalError::UnsupportedNode(format!(
                            "lookahead with {} body",
                            inner.kind()
                        ))
                        .into());
                    };
                    let spellings = self.lookahead_spellings(&text)?;
                    if *negated {
                        // Every spelling must be absent: chain the checks.
                        let mut from = entry;
                        for (i, literal) in spellings.iter().enumerate() {
                            let to = if i + 1 == spellings.len() {
                                exit
                            } else {
                                self.state("lookahead")
                            };
                            self.edge(
                                from,
                                Transition::NegativeLookahead {
                                    target: to,
                                    literal: literal.clone(),
                                },
                            );
                            from = to;
                        }
                    } else {
                        for literal in spellings {
                            self.edge(
                                entry,
                                Transition::PositiveLookahead {
                                    target: exit,
                                    literal,
                                },
                            );
                        }
                    }
                }

                Node::Lookbehind { .. } | Node::Backreference(_) => {
                    return Err(InternalError::UnsupportedNode(node.kind().to_string()).into());
                }
            }
        }

        debug!(
            target: "rejit::nfa",
            states = self.automaton.len(),
            groups = self.automaton.group_count() - 1,
            "Built NFA"
        );
        Ok(self.automaton)
    }

    /// Unrolled repetition. Mandatory copies are chained; optional copies
    /// carry a bypass to `exit`; an unbounded tail loops through a back-edge.
    /// The edge that consumes more is always added before the bypass.
    fn lower_repeat<'n>(
        &mut self,
        work: &mut Vec<(&'n Node, StateId, StateId)>,
        body: &'n Node,
        min: u32,
        max: Option<u32>,
        entry: StateId,
        exit: StateId,
    ) {
        let mandatory = match max {
            None if min > 0 => min - 1,
            _ => min,
        };

        let mut current = entry;
        for _ in 0..mandatory {
            let next = self.state("repeat");
            work.push((body, current, next));
            current = next;
        }

        match max {
            Some(max) => {
                for _ in min..max {
                    let body_entry = self.state("optional");
                    let next = self.state("repeat");
                    self.epsilon(current, body_entry);
                    self.epsilon(current, exit);
                    work.push((body, body_entry, next));
                    current = next;
                }
                self.epsilon(current, exit);
            }
            None => {
                let body_entry = self.state("loop");
                let body_exit = self.state("loop_end");
                self.epsilon(current, body_entry);
                if min == 0 {
                    self.epsilon(current, exit);
                }
                self.epsilon(body_exit, body_entry);
                self.epsilon(body_exit, exit);
                work.push((body, body_entry, body_exit));
            }
        }
    }

    /// Non-inverted sets become one `Value`/`Range` transition per interval;
    /// inverted sets become a single inverted transition.
    fn lower_intervals(
        &mut self,
        entry: StateId,
        exit: StateId,
        intervals: Vec<(u32, u32)>,
        invert: bool,
    ) {
        let intervals = merge_intervals(intervals);
        if !invert {
            for (lo, hi) in intervals {
                let transition = if lo == hi {
                    Transition::Value {
                        target: exit,
                        value: lo,
                    }
                } else {
                    Transition::Range {
                        target: exit,
                        low: lo,
                        high: hi,
                        invert: false,
                    }
                };
                self.edge(entry, transition);
            }
            return;
        }

        let transition = match intervals.as_slice() {
            [(lo, hi)] if lo < hi => Transition::Range {
                target: exit,
                low: *lo,
                high: *hi,
                invert: true,
            },
            _ => Transition::Set {
                target: exit,
                items: intervals,
                invert: true,
            },
        };
        self.edge(entry, transition);
    }

    fn class_intervals(&self, class: &Class) -> Result<Vec<(u32, u32)>> {
        let mut intervals = Vec::new();
        for item in &class.items {
            match item {
                ClassItem::Char(c) => {
                    intervals.extend(self.case_variants(*c).into_iter().map(|v| (v, v)));
                }
                ClassItem::Range(lo, hi) => {
                    let (lo, hi) = (*lo as u32, *hi as u32);
                    intervals.push((lo, hi));
                    if self.flags.case_insensitive {
                        intervals.extend(ascii_case_fold(lo, hi));
                    }
                }
                ClassItem::Type { class, negated } => {
                    intervals.extend(type_intervals(*class, *negated));
                }
                ClassItem::Property {
                    name,
                    negated,
                    offset,
                } => {
                    let ranges = self.property(name, *offset)?;
                    if *negated {
                        intervals.extend(invert_intervals(&merge_intervals(ranges)));
                    } else {
                        intervals.extend(ranges);
                    }
                }
            }
        }
        Ok(merge_intervals(intervals))
    }

    fn property(&self, name: &str, offset: usize) -> Result<Vec<(u32, u32)>> {
        self.properties
            .lookup(name)
            .ok_or_else(|| ParseError::new(format!("unknown property '{}'", name), offset).into())
    }

    /// Every case spelling of a lookahead literal; just the literal itself
    /// unless the pattern is case-insensitive.
    fn lookahead_spellings(&self, text: &[char]) -> Result<Vec<Vec<u32>>> {
        let mut spellings: Vec<Vec<u32>> = vec![Vec::new()];
        for &c in text {
            let variants = self.case_variants(c);
            if spellings.len() * variants.len() > MAX_LOOKAHEAD_SPELLINGS {
                return Err(InternalError::UnsupportedNode(format!(
                    "case-insensitive lookahead with more than {} spellings",
                    MAX_LOOKAHEAD_SPELLINGS
                ))
                .into());
            }
            spellings = spellings
                .into_iter()
                .cartesian_product(variants)
                .map(|(mut prefix, v)| {
                    prefix.push(v);
                    prefix
                })
                .collect();
        }
        Ok(spellings)
    }

    /// The codepoint itself plus its single-character case mappings when the
    /// pattern is case-insensitive.
    fn case_variants(&self, c: char) -> Vec<u32> {
        let mut variants = vec![c as u32];
        if self.flags.case_insensitive {
            for mapped in [single_char(c.to_lowercase()), single_char(c.to_uppercase())]
                .into_iter()
                .flatten()
            {
                if !variants.contains(&(mapped as u32)) {
                    variants.push(mapped as u32);
                }
            }
        }
        variants
    }
}

fn single_char(mut mapping: impl Iterator<Item = char>) -> Option<char> {
    let first = mapping.next()?;
    match mapping.next() {
        Some(_) => None,
        None => Some(first),
    }
}

fn type_intervals(class: CharType, negated: bool) -> Vec<(u32, u32)> {
    if negated {
        invert_intervals(class.ranges())
    } else {
        class.ranges().to_vec()
    }
}

/// Counterparts of the ASCII letters inside `lo..=hi`.
fn ascii_case_fold(lo: u32, hi: u32) -> Vec<(u32, u32)> {
    let mut folded = Vec::new();
    for (from, to, shift) in [(0x61u32, 0x7Au32, -32i64), (0x41, 0x5A, 32)] {
        let a = lo.max(from);
        let b = hi.min(to);
        if a <= b {
            folded.push(((a as i64 + shift) as u32, (b as i64 + shift) as u32));
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse;

    fn nfa(source: &str) -> Automaton {
        build(&parse(source, None).expect("parse")).expect("build")
    }

    #[test]
    fn test_single_finish_without_transitions() {
        for source in ["a", "a|b", "(ab)*c", "x{2,4}", "[^a-z]+"] {
            let automaton = nfa(source);
            let finishes: Vec<_> = automaton
                .states()
                .filter(|(_, s)| s.is_finish())
                .collect();
            assert_eq!(finishes.len(), 1, "{}", source);
            assert!(finishes[0].1.transitions.is_empty(), "{}", source);
        }
    }

    #[test]
    fn test_class_is_pre_split() {
        let automaton = nfa("[a-cx0-9]");
        let start = &automaton[automaton.start()];
        assert_eq!(start.transitions.len(), 3);
        for t in &start.transitions {
            match t {
                Transition::Value { .. } => {}
                Transition::Range { invert: false, .. } => {}
                other => panic!("unexpected transition {}", other),
            }
        }
    }

    #[test]
    fn test_no_multi_value_sets_from_builder() {
        for source in ["[abc]", "[a-z_]", "\\p{Greek}", "[\\d\\s]", "[xyz]+"] {
            let ast = parse(source, None).expect("parse");
            let automaton = build(&ast).expect("build");
            for (_, state) in automaton.states() {
                for t in &state.transitions {
                    if let Transition::Set { items, invert, .. } = t {
                        assert!(*invert, "{}: non-inverted set {:?}", source, items);
                    }
                }
            }
        }
    }

    #[test]
    fn test_inverted_class_is_single_transition() {
        let automaton = nfa("[^abc]");
        let start = &automaton[automaton.start()];
        assert_eq!(start.transitions.len(), 1);
        assert!(matches!(
            &start.transitions[0],
            Transition::Set { invert: true, items, .. } if items == &vec![(0x61, 0x63)]
        ));

        let automaton = nfa("[^a-z0-9]");
        let start = &automaton[automaton.start()];
        assert!(matches!(
            &start.transitions[0],
            Transition::Set { invert: true, items, .. } if items.len() == 2
        ));

        let automaton = nfa("\\D");
        let start = &automaton[automaton.start()];
        assert!(matches!(
            start.transitions[0],
            Transition::Range { invert: true, low: 0x30, high: 0x39, .. }
        ));
    }

    #[test]
    fn test_greedy_edge_precedes_bypass() {
        let automaton = nfa("a?");
        let start = &automaton[automaton.start()];
        let Transition::Epsilon { target: body } = start.transitions[0] else {
            panic!("expected epsilon");
        };
        assert!(matches!(automaton[body].transitions[0], Transition::Value { value: 0x61, .. }));
        assert!(automaton[start.transitions[1].target()].is_finish());
    }

    #[test]
    fn test_captures_wrap_group() {
        let automaton = nfa("(a)");
        let start = &automaton[automaton.start()];
        assert!(matches!(
            start.transitions[0],
            Transition::StartCapture { group: 1, .. }
        ));
        let has_end = automaton.states().any(|(_, s)| {
            s.transitions
                .iter()
                .any(|t| matches!(t, Transition::EndCapture { group: 1, .. }))
        });
        assert!(has_end);
        assert_eq!(automaton.group_count(), 2);
    }

    #[test]
    fn test_case_insensitive_literal() {
        let ast = parse("k", Some("i")).expect("parse");
        let automaton = build(&ast).expect("build");
        let start = &automaton[automaton.start()];
        let values: Vec<u32> = start
            .transitions
            .iter()
            .filter_map(|t| match t {
                Transition::Value { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert!(values.contains(&('k' as u32)));
        assert!(values.contains(&('K' as u32)));
    }

    #[test]
    fn test_unsupported_nodes_are_internal_errors() {
        for source in ["(a)\\1", "(?<=a)b", "(?=a*)b"] {
            let ast = parse(source, None).expect("parse");
            let err = build(&ast).expect_err(source);
            assert!(
                matches!(
                    err,
                    crate::error::RegexError::Internal(InternalError::UnsupportedNode(_))
                ),
                "{}: {:?}",
                source,
                err
            );
        }
    }

    #[test]
    fn test_unknown_property_is_parse_error() {
        let cases = [
            ("\\p{Klingon}", 0),
            ("ab\\P{Klingon}", 2),
            ("[x\\p{Klingon}]", 2),
        ];
        for (source, offset) in cases {
            let ast = parse(source, None).expect("parse");
            match build(&ast) {
                Err(crate::error::RegexError::Parse(e)) => {
                    assert_eq!(e.offset, offset, "{}", source);
                    assert!(e.message.contains("Klingon"));
                }
                other => panic!("{}: expected parse error, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_case_insensitive_lookahead_spellings() {
        let automaton = build(&parse("a(?=b1)", Some("i")).expect("parse")).expect("build");
        let mut literals: Vec<Vec<u32>> = automaton
            .states()
            .flat_map(|(_, s)| s.transitions.iter())
            .filter_map(|t| match t {
                Transition::PositiveLookahead { literal, .. } => Some(literal.clone()),
                _ => None,
            })
            .collect();
        literals.sort();
        assert_eq!(literals, vec![vec![0x42, 0x31], vec![0x62, 0x31]]);

        // Negated: both spellings are checked one after the other
        let automaton = build(&parse("(?!b)", Some("i")).expect("parse")).expect("build");
        let start = &automaton[automaton.start()];
        let Transition::NegativeLookahead { target, .. } = &start.transitions[0] else {
            panic!("expected negative lookahead");
        };
        assert!(matches!(
            automaton[*target].transitions[0],
            Transition::NegativeLookahead { .. }
        ));
    }

    #[test]
    fn test_case_insensitive_lookahead_is_bounded() {
        let ast = parse("(?=abcdefgh)", Some("i")).expect("parse");
        assert!(matches!(
            build(&ast),
            Err(crate::error::RegexError::Internal(InternalError::UnsupportedNode(_)))
        ));
    }

    #[test]
    fn test_deep_nesting_does_not_recurse() {
        let depth = 1000;
        let source = format!("{}a{}", "(".repeat(depth), ")".repeat(depth));
        let automaton = nfa(&source);
        assert_eq!(automaton.group_count(), depth + 1);
    }
}
