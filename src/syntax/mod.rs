//! Pattern syntax: the AST handed to the NFA builder, and the parser that
//! produces it.
//!
//! Supported syntax:
//! - `.` any character, `^` / `$` anchors
//! - `[...]` / `[^...]` classes with ranges, escapes and `\d \w \s`
//! - `\d \w \s \D \W \S`, `\p{Block}` / `\P{Block}`
//! - `|` alternation, `(...)`, `(?:...)`, `(?<name>...)`, `(?P<name>...)`
//! - `?`, `*`, `+`, `{m}`, `{m,}`, `{m,n}` (greedy only)
//! - `(?=...)` / `(?!...)` lookahead
//!
//! Lookbehind and backreferences parse into AST nodes that the NFA builder
//! rejects.

mod parser;

pub use parser::{parse, parse_flags, REPEAT_MAX};

use crate::unicode::CharType;

/// Pattern flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// `i`: letters match both cases
    pub case_insensitive: bool,
}

/// Parsed pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub root: Node,
    /// Capture group names; index 0 is the whole match.
    pub groups: Vec<Option<String>>,
    pub flags: Flags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Empty,
    Literal(char),
    Any,
    Class(Class),
    Type { class: CharType, negated: bool },
    /// `offset` is where the escape starts, for lookup errors.
    Property { name: String, negated: bool, offset: usize },
    Begin,
    End,
    Concat(Vec<Node>),
    Alternation(Vec<Node>),
    /// `index` is `None` for non-capturing groups.
    Group { index: Option<u32>, node: Box<Node> },
    Repeat { node: Box<Node>, min: u32, max: Option<u32> },
    Lookahead { negated: bool, node: Box<Node> },
    Lookbehind { negated: bool, node: Box<Node> },
    Backreference(u32),
}

impl Node {
    /// Short name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Empty => "empty",
            Node::Literal(_) => "literal",
            Node::Any => "any",
            Node::Class(_) => "class",
            Node::Type { .. } => "type",
            Node::Property { .. } => "property",
            Node::Begin => "begin anchor",
            Node::End => "end anchor",
            Node::Concat(_) => "concatenation",
            Node::Alternation(_) => "alternation",
            Node::Group { .. } => "group",
            Node::Repeat { .. } => "repetition",
            Node::Lookahead { .. } => "lookahead",
            Node::Lookbehind { .. } => "lookbehind",
            Node::Backreference(_) => "backreference",
        }
    }

    /// The literal text of a node made only of literals, if it is one.
    pub fn as_literal(&self) -> Option<Vec<char>> {
        match self {
            Node::Empty => Some(Vec::new()),
            Node::Literal(c) => Some(vec![*c]),
            Node::Concat(nodes) => nodes
                .iter()
                .map(|n| match n {
                    Node::Literal(c) => Some(*c),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub items: Vec<ClassItem>,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassItem {
    Char(char),
    Range(char, char),
    Type { class: CharType, negated: bool },
    /// `offset` is where the escape starts, for lookup errors.
    Property { name: String, negated: bool, offset: usize },
}
