//! Pattern parser.
//!
//! Groups are tracked on an explicit frame stack rather than by recursive
//! descent, so nesting depth is bounded by memory only.

use crate::error::ParseError;
use crate::unicode::CharType;

use super::{Ast, Class, ClassItem, Flags, Node};

/// Largest repetition count accepted in `{m,n}`.
pub const REPEAT_MAX: u32 = 1000;

type ParseResult<T> = Result<T, ParseError>;

/// Parse a flag string (`"i"`).
pub fn parse_flags(flags: Option<&str>) -> ParseResult<Flags> {
    let mut parsed = Flags::default();
    for (offset, c) in flags.unwrap_or("").chars().enumerate() {
        match c {
            'i' => parsed.case_insensitive = true,
            other => {
                return Err(ParseError::new(format!("unknown flag '{}'", other), offset))
            }
        }
    }
    Ok(parsed)
}

/// Parse `source` into an [`Ast`].
pub fn parse(source: &str, flags: Option<&str>) -> ParseResult<Ast> {
    let flags = parse_flags(flags)?;
    let mut parser = Parser::new(source);
    let root = parser.run()?;
    Ok(Ast {
        root,
        groups: parser.groups,
        flags,
    })
}

#[derive(Debug, Clone, Copy)]
enum GroupKind {
    Root,
    Capture(u32),
    NonCapture,
    Lookahead(bool),
    Lookbehind(bool),
}

struct Frame {
    kind: GroupKind,
    alternatives: Vec<Node>,
    current: Vec<Node>,
    offset: usize,
}

impl Frame {
    fn new(kind: GroupKind, offset: usize) -> Self {
        Frame {
            kind,
            alternatives: Vec::new(),
            current: Vec::new(),
            offset,
        }
    }

    fn finish(mut self) -> Node {
        self.alternatives.push(concat(self.current));
        if self.alternatives.len() == 1 {
            self.alternatives.pop().unwrap_or(Node::Empty)
        } else {
            Node::Alternation(self.alternatives)
        }
    }
}

fn concat(mut nodes: Vec<Node>) -> Node {
    match nodes.len() {
        0 => Node::Empty,
        1 => nodes.pop().unwrap_or(Node::Empty),
        _ => Node::Concat(nodes),
    }
}

enum Escape {
    Char(char),
    Type(CharType, bool),
    Property(String, bool, usize),
    Backreference(u32),
}

struct Parser {
    chars: Vec<char>,
    index: usize,
    root: Frame,
    stack: Vec<Frame>,
    groups: Vec<Option<String>>,
}

impl Parser {
    fn new(source: &str) -> Self {
        Parser {
            chars: source.chars().collect(),
            index: 0,
            root: Frame::new(GroupKind::Root, 0),
            stack: Vec::new(),
            groups: vec![None],
        }
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.get(self.index).copied();
        if c.is_some() {
            self.index += 1;
        }
        c
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.index + ahead).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn top(&mut self) -> &mut Frame {
        match self.stack.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    fn push_atom(&mut self, node: Node) {
        self.top().current.push(node);
    }

    fn run(&mut self) -> ParseResult<Node> {
        while let Some(c) = self.next() {
            let at = self.index - 1;
            match c {
                '(' => self.open_group(at)?,
                ')' => self.close_group(at)?,
                '|' => {
                    let frame = self.top();
                    let sequence = std::mem::take(&mut frame.current);
                    frame.alternatives.push(concat(sequence));
                }
                '*' => self.quantify(at, 0, None)?,
                '+' => self.quantify(at, 1, None)?,
                '?' => self.quantify(at, 0, Some(1))?,
                '{' => match self.read_range_quantifier() {
                    Some((min, max)) => self.quantify(at, min, max)?,
                    None => self.push_atom(Node::Literal('{')),
                },
                '.' => self.push_atom(Node::Any),
                '^' => self.push_atom(Node::Begin),
                '$' => self.push_atom(Node::End),
                '[' => {
                    let class = self.parse_class(at)?;
                    self.push_atom(Node::Class(class));
                }
                '\\' => {
                    let node = match self.parse_escape(at)? {
                        Escape::Char(c) => Node::Literal(c),
                        Escape::Type(class, negated) => Node::Type { class, negated },
                        Escape::Property(name, negated, offset) => Node::Property {
                            name,
                            negated,
                            offset,
                        },
                        Escape::Backreference(n) => Node::Backreference(n),
                    };
                    self.push_atom(node);
                }
                _ => self.push_atom(Node::Literal(c)),
            }
        }

        if let Some(frame) = self.stack.last() {
            return Err(ParseError::new("unclosed group", frame.offset));
        }
        let root = std::mem::replace(&mut self.root, Frame::new(GroupKind::Root, 0));
        Ok(root.finish())
    }

    // =========================================================================
    // Groups
    // =========================================================================

    fn open_group(&mut self, at: usize) -> ParseResult<()> {
        let kind = if self.eat('?') {
            match self.next() {
                Some(':') => GroupKind::NonCapture,
                Some('=') => GroupKind::Lookahead(false),
                Some('!') => GroupKind::Lookahead(true),
                Some('<') if self.eat('=') => GroupKind::Lookbehind(false),
                Some('<') if self.eat('!') => GroupKind::Lookbehind(true),
                Some('<') => self.named_group(at)?,
                Some('P') if self.eat('<') => self.named_group(at)?,
                _ => return Err(ParseError::new("unknown group flag", at + 1)),
            }
        } else {
            let index = self.groups.len() as u32;
            self.groups.push(None);
            GroupKind::Capture(index)
        };
        self.stack.push(Frame::new(kind, at));
        Ok(())
    }

    fn named_group(&mut self, at: usize) -> ParseResult<GroupKind> {
        let mut name = String::new();
        loop {
            match self.next() {
                Some('>') => break,
                Some(c) if c == '_' || c.is_ascii_alphanumeric() => name.push(c),
                _ => return Err(ParseError::new("invalid group name", at)),
            }
        }
        if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ParseError::new("invalid group name", at));
        }
        if self.groups.iter().flatten().any(|existing| *existing == name) {
            return Err(ParseError::new(format!("duplicate group name '{}'", name), at));
        }
        let index = self.groups.len() as u32;
        self.groups.push(Some(name));
        Ok(GroupKind::Capture(index))
    }

    fn close_group(&mut self, at: usize) -> ParseResult<()> {
        let Some(frame) = self.stack.pop() else {
            return Err(ParseError::new("unmatched ')'", at));
        };
        let kind = frame.kind;
        let inner = Box::new(frame.finish());
        let node = match kind {
            GroupKind::Capture(index) => Node::Group {
                index: Some(index),
                node: inner,
            },
            GroupKind::NonCapture | GroupKind::Root => Node::Group {
                index: None,
                node: inner,
            },
            GroupKind::Lookahead(negated) => Node::Lookahead {
                negated,
                node: inner,
            },
            GroupKind::Lookbehind(negated) => Node::Lookbehind {
                negated,
                node: inner,
            },
        };
        self.push_atom(node);
        Ok(())
    }

    // =========================================================================
    // Quantifiers
    // =========================================================================

    fn quantify(&mut self, at: usize, min: u32, max: Option<u32>) -> ParseResult<()> {
        if matches!(self.peek(), Some('?') | Some('+')) {
            return Err(ParseError::new(
                "lazy and possessive quantifiers are not supported",
                self.index,
            ));
        }
        if let Some(max) = max {
            if max < min {
                return Err(ParseError::new("repetition bounds out of order", at));
            }
        }
        if min > REPEAT_MAX || max.is_some_and(|m| m > REPEAT_MAX) {
            return Err(ParseError::new(
                format!("repetition count exceeds {}", REPEAT_MAX),
                at,
            ));
        }

        let atom = match self.top().current.pop() {
            None => return Err(ParseError::new("quantifier has nothing to repeat", at)),
            Some(Node::Repeat { .. }) => {
                return Err(ParseError::new("nested quantifier", at))
            }
            Some(
                Node::Begin | Node::End | Node::Lookahead { .. } | Node::Lookbehind { .. },
            ) => {
                return Err(ParseError::new("quantifier cannot follow an assertion", at))
            }
            Some(atom) => atom,
        };
        self.push_atom(Node::Repeat {
            node: Box::new(atom),
            min,
            max,
        });
        Ok(())
    }

    /// `{m}`, `{m,}` or `{m,n}` after the opening brace. Anything else leaves
    /// the position untouched and yields `None`, making the brace a literal.
    fn read_range_quantifier(&mut self) -> Option<(u32, Option<u32>)> {
        let start = self.index;
        let min = self.read_number();
        let result = match (min, self.next()) {
            (Some(min), Some('}')) => Some((min, Some(min))),
            (Some(min), Some(',')) => {
                let max = self.read_number();
                match self.next() {
                    Some('}') => Some((min, max)),
                    _ => None,
                }
            }
            _ => None,
        };
        if result.is_none() {
            self.index = start;
        }
        result
    }

    fn read_number(&mut self) -> Option<u32> {
        let mut value: Option<u32> = None;
        while let Some(d) = self.peek().and_then(|c| c.to_digit(10)) {
            self.index += 1;
            value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(d));
        }
        value
    }

    // =========================================================================
    // Classes and escapes
    // =========================================================================

    fn parse_class(&mut self, at: usize) -> ParseResult<Class> {
        let negated = self.eat('^');
        let mut items = Vec::new();
        let mut first = true;

        loop {
            let pos = self.index;
            let item = match self.next() {
                None => return Err(ParseError::new("unterminated character class", at)),
                Some(']') if !first => break,
                Some('\\') => self.class_escape(pos)?,
                Some(c) => ClassItem::Char(c),
            };
            first = false;

            if let ClassItem::Char(lo) = item {
                if self.peek() == Some('-') && self.peek_at(1).is_some_and(|c| c != ']') {
                    self.index += 1;
                    let hi_pos = self.index;
                    let hi = match self.next() {
                        Some('\\') => match self.class_escape(hi_pos)? {
                            ClassItem::Char(hi) => hi,
                            _ => return Err(ParseError::new("invalid range end", hi_pos)),
                        },
                        Some(hi) => hi,
                        None => {
                            return Err(ParseError::new("unterminated character class", at))
                        }
                    };
                    if lo > hi {
                        return Err(ParseError::new("range bounds out of order", pos));
                    }
                    items.push(ClassItem::Range(lo, hi));
                    continue;
                }
            }
            items.push(item);
        }

        Ok(Class { items, negated })
    }

    fn class_escape(&mut self, at: usize) -> ParseResult<ClassItem> {
        match self.parse_escape(at)? {
            Escape::Char(c) => Ok(ClassItem::Char(c)),
            Escape::Type(class, negated) => Ok(ClassItem::Type { class, negated }),
            Escape::Property(name, negated, offset) => Ok(ClassItem::Property {
                name,
                negated,
                offset,
            }),
            Escape::Backreference(_) => Err(ParseError::new(
                "backreference inside character class",
                at,
            )),
        }
    }

    fn parse_escape(&mut self, at: usize) -> ParseResult<Escape> {
        let Some(c) = self.next() else {
            return Err(ParseError::new("trailing backslash", at));
        };
        let escape = match c {
            'd' | 'w' | 's' | 'D' | 'W' | 'S' => {
                let lower = c.to_ascii_lowercase();
                match CharType::from_escape(lower) {
                    Some(class) => Escape::Type(class, c != lower),
                    None => return Err(ParseError::new("unknown character type", at)),
                }
            }
            'p' | 'P' => {
                if !self.eat('{') {
                    return Err(ParseError::new("expected '{' after property escape", at));
                }
                let mut name = String::new();
                loop {
                    match self.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(ParseError::new("unterminated property name", at)),
                    }
                }
                if name.is_empty() {
                    return Err(ParseError::new("empty property name", at));
                }
                Escape::Property(name, c == 'P', at)
            }
            'n' => Escape::Char('\n'),
            't' => Escape::Char('\t'),
            'r' => Escape::Char('\r'),
            'f' => Escape::Char('\x0C'),
            'v' => Escape::Char('\x0B'),
            '0' => Escape::Char('\0'),
            'x' => Escape::Char(self.read_hex(at, Some(2))?),
            'u' => {
                if self.eat('{') {
                    let c = self.read_hex(at, None)?;
                    if !self.eat('}') {
                        return Err(ParseError::new("unterminated unicode escape", at));
                    }
                    Escape::Char(c)
                } else {
                    Escape::Char(self.read_hex(at, Some(4))?)
                }
            }
            '1'..='9' => Escape::Backreference(c as u32 - '0' as u32),
            'b' | 'B' => {
                return Err(ParseError::new(
                    "word boundary assertions are not supported",
                    at,
                ))
            }
            c if c.is_ascii_alphanumeric() => {
                return Err(ParseError::new(format!("unknown escape '\\{}'", c), at))
            }
            c => Escape::Char(c),
        };
        Ok(escape)
    }

    /// Hex digits: exactly `count` of them, or one to six when `None`.
    fn read_hex(&mut self, at: usize, count: Option<usize>) -> ParseResult<char> {
        let mut value: u32 = 0;
        let mut digits = 0;
        let limit = count.unwrap_or(6);
        while digits < limit {
            match self.peek().and_then(|c| c.to_digit(16)) {
                Some(d) => {
                    self.index += 1;
                    value = value * 16 + d;
                    digits += 1;
                }
                None => break,
            }
        }
        if digits == 0 || count.is_some_and(|n| n != digits) {
            return Err(ParseError::new("invalid hex escape", at));
        }
        char::from_u32(value).ok_or_else(|| ParseError::new("invalid codepoint", at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(source: &str) -> Node {
        parse(source, None).expect("parse").root
    }

    #[test]
    fn test_alternation_and_concat() {
        assert_eq!(
            root("ab|c"),
            Node::Alternation(vec![
                Node::Concat(vec![Node::Literal('a'), Node::Literal('b')]),
                Node::Literal('c'),
            ])
        );
        assert_eq!(
            root("a|"),
            Node::Alternation(vec![Node::Literal('a'), Node::Empty])
        );
    }

    #[test]
    fn test_quantifiers() {
        let repeat = |min, max| Node::Repeat {
            node: Box::new(Node::Literal('a')),
            min,
            max,
        };
        assert_eq!(root("a?"), repeat(0, Some(1)));
        assert_eq!(root("a*"), repeat(0, None));
        assert_eq!(root("a+"), repeat(1, None));
        assert_eq!(root("a{3}"), repeat(3, Some(3)));
        assert_eq!(root("a{2,}"), repeat(2, None));
        assert_eq!(root("a{2,5}"), repeat(2, Some(5)));
    }

    #[test]
    fn test_brace_without_quantifier_is_literal() {
        assert_eq!(
            root("a{x"),
            Node::Concat(vec![Node::Literal('a'), Node::Literal('{'), Node::Literal('x')])
        );
    }

    #[test]
    fn test_groups_are_numbered_and_named() {
        let ast = parse("(a)(?<year>b)(?:c)(?P<day>d)", None).expect("parse");
        assert_eq!(
            ast.groups,
            vec![None, None, Some("year".to_string()), Some("day".to_string())]
        );
        let Node::Concat(nodes) = ast.root else {
            panic!("expected concatenation");
        };
        assert!(matches!(nodes[0], Node::Group { index: Some(1), .. }));
        assert!(matches!(nodes[1], Node::Group { index: Some(2), .. }));
        assert!(matches!(nodes[2], Node::Group { index: None, .. }));
        assert!(matches!(nodes[3], Node::Group { index: Some(3), .. }));
    }

    #[test]
    fn test_class_items() {
        let Node::Class(class) = root("[^a-c\\d_\\]-]") else {
            panic!("expected class");
        };
        assert!(class.negated);
        assert_eq!(
            class.items,
            vec![
                ClassItem::Range('a', 'c'),
                ClassItem::Type {
                    class: CharType::Digit,
                    negated: false
                },
                ClassItem::Char('_'),
                ClassItem::Char(']'),
                ClassItem::Char('-'),
            ]
        );
    }

    #[test]
    fn test_leading_bracket_is_literal() {
        let Node::Class(class) = root("[]a]") else {
            panic!("expected class");
        };
        assert_eq!(class.items, vec![ClassItem::Char(']'), ClassItem::Char('a')]);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(root("\\x41"), Node::Literal('A'));
        assert_eq!(root("\\u{1F600}"), Node::Literal('\u{1F600}'));
        assert_eq!(root("\\."), Node::Literal('.'));
        assert_eq!(
            root("\\S"),
            Node::Type {
                class: CharType::Space,
                negated: true
            }
        );
        assert_eq!(
            root("\\p{Greek}"),
            Node::Property {
                name: "Greek".to_string(),
                negated: false,
                offset: 0
            }
        );
        assert_eq!(root("\\2"), Node::Backreference(2));
    }

    #[test]
    fn test_lookaround() {
        assert!(matches!(root("(?=ab)"), Node::Lookahead { negated: false, .. }));
        assert!(matches!(root("(?!ab)"), Node::Lookahead { negated: true, .. }));
        assert!(matches!(root("(?<=ab)"), Node::Lookbehind { negated: false, .. }));
        assert!(matches!(root("(?<!ab)"), Node::Lookbehind { negated: true, .. }));
    }

    #[test]
    fn test_errors() {
        let offset = |source: &str| parse(source, None).expect_err(source).offset;
        assert_eq!(offset("(ab"), 0);
        assert_eq!(offset("ab)"), 2);
        assert_eq!(offset("*a"), 0);
        assert_eq!(offset("a**"), 2);
        assert_eq!(offset("[abc"), 0);
        assert_eq!(offset("[z-a]"), 1);
        assert_eq!(offset("a{5,2}"), 1);
        assert_eq!(offset("a\\"), 1);
        assert_eq!(offset("\\q"), 0);
        assert!(parse("a*?", None).is_err());
        assert!(parse("^*", None).is_err());
        assert!(parse("(?<1a>x)", None).is_err());
        assert!(parse("(?<n>a)(?<n>b)", None).is_err());
        assert!(parse("a{1001}", None).is_err());
    }

    #[test]
    fn test_flags() {
        assert!(parse_flags(Some("i")).expect("flags").case_insensitive);
        assert!(!parse_flags(None).expect("flags").case_insensitive);
        assert_eq!(parse_flags(Some("iz")).expect_err("bad flag").offset, 1);
    }
}
