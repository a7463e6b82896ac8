//! Alphabet algebra over sets of codepoint intervals.
//!
//! An [`Alphabet`] is the character set a consuming transition accepts.
//! Determinization needs two operations over them:
//!
//! - [`combine`]: union in canonical form (adjacent values and ranges merge)
//! - [`overlay`]: the common refinement of two alphabets, whose atoms each lie
//!   entirely inside or entirely outside of either operand
//!
//! Both dispatch on the operand pair sorted by kind rank and then by minimum
//! bound, which halves the number of cases to handle.

use std::cmp::Ordering;
use std::fmt;

use itertools::Itertools;

/// Largest Unicode scalar value.
pub const MAX_CODEPOINT: u32 = 0x10FFFF;

// =============================================================================
// Alphabet
// =============================================================================

/// A set of codepoints.
///
/// Canonical form: a one-codepoint range is a `Value`, a range spanning the
/// whole codepoint space is `Any`, `Multiple` children are sorted by minimum
/// bound, pairwise disjoint and non-adjacent, a singleton `Multiple` collapses
/// into its child and an empty one is `None`. Every constructor in this module
/// returns canonical values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Alphabet {
    None,
    Any,
    Value(u32),
    Range(u32, u32),
    Multiple(Vec<Alphabet>),
}

/// Raised instead of computing a wrong answer for an operand pair the algebra
/// does not handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlphabetError {
    NotImplemented {
        operation: &'static str,
        left: String,
        right: String,
    },
}

impl fmt::Display for AlphabetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlphabetError::NotImplemented {
                operation,
                left,
                right,
            } => write!(f, "alphabet {} not implemented for {} and {}", operation, left, right),
        }
    }
}

impl std::error::Error for AlphabetError {}

pub type AlphabetResult<T> = Result<T, AlphabetError>;

impl Alphabet {
    /// Canonical alphabet for the inclusive interval `from..=to`.
    pub fn range(from: u32, to: u32) -> Alphabet {
        match from.cmp(&to) {
            Ordering::Greater => Alphabet::None,
            Ordering::Equal => Alphabet::Value(from),
            Ordering::Less if from == 0 && to >= MAX_CODEPOINT => Alphabet::Any,
            Ordering::Less => Alphabet::Range(from, to.min(MAX_CODEPOINT)),
        }
    }

    /// Canonical alphabet covering every interval in `intervals`, which may be
    /// unsorted, overlapping or adjacent.
    pub fn from_intervals<I>(intervals: I) -> Alphabet
    where
        I: IntoIterator<Item = (u32, u32)>,
    {
        let merged = merge_intervals(intervals);
        let mut children: Vec<Alphabet> = merged
            .into_iter()
            .map(|(lo, hi)| Alphabet::range(lo, hi))
            .collect();
        match children.len() {
            0 => Alphabet::None,
            1 => children.pop().unwrap_or(Alphabet::None),
            _ => Alphabet::Multiple(children),
        }
    }

    /// Sorted, disjoint, non-adjacent intervals of this alphabet.
    pub fn intervals(&self) -> Vec<(u32, u32)> {
        match self {
            Alphabet::None => Vec::new(),
            Alphabet::Any => vec![(0, MAX_CODEPOINT)],
            Alphabet::Value(v) => vec![(*v, *v)],
            Alphabet::Range(lo, hi) => vec![(*lo, *hi)],
            Alphabet::Multiple(children) => {
                children.iter().flat_map(|c| c.intervals()).collect()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Alphabet::None)
    }

    pub fn contains(&self, cp: u32) -> bool {
        match self {
            Alphabet::None => false,
            Alphabet::Any => cp <= MAX_CODEPOINT,
            Alphabet::Value(v) => *v == cp,
            Alphabet::Range(lo, hi) => *lo <= cp && cp <= *hi,
            Alphabet::Multiple(children) => children.iter().any(|c| c.contains(cp)),
        }
    }

    /// True when every codepoint of `self` is also in `other`.
    pub fn is_subset_of(&self, other: &Alphabet) -> bool {
        let theirs = other.intervals();
        self.intervals()
            .iter()
            .all(|&(lo, hi)| theirs.iter().any(|&(olo, ohi)| olo <= lo && hi <= ohi))
    }

    pub fn intersects(&self, other: &Alphabet) -> bool {
        let theirs = other.intervals();
        self.intervals()
            .iter()
            .any(|&(lo, hi)| theirs.iter().any(|&(olo, ohi)| lo <= ohi && olo <= hi))
    }

    /// Complement within `0..=MAX_CODEPOINT`.
    pub fn complement(&self) -> Alphabet {
        Alphabet::from_intervals(invert_intervals(&self.intervals()))
    }

    fn rank(&self) -> u8 {
        match self {
            Alphabet::None => 0,
            Alphabet::Value(_) => 1,
            Alphabet::Range(..) => 2,
            Alphabet::Multiple(_) => 3,
            Alphabet::Any => 4,
        }
    }

    fn min_bound(&self) -> u32 {
        match self {
            Alphabet::None | Alphabet::Any => 0,
            Alphabet::Value(v) => *v,
            Alphabet::Range(lo, _) => *lo,
            Alphabet::Multiple(children) => children.first().map_or(0, |c| c.min_bound()),
        }
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alphabet::None => write!(f, "none"),
            Alphabet::Any => write!(f, "any"),
            Alphabet::Value(v) => write!(f, "{}", DisplayCodepoint(*v)),
            Alphabet::Range(lo, hi) => {
                write!(f, "{}-{}", DisplayCodepoint(*lo), DisplayCodepoint(*hi))
            }
            Alphabet::Multiple(children) => {
                write!(f, "[{}]", children.iter().map(|c| c.to_string()).join(" "))
            }
        }
    }
}

/// Printable codepoint: the character itself when it is graphic ASCII,
/// `U+XXXX` otherwise.
pub struct DisplayCodepoint(pub u32);

impl fmt::Display for DisplayCodepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match char::from_u32(self.0) {
            Some(c) if c.is_ascii_graphic() => write!(f, "'{}'", c),
            _ => write!(f, "U+{:04X}", self.0),
        }
    }
}

// =============================================================================
// combine / overlay
// =============================================================================

fn sorted_pair<'a>(a: &'a Alphabet, b: &'a Alphabet) -> (&'a Alphabet, &'a Alphabet) {
    let key = |x: &Alphabet| (x.rank(), x.min_bound());
    if key(a) <= key(b) {
        (a, b)
    } else {
        (b, a)
    }
}

fn not_implemented(operation: &'static str, a: &Alphabet, b: &Alphabet) -> AlphabetError {
    AlphabetError::NotImplemented {
        operation,
        left: a.to_string(),
        right: b.to_string(),
    }
}

/// Union of two alphabets in canonical form.
pub fn combine(a: &Alphabet, b: &Alphabet) -> AlphabetResult<Alphabet> {
    let (a, b) = sorted_pair(a, b);
    match (a, b) {
        (Alphabet::None, other) => Ok(other.clone()),
        (_, Alphabet::Any) => Ok(Alphabet::Any),
        (Alphabet::Value(x), Alphabet::Value(y)) => {
            Ok(Alphabet::from_intervals([(*x, *x), (*y, *y)]))
        }
        (Alphabet::Value(x), Alphabet::Range(lo, hi)) => {
            if x.saturating_add(1) >= *lo && *x <= hi.saturating_add(1) {
                Ok(Alphabet::range((*x).min(*lo), (*x).max(*hi)))
            } else if x < lo {
                Ok(Alphabet::Multiple(vec![a.clone(), b.clone()]))
            } else {
                Ok(Alphabet::Multiple(vec![b.clone(), a.clone()]))
            }
        }
        // lo1 <= lo2 once sorted
        (Alphabet::Range(lo1, hi1), Alphabet::Range(lo2, hi2)) => {
            if hi1.saturating_add(1) >= *lo2 {
                Ok(Alphabet::range(*lo1, (*hi1).max(*hi2)))
            } else {
                Ok(Alphabet::Multiple(vec![a.clone(), b.clone()]))
            }
        }
        (
            Alphabet::Value(_) | Alphabet::Range(..) | Alphabet::Multiple(_),
            Alphabet::Multiple(_),
        ) => Ok(Alphabet::from_intervals(
            a.intervals().into_iter().chain(b.intervals()),
        )),
        _ => Err(not_implemented("combine", a, b)),
    }
}

/// Union of any number of alphabets.
pub fn combine_all<'a, I>(alphabets: I) -> AlphabetResult<Alphabet>
where
    I: IntoIterator<Item = &'a Alphabet>,
{
    alphabets
        .into_iter()
        .try_fold(Alphabet::None, |acc, a| combine(&acc, a))
}

/// Common refinement of two alphabets.
///
/// The atoms are sorted and pairwise disjoint, cover exactly `combine(a, b)`,
/// and none straddles a boundary of `a` or of `b`.
pub fn overlay(a: &Alphabet, b: &Alphabet) -> AlphabetResult<Vec<Alphabet>> {
    let (a, b) = sorted_pair(a, b);
    match (a, b) {
        (Alphabet::None, other) => Ok(atoms_of(other)),
        (Alphabet::Value(x), Alphabet::Value(y)) if x == y => Ok(vec![a.clone()]),
        _ => overlay_all([a, b]),
    }
}

/// Common refinement of every alphabet in `alphabets`; independent of order.
pub fn overlay_all<'a, I>(alphabets: I) -> AlphabetResult<Vec<Alphabet>>
where
    I: IntoIterator<Item = &'a Alphabet>,
{
    let alphabets: Vec<&Alphabet> = alphabets.into_iter().collect();
    let union = combine_all(alphabets.iter().copied())?;

    let mut cuts: Vec<u32> = alphabets
        .iter()
        .flat_map(|a| a.intervals())
        .flat_map(|(lo, hi)| [lo, hi + 1])
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut atoms = Vec::new();
    for (lo, hi) in union.intervals() {
        let mut start = lo;
        for &cut in cuts.iter().filter(|&&c| c > lo && c <= hi) {
            atoms.push(Alphabet::range(start, cut - 1));
            start = cut;
        }
        atoms.push(Alphabet::range(start, hi));
    }
    Ok(atoms)
}

/// Canonical pieces of one alphabet.
pub fn atoms_of(a: &Alphabet) -> Vec<Alphabet> {
    a.intervals()
        .into_iter()
        .map(|(lo, hi)| Alphabet::range(lo, hi))
        .collect()
}

// =============================================================================
// Interval helpers
// =============================================================================

/// Sort and merge overlapping or adjacent intervals, dropping empty ones.
pub fn merge_intervals<I>(intervals: I) -> Vec<(u32, u32)>
where
    I: IntoIterator<Item = (u32, u32)>,
{
    let mut sorted: Vec<(u32, u32)> = intervals
        .into_iter()
        .filter(|(lo, hi)| lo <= hi)
        .map(|(lo, hi)| (lo, hi.min(MAX_CODEPOINT)))
        .filter(|(lo, hi)| lo <= hi)
        .collect();
    sorted.sort_unstable();

    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(sorted.len());
    for (lo, hi) in sorted {
        match merged.last_mut() {
            Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

/// Complement of sorted, merged intervals within `0..=MAX_CODEPOINT`.
pub fn invert_intervals(intervals: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut inverted = Vec::with_capacity(intervals.len() + 1);
    let mut next = 0u32;
    for &(lo, hi) in intervals {
        if lo > next {
            inverted.push((next, lo - 1));
        }
        next = hi.saturating_add(1);
    }
    if next <= MAX_CODEPOINT {
        inverted.push((next, MAX_CODEPOINT));
    }
    inverted
}
