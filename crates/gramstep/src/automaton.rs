//! Finite automata over code point ranges.
//!
//! An [`Automaton`] is built from the small regular expression language in
//! [`regex`], combined with the `merge_*` operators and finally turned into a
//! [`Dfa`] by subset construction.

pub mod regex;

use crate::types::Map;
use bit_set::BitSet;
use serde::Serialize;
use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    fmt,
};

pub use self::regex::RegexError;

/// One past the largest Unicode code point.
pub const MAX_RUNE: u32 = 0x11_0000;

/// Half-open interval `[start, end)` of code points.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RuneRange {
    pub start: u32,
    pub end: u32,
}

impl RuneRange {
    /// The reserved range labelling epsilon transitions.
    pub const EPSILON: Self = Self::new(0, 0);

    /// Every code point, used by `.`.
    pub const ANY: Self = Self::new(0, MAX_RUNE);

    #[inline]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn single(c: char) -> Self {
        Self::new(c as u32, c as u32 + 1)
    }

    #[inline]
    pub const fn is_epsilon(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    #[inline]
    pub const fn contains(&self, c: u32) -> bool {
        self.start <= c && c < self.end
    }

    /// Returns `true` if `other` lies completely inside this range.
    #[inline]
    pub const fn covers(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for RuneRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn rune(f: &mut fmt::Formatter<'_>, c: u32) -> fmt::Result {
            match char::from_u32(c) {
                Some(c) if !c.is_control() && !c.is_whitespace() => write!(f, "{}", c),
                _ => write!(f, "\\u{{{:04X}}}", c),
            }
        }
        if self.is_epsilon() {
            return f.write_str("ε");
        }
        if *self == Self::ANY {
            return f.write_str(".");
        }
        if self.end == self.start + 1 {
            return rune(f, self.start);
        }
        f.write_str("[")?;
        rune(f, self.start)?;
        f.write_str("-")?;
        rune(f, self.end - 1)?;
        f.write_str("]")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub range: RuneRange,
    pub target: usize,
}

/// A (possibly nondeterministic) finite automaton. State `0` is the initial
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Automaton {
    transitions: Vec<Vec<Transition>>,
    accepts: BTreeMap<usize, String>,
}

impl Automaton {
    /// Two states joined by a single transition on `range`.
    pub fn from_range(range: RuneRange) -> Self {
        Self {
            transitions: vec![vec![Transition { range, target: 1 }], vec![]],
            accepts: Some((1, String::new())).into_iter().collect(),
        }
    }

    /// The automaton accepting only the empty string.
    pub fn epsilon() -> Self {
        Self::from_range(RuneRange::EPSILON)
    }

    /// Compile a regular expression into an NFA.
    pub fn from_regex(pattern: &str) -> Result<Self, RegexError> {
        regex::compile(pattern)
    }

    pub fn state_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn transitions(&self, state: usize) -> &[Transition] {
        self.transitions.get(state).map_or(&[], |t| &t[..])
    }

    /// Iterate over the accepting states and their tags in state order.
    pub fn accepts(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.accepts.iter().map(|(s, tag)| (*s, tag.as_str()))
    }

    pub fn is_accepting(&self, state: usize) -> bool {
        self.accepts.contains_key(&state)
    }

    pub fn tag(&self, state: usize) -> Option<&str> {
        self.accepts.get(&state).map(|t| t.as_str())
    }

    /// Stamp `tag` on every accepting state.
    pub fn set_accept_tag(&mut self, tag: &str) -> &mut Self {
        for t in self.accepts.values_mut() {
            tag.clone_into(t);
        }
        self
    }

    /// Returns an equivalent automaton whose initial state has no incoming
    /// transitions, so that it can be shared or looped back to safely.
    fn isolated(&self) -> Cow<'_, Self> {
        let reentrant = self
            .transitions
            .iter()
            .flatten()
            .any(|t| t.target == 0);
        if !reentrant {
            return Cow::Borrowed(self);
        }

        let mut transitions = Vec::with_capacity(self.transitions.len() + 1);
        transitions.push(vec![Transition {
            range: RuneRange::EPSILON,
            target: 1,
        }]);
        transitions.extend(self.transitions.iter().map(|row| shifted(row, |s| s + 1)));
        let accepts = self
            .accepts
            .iter()
            .map(|(s, tag)| (s + 1, tag.clone()))
            .collect();
        Cow::Owned(Self {
            transitions,
            accepts,
        })
    }

    /// Alternation: the initial states of both operands collapse into one.
    pub fn merge_or(&self, other: &Self) -> Self {
        let a = self.isolated();
        let b = other.isolated();
        let offset = a.state_count() - 1;
        let remap = |s: usize| if s == 0 { 0 } else { s + offset };

        let mut transitions = a.transitions.clone();
        transitions[0].extend(shifted(&b.transitions[0], remap));
        transitions.extend(b.transitions[1..].iter().map(|row| shifted(row, remap)));

        let mut accepts = a.accepts.clone();
        for (s, tag) in &b.accepts {
            accepts.entry(remap(*s)).or_insert_with(|| tag.clone());
        }

        Self {
            transitions,
            accepts,
        }
    }

    /// Concatenation: every accepting state of `self` falls through into the
    /// initial state of `other`.
    pub fn merge_connect(&self, other: &Self) -> Self {
        let offset = self.state_count();
        let mut transitions = self.transitions.clone();
        for &s in self.accepts.keys() {
            transitions[s].push(Transition {
                range: RuneRange::EPSILON,
                target: offset,
            });
        }
        transitions.extend(other.transitions.iter().map(|row| shifted(row, |s| s + offset)));

        let accepts = other
            .accepts
            .iter()
            .map(|(s, tag)| (s + offset, tag.clone()))
            .collect();

        Self {
            transitions,
            accepts,
        }
    }

    /// Kleene star. The initial state becomes the sole accepting state and
    /// inherits the tag of the lowest former accepting state.
    pub fn merge_kleene(&self) -> Self {
        let a = self.isolated();
        let mut transitions = a.transitions.clone();
        for &s in a.accepts.keys().filter(|&&s| s != 0) {
            transitions[s].push(Transition {
                range: RuneRange::EPSILON,
                target: 0,
            });
        }
        let tag = a.accepts.values().next().cloned().unwrap_or_default();
        Self {
            transitions,
            accepts: Some((0, tag)).into_iter().collect(),
        }
    }

    /// Extend `states` with everything reachable through epsilon transitions.
    fn close(&self, states: &mut BitSet) {
        let mut pending: Vec<usize> = states.iter().collect();
        while let Some(s) = pending.pop() {
            for t in self.transitions(s) {
                if t.range.is_epsilon() && states.insert(t.target) {
                    pending.push(t.target);
                }
            }
        }
    }

    /// Partition the used code points into maximal intervals that never
    /// cross a transition boundary.
    fn split_ranges(&self) -> Vec<RuneRange> {
        let labels: Vec<RuneRange> = self
            .transitions
            .iter()
            .flatten()
            .map(|t| t.range)
            .filter(|r| !r.is_epsilon())
            .collect();
        let points: BTreeSet<u32> = labels.iter().flat_map(|r| [r.start, r.end]).collect();
        let points: Vec<u32> = points.into_iter().collect();
        points
            .windows(2)
            .map(|w| RuneRange::new(w[0], w[1]))
            .filter(|interval| labels.iter().any(|r| r.covers(interval)))
            .collect()
    }

    /// Subset construction.
    pub fn to_dfa(&self) -> Dfa {
        let _enter = tracing::trace_span!("to_dfa").entered();

        let n = self.state_count();
        let ranges = self.split_ranges();

        let mut start = BitSet::with_capacity(n);
        start.insert(0);
        self.close(&mut start);

        let mut subsets = vec![start.clone()];
        let mut index = Map::<BitSet, usize>::default();
        index.insert(start, 0);

        let mut transitions = vec![];
        let mut current = 0;
        while current < subsets.len() {
            let mut row: Vec<Transition> = vec![];
            for range in &ranges {
                let mut target = BitSet::with_capacity(n);
                for s in subsets[current].iter() {
                    for t in &self.transitions[s] {
                        if !t.range.is_epsilon() && t.range.covers(range) {
                            target.insert(t.target);
                        }
                    }
                }
                if target.is_empty() {
                    continue;
                }
                self.close(&mut target);

                let target = match index.get(&target) {
                    Some(&id) => id,
                    None => {
                        let id = subsets.len();
                        subsets.push(target.clone());
                        index.insert(target, id);
                        id
                    }
                };

                match row.last_mut() {
                    Some(last) if last.target == target && last.range.end == range.start => {
                        last.range.end = range.end;
                    }
                    _ => row.push(Transition {
                        range: *range,
                        target,
                    }),
                }
            }
            transitions.push(row);
            current += 1;
        }

        // BitSet iterates in ascending order, so the lowest accepting NFA
        // state decides the tag.
        let accepts = subsets
            .iter()
            .enumerate()
            .filter_map(|(id, subset)| {
                let tag = subset.iter().find_map(|s| self.accepts.get(&s))?;
                Some((id, tag.clone()))
            })
            .collect();

        tracing::trace!(nfa = n, dfa = subsets.len(), "subset construction");

        Dfa {
            automaton: Self {
                transitions,
                accepts,
            },
        }
    }
}

fn shifted(row: &[Transition], remap: impl Fn(usize) -> usize) -> Vec<Transition> {
    row.iter()
        .map(|t| Transition {
            range: t.range,
            target: remap(t.target),
        })
        .collect()
}

impl fmt::Display for Automaton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (state, row) in self.transitions.iter().enumerate() {
            write!(f, "state {}", state)?;
            if let Some(tag) = self.tag(state) {
                write!(f, " (accept {:?})", tag)?;
            }
            writeln!(f)?;
            for t in row {
                writeln!(f, "  {} -> {}", t.range, t.target)?;
            }
        }
        Ok(())
    }
}

/// A deterministic automaton produced by [`Automaton::to_dfa`].
///
/// The transitions leaving each state are sorted and pairwise disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Dfa {
    automaton: Automaton,
}

impl Dfa {
    pub const INITIAL: usize = 0;

    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    pub fn state_count(&self) -> usize {
        self.automaton.state_count()
    }

    pub fn is_accepting(&self, state: usize) -> bool {
        self.automaton.is_accepting(state)
    }

    pub fn tag(&self, state: usize) -> Option<&str> {
        self.automaton.tag(state)
    }

    /// The state reached from `state` on `c`, or `None` on a dead transition.
    pub fn next_state(&self, state: usize, c: char) -> Option<usize> {
        let row = self.automaton.transitions(state);
        let c = c as u32;
        let i = row.partition_point(|t| t.range.end <= c);
        row.get(i)
            .filter(|t| t.range.contains(c))
            .map(|t| t.target)
    }

    /// Run the automaton over the whole of `input`, returning the tag of the
    /// final state if it accepts.
    pub fn matches(&self, input: &str) -> Option<&str> {
        let mut state = Self::INITIAL;
        for c in input.chars() {
            state = self.next_state(state, c)?;
        }
        self.tag(state)
    }
}

impl fmt::Display for Dfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.automaton.fmt(f)
    }
}
