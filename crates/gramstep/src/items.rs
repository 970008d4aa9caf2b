//! LR items, item closures and the closure graph shared by the LR pipelines.

use crate::{
    grammar::{Production, Terminal},
    sets::KeyVariables,
    stepping::{Halted, Point, Probe},
    table::ActionTable,
    types::{Map, Queue, Set},
    util::display_fn,
};
use serde::Serialize;
use std::{
    collections::BTreeSet,
    fmt,
    hash::Hash,
};

pub const COMPUTE_ITEM_CLOSURE: &str = "ComputeItemClosure";
pub const GENERATE_AUTOMATON: &str = "GenerateAutomaton";

/// Common interface of LR(0) and LR(1) items.
pub trait Item: Clone + Eq + Hash + Ord + Serialize {
    fn production(&self) -> usize;

    fn dot(&self) -> usize;

    /// The same item with the dot moved one symbol to the right.
    fn advanced(&self) -> Self;

    fn write(&self, productions: &[Production], f: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn core(&self) -> Lr0Item {
        Lr0Item {
            production: self.production(),
            dot: self.dot(),
        }
    }

    /// The symbol right after the dot, or `None` for a completed item.
    fn next_symbol<'p>(&self, productions: &'p [Production]) -> Option<&'p str> {
        productions
            .get(self.production())?
            .right
            .get(self.dot())
            .map(String::as_str)
    }
}

/// The LR(0) item, a.k.a. LR item core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Lr0Item {
    pub production: usize,
    pub dot: usize,
}

impl Item for Lr0Item {
    fn production(&self) -> usize {
        self.production
    }

    fn dot(&self) -> usize {
        self.dot
    }

    fn advanced(&self) -> Self {
        Self {
            dot: self.dot + 1,
            ..*self
        }
    }

    fn write(&self, productions: &[Production], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(production) = productions.get(self.production) else {
            return write!(f, "<unknown production {}>", self.production);
        };
        write!(f, "{} -> [", production.left)?;
        for (i, symbol) in production.right.iter().enumerate() {
            if i == self.dot {
                f.write_str(" .")?;
            }
            write!(f, " {}", symbol)?;
        }
        if production.right.len() <= self.dot {
            f.write_str(" .")?;
        }
        f.write_str(" ]")
    }
}

impl Lr0Item {
    pub fn display<'p>(&'p self, productions: &'p [Production]) -> impl fmt::Display + 'p {
        display_fn(move |f| self.write(productions, f))
    }
}

/// An LR(0) item extended with one lookahead terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Lr1Item {
    pub production: usize,
    pub dot: usize,
    pub lookahead: Terminal,
}

impl Item for Lr1Item {
    fn production(&self) -> usize {
        self.production
    }

    fn dot(&self) -> usize {
        self.dot
    }

    fn advanced(&self) -> Self {
        Self {
            dot: self.dot + 1,
            ..self.clone()
        }
    }

    fn write(&self, productions: &[Production], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core().write(productions, f)?;
        write!(f, ", {}", self.lookahead)
    }
}

impl Lr1Item {
    pub fn display<'p>(&'p self, productions: &'p [Production]) -> impl fmt::Display + 'p {
        display_fn(move |f| self.write(productions, f))
    }
}

/// A deduplicated item set. Two closures are equal when they hold the same
/// items, regardless of order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ItemClosure<I: Item> {
    items: Set<I>,
}

impl<I: Item> Default for ItemClosure<I> {
    fn default() -> Self {
        Self {
            items: Set::default(),
        }
    }
}

impl<I: Item> FromIterator<I> for ItemClosure<I> {
    fn from_iter<T: IntoIterator<Item = I>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<I: Item> ItemClosure<I> {
    pub fn insert(&mut self, item: I) -> bool {
        self.items.insert(item)
    }

    pub fn contains(&self, item: &I) -> bool {
        self.items.contains(item)
    }

    pub fn get(&self, index: usize) -> Option<&I> {
        self.items.get_index(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &I> + '_ {
        self.items.iter()
    }

    /// The set of `(production, dot)` pairs.
    pub fn core(&self) -> BTreeSet<Lr0Item> {
        self.items.iter().map(Item::core).collect()
    }

    fn key(&self) -> Vec<I> {
        let mut key: Vec<I> = self.items.iter().cloned().collect();
        key.sort();
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub symbol: String,
}

/// The distinct item closures of an LR automaton and the labelled edges
/// between them. Closure 0 is the initial state.
#[derive(Debug, Clone, Serialize)]
pub struct ClosureMap<I: Item> {
    closures: Vec<ItemClosure<I>>,
    edges: Vec<Edge>,
    #[serde(skip)]
    index: Map<Vec<I>, usize>,
}

impl<I: Item> Default for ClosureMap<I> {
    fn default() -> Self {
        Self {
            closures: vec![],
            edges: vec![],
            index: Map::default(),
        }
    }
}

impl<I: Item> ClosureMap<I> {
    pub fn closures(&self) -> &[ItemClosure<I>] {
        &self.closures
    }

    pub fn closure(&self, state: usize) -> Option<&ItemClosure<I>> {
        self.closures.get(state)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edges_from(&self, state: usize) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |e| e.from == state)
    }

    pub fn len(&self) -> usize {
        self.closures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    pub fn find(&self, closure: &ItemClosure<I>) -> Option<usize> {
        self.index.get(&closure.key()).copied()
    }

    /// Register `closure` unless an equal one exists. Returns its state
    /// number and whether it was newly added.
    pub fn find_or_append(&mut self, closure: ItemClosure<I>) -> (usize, bool) {
        let key = closure.key();
        if let Some(&state) = self.index.get(&key) {
            return (state, false);
        }
        let state = self.closures.len();
        tracing::trace!("register closure #{} ({} items)", state, closure.len());
        self.index.insert(key, state);
        self.closures.push(closure);
        (state, true)
    }

    pub fn add_edge(&mut self, from: usize, to: usize, symbol: impl Into<String>) {
        let edge = Edge {
            from,
            to,
            symbol: symbol.into(),
        };
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    /// Move the items of closure `from` into closure `into` and redirect
    /// every edge touching `from` to `into`. Closure `from` stays in place
    /// until [`ClosureMap::remove_closures`] is called.
    pub fn absorb(&mut self, into: usize, from: usize) {
        let Some(items) = self.closures.get(from).map(|c| c.items.clone()) else {
            return;
        };
        if let Some(target) = self.closures.get_mut(into) {
            target.items.extend(items);
        }
        for edge in &mut self.edges {
            if edge.from == from {
                edge.from = into;
            }
            if edge.to == from {
                edge.to = into;
            }
        }
    }

    /// Delete the closures in `states`, renumbering the remaining closures
    /// and the edge endpoints. Duplicate edges are dropped.
    pub fn remove_closures(&mut self, states: &BTreeSet<usize>) {
        for &state in states.iter().rev() {
            if state < self.closures.len() {
                self.closures.remove(state);
            }
        }
        let renumber = |state: usize| state - states.range(..state).count();

        let mut edges = Set::<Edge>::default();
        for edge in self.edges.drain(..) {
            if states.contains(&edge.from) || states.contains(&edge.to) {
                continue;
            }
            edges.insert(Edge {
                from: renumber(edge.from),
                to: renumber(edge.to),
                symbol: edge.symbol,
            });
        }
        self.edges = edges.into_iter().collect();

        self.index = self
            .closures
            .iter()
            .enumerate()
            .map(|(state, closure)| (closure.key(), state))
            .collect();
    }
}

impl<I: Item> ClosureMap<I> {
    pub fn display<'p>(&'p self, productions: &'p [Production]) -> impl fmt::Display + 'p {
        display_fn(move |f| {
            for (state, closure) in self.closures.iter().enumerate() {
                writeln!(f, "#### State {}", state)?;
                for item in closure.iter() {
                    f.write_str("- ")?;
                    item.write(productions, f)?;
                    writeln!(f)?;
                }
                for edge in self.edges_from(state) {
                    writeln!(f, "  --({})--> {}", edge.symbol, edge.to)?;
                }
            }
            Ok(())
        })
    }
}

/// Variables of the LR pipelines.
#[derive(Debug, Clone, Serialize)]
pub struct LrVariables<I: Item> {
    #[serde(flatten)]
    pub key: KeyVariables,
    pub closure_map: ClosureMap<I>,
    pub current_closure: Option<usize>,
    pub new_closure: Option<ItemClosure<I>>,
    pub table: Option<ActionTable>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub lalr_drop_closures: BTreeSet<usize>,
}

impl<I: Item> LrVariables<I> {
    pub fn new(productions: Vec<Production>) -> Self {
        Self {
            key: KeyVariables::new(productions),
            closure_map: ClosureMap::default(),
            current_closure: None,
            new_closure: None,
            table: None,
            lalr_drop_closures: BTreeSet::new(),
        }
    }
}

impl<I: Item> AsMut<KeyVariables> for LrVariables<I> {
    fn as_mut(&mut self) -> &mut KeyVariables {
        &mut self.key
    }
}

/// Build the closure graph reachable from `initial`.
///
/// `closure` extends a kernel to its item closure.
pub fn generate_automaton<I, F>(
    vars: &mut LrVariables<I>,
    initial: Vec<I>,
    closure: F,
    probe: &Probe,
) -> Result<(), Halted>
where
    I: Item,
    F: Fn(Vec<I>) -> ItemClosure<I>,
{
    let _enter = tracing::trace_span!("generate_automaton").entered();

    vars.closure_map = ClosureMap::default();
    vars.new_closure = Some(closure(initial));
    probe.report(Point::new(COMPUTE_ITEM_CLOSURE, 0), &*vars)?;
    if let Some(initial) = vars.new_closure.take() {
        vars.closure_map.find_or_append(initial);
    }
    probe.report(Point::new(GENERATE_AUTOMATON, 0), &*vars)?;

    let mut pending: Queue<usize> = [0].into_iter().collect();
    while let Some(state) = pending.pop() {
        vars.current_closure = Some(state);

        let mut kernels = Map::<String, Vec<I>>::default();
        if let Some(current) = vars.closure_map.closure(state) {
            for item in current.iter() {
                if let Some(symbol) = item.next_symbol(&vars.key.productions) {
                    kernels
                        .entry(symbol.to_owned())
                        .or_default()
                        .push(item.advanced());
                }
            }
        }
        probe.report(Point::new(GENERATE_AUTOMATON, 1), &*vars)?;

        for (symbol, kernel) in kernels {
            vars.new_closure = Some(closure(kernel));
            probe.report(Point::new(COMPUTE_ITEM_CLOSURE, 1), &*vars)?;

            let Some(next) = vars.new_closure.take() else {
                continue;
            };
            let (to, added) = vars.closure_map.find_or_append(next);
            if added {
                pending.push(to);
            }
            vars.closure_map.add_edge(state, to, symbol);
            probe.report(Point::new(GENERATE_AUTOMATON, 2), &*vars)?;
        }
    }

    vars.current_closure = None;
    tracing::debug!("generated {} closures", vars.closure_map.len());
    probe.report(Point::new(GENERATE_AUTOMATON, -1), &*vars)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn productions() -> Vec<Production> {
        vec![
            Production::new("S'", ["S"]),
            Production::new("S", ["(", "S", ")"]),
            Production::new("S", ["x"]),
        ]
    }

    #[test]
    fn closures_compare_as_sets() {
        let a: ItemClosure<Lr0Item> = [
            Lr0Item { production: 0, dot: 0 },
            Lr0Item { production: 1, dot: 0 },
        ]
        .into_iter()
        .collect();
        let b: ItemClosure<Lr0Item> = [
            Lr0Item { production: 1, dot: 0 },
            Lr0Item { production: 0, dot: 0 },
        ]
        .into_iter()
        .collect();
        assert_eq!(a, b);

        let mut map = ClosureMap::default();
        assert_eq!(map.find_or_append(a), (0, true));
        assert_eq!(map.find_or_append(b.clone()), (0, false));
        assert_eq!(map.find(&b), Some(0));
    }

    #[test]
    fn lr1_items_share_cores() {
        let closure: ItemClosure<Lr1Item> = [
            Lr1Item {
                production: 2,
                dot: 1,
                lookahead: Terminal::Eoi,
            },
            Lr1Item {
                production: 2,
                dot: 1,
                lookahead: Terminal::named(")"),
            },
        ]
        .into_iter()
        .collect();
        assert_eq!(closure.len(), 2);
        assert_eq!(
            closure.core().into_iter().collect::<Vec<_>>(),
            [Lr0Item { production: 2, dot: 1 }]
        );
    }

    #[test]
    fn item_display_marks_the_dot() {
        let productions = productions();
        let item = Lr0Item { production: 1, dot: 1 };
        assert_eq!(item.display(&productions).to_string(), "S -> [ ( . S ) ]");
        assert_eq!(item.next_symbol(&productions), Some("S"));

        let done = Lr1Item {
            production: 2,
            dot: 1,
            lookahead: Terminal::Eoi,
        };
        assert_eq!(done.display(&productions).to_string(), "S -> [ x . ], $eoi");
        assert_eq!(done.next_symbol(&productions), None);
    }

    #[test]
    fn absorbing_renumbers_edges() {
        let closure = |production, dot| -> ItemClosure<Lr0Item> {
            [Lr0Item { production, dot }].into_iter().collect()
        };
        let mut map = ClosureMap::default();
        for i in 0..4 {
            map.find_or_append(closure(i, 0));
        }
        map.add_edge(0, 1, "a");
        map.add_edge(0, 2, "b");
        map.add_edge(2, 3, "c");
        map.add_edge(1, 3, "c");

        map.absorb(1, 2);
        map.remove_closures(&[2].into_iter().collect());

        assert_eq!(map.len(), 3);
        assert_eq!(map.closure(1).map(|c| c.len()), Some(2));
        let edges: Vec<_> = map
            .edges()
            .iter()
            .map(|e| (e.from, e.to, e.symbol.as_str()))
            .collect();
        assert_eq!(edges, [(0, 1, "a"), (0, 1, "b"), (1, 2, "c")]);
        assert_eq!(map.find(&closure(3, 0)), Some(2));
    }
}
