//! Calculation of First and Follow sets.
//!
//! Both run a fixpoint iteration over the production list of the pipeline
//! that calls them and report their progress at the `ComputeFirstSet` and
//! `ComputeFollowSet` instrumentation points.

use crate::{
    grammar::{Grammar, Production, Terminal},
    stepping::{Halted, Point, Probe},
    types::Map,
};
use serde::Serialize;
use std::collections::BTreeSet;

pub const COMPUTE_FIRST_SET: &str = "ComputeFirstSet";
pub const COMPUTE_FOLLOW_SET: &str = "ComputeFollowSet";

/// Sets of terminals keyed by nonterminal.
pub type SymbolSets = Map<String, BTreeSet<Terminal>>;

/// The variables every pipeline exposes to the stepping controller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyVariables {
    pub productions: Vec<Production>,
    pub loop_i: Option<usize>,
    pub loop_j: Option<usize>,
    pub loop_k: Option<usize>,
    pub modified: bool,
    pub nonterminal_order: Vec<String>,
    pub current_production: Option<Production>,
    pub first: SymbolSets,
    pub follow: SymbolSets,
}

impl KeyVariables {
    pub fn new(productions: Vec<Production>) -> Self {
        Self {
            productions,
            ..Default::default()
        }
    }

    pub fn reset_loops(&mut self) {
        self.loop_i = None;
        self.loop_j = None;
        self.loop_k = None;
        self.current_production = None;
    }
}

impl AsMut<KeyVariables> for KeyVariables {
    fn as_mut(&mut self) -> &mut KeyVariables {
        self
    }
}

/// `First(symbols)`, with [`Terminal::Epsilon`] in the result when the whole
/// sequence is nullable.
pub fn first_of<S>(first: &SymbolSets, grammar: &Grammar, symbols: &[S]) -> BTreeSet<Terminal>
where
    S: AsRef<str>,
{
    let mut res = BTreeSet::new();
    for symbol in symbols {
        let symbol = symbol.as_ref();
        if !grammar.is_nonterminal(symbol) {
            res.insert(Terminal::named(symbol));
            return res;
        }
        let Some(set) = first.get(symbol) else {
            return res;
        };
        res.extend(set.iter().filter(|t| **t != Terminal::Epsilon).cloned());
        if !set.contains(&Terminal::Epsilon) {
            return res;
        }
    }
    res.insert(Terminal::Epsilon);
    res
}

/// Compute First sets of every nonterminal into `work.first`.
pub fn compute_first<W>(grammar: &Grammar, work: &mut W, probe: &Probe) -> Result<(), Halted>
where
    W: Serialize + AsMut<KeyVariables>,
{
    let _enter = tracing::trace_span!("compute_first").entered();

    {
        let vars = work.as_mut();
        vars.first = grammar
            .nonterminals()
            .map(|n| (n.to_owned(), BTreeSet::new()))
            .collect();
        vars.modified = true;
    }
    probe.report(Point::new(COMPUTE_FIRST_SET, 0), &*work)?;

    let mut rounds = 0;
    while work.as_mut().modified {
        work.as_mut().modified = false;
        rounds += 1;

        let len = work.as_mut().productions.len();
        for i in 0..len {
            let vars = work.as_mut();
            let production = vars.productions[i].clone();
            vars.loop_i = Some(i);

            let added = first_of(&vars.first, grammar, &production.right);
            let set = vars.first.entry(production.left.clone()).or_default();
            let before = set.len();
            set.extend(added);
            let changed = set.len() != before;
            vars.modified |= changed;
            vars.current_production = Some(production);

            probe.report(Point::new(COMPUTE_FIRST_SET, 1), &*work)?;
            if changed {
                probe.report(Point::new(COMPUTE_FIRST_SET, 2), &*work)?;
            }
        }
    }

    work.as_mut().reset_loops();
    tracing::trace!("first sets settled after {} rounds", rounds);
    probe.report(Point::new(COMPUTE_FIRST_SET, -1), &*work)?;
    Ok(())
}

/// Compute Follow sets of every nonterminal into `work.follow`.
///
/// Requires `work.first` to be computed already. Follow of the start symbol
/// contains [`Terminal::Eoi`].
pub fn compute_follow<W>(grammar: &Grammar, work: &mut W, probe: &Probe) -> Result<(), Halted>
where
    W: Serialize + AsMut<KeyVariables>,
{
    let _enter = tracing::trace_span!("compute_follow").entered();

    {
        let vars = work.as_mut();
        vars.follow = grammar
            .nonterminals()
            .map(|n| (n.to_owned(), BTreeSet::new()))
            .collect();
        vars.follow
            .entry(grammar.start().to_owned())
            .or_default()
            .insert(Terminal::Eoi);
        vars.modified = true;
    }
    probe.report(Point::new(COMPUTE_FOLLOW_SET, 0), &*work)?;

    let mut rounds = 0;
    while work.as_mut().modified {
        work.as_mut().modified = false;
        rounds += 1;

        let len = work.as_mut().productions.len();
        for i in 0..len {
            let production = {
                let vars = work.as_mut();
                vars.loop_i = Some(i);
                vars.current_production = Some(vars.productions[i].clone());
                vars.productions[i].clone()
            };

            for (j, symbol) in production.right.iter().enumerate() {
                if !grammar.is_nonterminal(symbol) {
                    continue;
                }
                let vars = work.as_mut();
                vars.loop_j = Some(j);
                vars.loop_k = Some(j + 1);

                let rest = first_of(&vars.first, grammar, &production.right[j + 1..]);
                let mut added: BTreeSet<Terminal> = rest
                    .iter()
                    .filter(|t| **t != Terminal::Epsilon)
                    .cloned()
                    .collect();
                if rest.contains(&Terminal::Epsilon) {
                    if let Some(follow) = vars.follow.get(&production.left) {
                        added.extend(follow.iter().cloned());
                    }
                }

                let set = vars.follow.entry(symbol.clone()).or_default();
                let before = set.len();
                set.extend(added);
                let changed = set.len() != before;
                vars.modified |= changed;

                probe.report(Point::new(COMPUTE_FOLLOW_SET, 1), &*work)?;
                if changed {
                    probe.report(Point::new(COMPUTE_FOLLOW_SET, 2), &*work)?;
                }
            }
        }
    }

    work.as_mut().reset_loops();
    tracing::trace!("follow sets settled after {} rounds", rounds);
    probe.report(Point::new(COMPUTE_FOLLOW_SET, -1), &*work)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expression_grammar() -> Grammar {
        Grammar::new(
            "E",
            [
                Production::new("E", ["T", "E'"]),
                Production::new("E'", ["+", "T", "E'"]),
                Production::new("E'", Vec::<String>::new()),
                Production::new("T", ["F", "T'"]),
                Production::new("T'", ["*", "F", "T'"]),
                Production::new("T'", Vec::<String>::new()),
                Production::new("F", ["(", "E", ")"]),
                Production::new("F", ["id"]),
            ],
        )
    }

    fn sets(grammar: &Grammar) -> KeyVariables {
        let mut vars = KeyVariables::new(grammar.productions().cloned().collect());
        compute_first(grammar, &mut vars, &Probe::detached()).unwrap();
        compute_follow(grammar, &mut vars, &Probe::detached()).unwrap();
        vars
    }

    fn terminals(names: &[&str]) -> BTreeSet<Terminal> {
        names
            .iter()
            .map(|name| match *name {
                "$eoi" => Terminal::Eoi,
                "ε" => Terminal::Epsilon,
                name => Terminal::named(name),
            })
            .collect()
    }

    #[test]
    fn first_sets_of_expression_grammar() {
        let vars = sets(&expression_grammar());
        assert_eq!(vars.first["E"], terminals(&["(", "id"]));
        assert_eq!(vars.first["E'"], terminals(&["+", "ε"]));
        assert_eq!(vars.first["T'"], terminals(&["*", "ε"]));
        assert_eq!(vars.first["F"], terminals(&["(", "id"]));
    }

    #[test]
    fn follow_sets_of_expression_grammar() {
        let vars = sets(&expression_grammar());
        assert_eq!(vars.follow["E"], terminals(&["$eoi", ")"]));
        assert_eq!(vars.follow["E'"], terminals(&["$eoi", ")"]));
        assert_eq!(vars.follow["T"], terminals(&["$eoi", ")", "+"]));
        assert_eq!(vars.follow["F"], terminals(&["$eoi", ")", "*", "+"]));
    }

    #[test]
    fn recomputing_changes_nothing() {
        let grammar = expression_grammar();
        let mut vars = sets(&grammar);
        let (first, follow) = (vars.first.clone(), vars.follow.clone());

        compute_first(&grammar, &mut vars, &Probe::detached()).unwrap();
        compute_follow(&grammar, &mut vars, &Probe::detached()).unwrap();
        assert_eq!(vars.first, first);
        assert_eq!(vars.follow, follow);
        assert_eq!(vars.loop_i, None);
    }

    #[test]
    fn sequence_first_stops_at_non_nullable_symbol() {
        let grammar = expression_grammar();
        let vars = sets(&grammar);
        assert_eq!(
            first_of(&vars.first, &grammar, &["E'", "T'"]),
            terminals(&["*", "+", "ε"])
        );
        assert_eq!(
            first_of(&vars.first, &grammar, &["E'", ")"]),
            terminals(&[")", "+"])
        );
        assert_eq!(first_of::<&str>(&vars.first, &grammar, &[]), terminals(&["ε"]));
    }
}
