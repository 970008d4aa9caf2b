//! The LR(0) and SLR(1) pipelines.

use crate::{
    automaton::Dfa,
    grammar::{Grammar, Production, Terminal},
    items::{self, ClosureMap, Item, ItemClosure, Lr0Item, LrVariables},
    pipeline::{self, Outcome, Pipeline, Source},
    sets::{self, SymbolSets},
    stepping::{Halted, Probe},
    syntax::Diagnostics,
    table::{self, ActionTable},
    types::Map,
};
use serde::Serialize;
use std::{ops::ControlFlow, sync::Arc};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Lr0Mode {
    /// Reduce on every terminal.
    Lr0,
    /// Reduce on the Follow set of the production's left side.
    Slr,
}

#[derive(Debug, Clone)]
pub struct Config {
    mode: Lr0Mode,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self { mode: Lr0Mode::Lr0 }
    }

    pub fn use_lr0(&mut self) -> &mut Self {
        self.mode = Lr0Mode::Lr0;
        self
    }

    pub fn use_slr(&mut self) -> &mut Self {
        self.mode = Lr0Mode::Slr;
        self
    }

    pub fn mode(&self) -> Lr0Mode {
        self.mode
    }
}

/// Everything an LR pipeline produces.
#[derive(Debug, Clone, Serialize)]
pub struct LrArtifacts<I: Item> {
    pub grammar: Grammar,
    pub productions: Vec<Production>,
    pub first: SymbolSets,
    pub follow: SymbolSets,
    pub closure_map: ClosureMap<I>,
    pub table: ActionTable,
    pub serial_names: Map<String, String>,
    pub diagnostics: Diagnostics,
}

impl<I: Item> LrArtifacts<I> {
    pub(crate) fn collect(
        grammar: Grammar,
        vars: LrVariables<I>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            serial_names: grammar.serial_names(),
            grammar,
            productions: vars.key.productions,
            first: vars.key.first,
            follow: vars.key.follow,
            closure_map: vars.closure_map,
            table: vars.table.unwrap_or_default(),
            diagnostics,
        }
    }
}

/// Add `S' → S` in front of the productions unless the start symbol
/// already has a single unit production and never occurs on a right side.
/// The start production is returned first.
pub fn augment(grammar: &mut Grammar) -> Vec<Production> {
    let start = grammar.start().to_owned();
    let alternatives = grammar.productions_of(&start);
    let referenced = grammar
        .productions()
        .any(|p| p.right.iter().any(|s| *s == start));
    let unit = match alternatives {
        [single] if single.right.len() == 1 && !referenced => Some(single.clone()),
        _ => None,
    };
    let start_production = match unit {
        Some(production) => production,
        None => {
            let augmented = grammar.add_new_nonterminal(&start);
            let production = Production::new(augmented.clone(), [start]);
            grammar.add_production(production.clone());
            grammar.set_start(augmented);
            production
        }
    };
    tracing::trace!("start production: {}", start_production);

    Some(start_production.clone())
        .into_iter()
        .chain(grammar.productions().filter(|p| **p != start_production).cloned())
        .collect()
}

/// LR(0) closure of `kernel`.
pub fn closure(
    productions: &[Production],
    grammar: &Grammar,
    kernel: Vec<Lr0Item>,
) -> ItemClosure<Lr0Item> {
    let mut closure: ItemClosure<Lr0Item> = kernel.into_iter().collect();
    let mut i = 0;
    while let Some(item) = closure.get(i).copied() {
        i += 1;
        let Some(symbol) = item.next_symbol(productions) else {
            continue;
        };
        if !grammar.is_nonterminal(symbol) {
            continue;
        }
        for (production, p) in productions.iter().enumerate() {
            if p.left == symbol {
                closure.insert(Lr0Item { production, dot: 0 });
            }
        }
    }
    closure
}

#[derive(Debug, Clone)]
pub struct Lr0Pipeline {
    config: Config,
    lexicon: Arc<Dfa>,
    source: Source,
}

impl Lr0Pipeline {
    pub fn new(config: Config, lexicon: Arc<Dfa>, source: Source) -> Self {
        Self {
            config,
            lexicon,
            source,
        }
    }
}

impl Pipeline for Lr0Pipeline {
    type Artifacts = LrArtifacts<Lr0Item>;

    fn run(self, probe: &Probe) -> Result<Outcome<Self::Artifacts>, Halted> {
        let _enter = tracing::trace_span!("lr0", file = %self.source.file).entered();

        pipeline::enter_stage(probe, 0, &self.source)?;
        let parsed = match pipeline::parse_code(&self.lexicon, &self.source, probe)? {
            ControlFlow::Continue(parsed) => parsed,
            ControlFlow::Break(outcome) => return Ok(outcome),
        };
        let mut grammar = parsed.grammar;
        let mut vars = LrVariables::new(augment(&mut grammar));

        pipeline::enter_stage(probe, 1, &vars)?;
        sets::compute_first(&grammar, &mut vars, probe)?;
        sets::compute_follow(&grammar, &mut vars, probe)?;

        pipeline::enter_stage(probe, 2, &vars)?;
        let productions = vars.key.productions.clone();
        items::generate_automaton(
            &mut vars,
            vec![Lr0Item {
                production: 0,
                dot: 0,
            }],
            |kernel| closure(&productions, &grammar, kernel),
            probe,
        )?;

        pipeline::enter_stage(probe, 3, &vars)?;
        let mut all_terminals: Vec<Terminal> =
            grammar.terminals().map(Terminal::named).collect();
        all_terminals.push(Terminal::Eoi);
        let mode = self.config.mode;
        let conflicts = table::generate_table(
            &grammar,
            &mut vars,
            |item, vars| match mode {
                Lr0Mode::Lr0 => all_terminals.clone(),
                Lr0Mode::Slr => {
                    let left = &vars.key.productions[item.production].left;
                    vars.key
                        .follow
                        .get(left)
                        .map(|follow| follow.iter().cloned().collect())
                        .unwrap_or_default()
                }
            },
            probe,
        )?;
        if !conflicts.is_empty() {
            tracing::debug!("{:?} table has {} conflicts", mode, conflicts.len());
            return Ok(Outcome::Conflict { conflicts });
        }

        Ok(Outcome::Success {
            artifacts: LrArtifacts::collect(grammar, vars, parsed.diagnostics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{syntax::lexicon::lexicon, table::Action};

    fn run(mode: Lr0Mode, text: &str) -> Outcome<LrArtifacts<Lr0Item>> {
        let mut config = Config::new();
        if mode == Lr0Mode::Slr {
            config.use_slr();
        }
        let lexicon = Arc::new(lexicon().unwrap());
        pipeline::run(Lr0Pipeline::new(config, lexicon, Source::new("test", text))).unwrap()
    }

    const EXPRESSION: &str = "\
@E
E := E + T
   | T
T := T * F
   | F
F := ( E )
   | id
";

    #[test]
    fn augments_unless_start_is_a_lone_unit_production() {
        let mut g = Grammar::new(
            "E",
            [
                Production::new("E", ["E", "+", "id"]),
                Production::new("E", ["id"]),
            ],
        );
        let productions = augment(&mut g);
        assert_eq!(productions[0], Production::new("E_0", ["E"]));
        assert_eq!(g.start(), "E_0");
        assert_eq!(productions.len(), 3);

        let mut g = Grammar::new(
            "S",
            [Production::new("S", ["E"]), Production::new("E", ["id"])],
        );
        let productions = augment(&mut g);
        assert_eq!(productions[0], Production::new("S", ["E"]));
        assert_eq!(g.start(), "S");
        assert_eq!(productions.len(), 2);
    }

    #[test]
    fn closure_adds_nonkernel_items() {
        let mut g = Grammar::new(
            "S",
            [Production::new("S", ["(", "S", ")"]), Production::new("S", ["x"])],
        );
        let productions = augment(&mut g);
        let c = closure(&productions, &g, vec![Lr0Item { production: 0, dot: 0 }]);
        assert_eq!(c.len(), 3);
        assert!(c.contains(&Lr0Item { production: 1, dot: 0 }));
        assert!(c.contains(&Lr0Item { production: 2, dot: 0 }));
    }

    #[test]
    fn slr_accepts_expression_grammar() {
        let outcome = run(Lr0Mode::Slr, EXPRESSION);
        assert_eq!(outcome.code(), 0);
        let artifacts = outcome.into_artifacts().unwrap();
        assert_eq!(artifacts.closure_map.len(), 12);
        assert!(artifacts.table.conflicts().is_empty());

        let accepting = artifacts
            .table
            .rows
            .iter()
            .filter(|row| row.actions.get(&Terminal::Eoi) == Some(&Action::Accept))
            .count();
        assert_eq!(accepting, 1);
        assert_eq!(artifacts.table.goto(0, "E"), Some(1));
    }

    #[test]
    fn lr0_conflicts_on_expression_grammar() {
        let outcome = run(Lr0Mode::Lr0, EXPRESSION);
        assert_eq!(outcome.code(), 3);
        let Outcome::Conflict { conflicts } = outcome else {
            panic!("expected conflicts");
        };
        assert!(conflicts
            .iter()
            .any(|c| c.symbol == Terminal::named("*") && c.shift.is_some()));
    }

    #[test]
    fn lr0_accepts_parenthesis_grammar() {
        let outcome = run(Lr0Mode::Lr0, "S := ( S ) | x\n");
        assert!(outcome.is_success());
    }

    #[test]
    fn slr_conflicts_on_assignment_grammar() {
        let outcome = run(Lr0Mode::Slr, "S := L = R | R\nL := * R | id\nR := L\n");
        let Outcome::Conflict { conflicts } = outcome else {
            panic!("expected conflicts");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].symbol, Terminal::named("="));
    }

    #[test]
    fn missing_start_symbol() {
        assert_eq!(run(Lr0Mode::Slr, "@X\nS := a\n").code(), 2);
    }
}
