//! The canonical LR(1) and LALR(1) pipelines.

use crate::{
    automaton::Dfa,
    grammar::{Grammar, Production, Terminal},
    items::{self, Item, ItemClosure, Lr0Item, Lr1Item, LrVariables},
    lr0::{augment, LrArtifacts},
    pipeline::{self, Outcome, Pipeline, Source},
    sets::{self, first_of, SymbolSets},
    stepping::{Halted, Point, Probe},
    table,
};
use serde::Serialize;
use std::{collections::BTreeSet, ops::ControlFlow, sync::Arc};

pub const MERGE_ITEM_CLOSURE: &str = "MergeItemClosure";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Lr1Mode {
    /// Knuth's canonical LR(1): item sets are distinguished by their
    /// lookaheads.
    Canonical,
    /// Item sets with the same LR(0) core are merged.
    Lalr,
}

#[derive(Debug, Clone)]
pub struct Config {
    mode: Lr1Mode,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self {
            mode: Lr1Mode::Canonical,
        }
    }

    pub fn use_canonical(&mut self) -> &mut Self {
        self.mode = Lr1Mode::Canonical;
        self
    }

    pub fn use_lalr(&mut self) -> &mut Self {
        self.mode = Lr1Mode::Lalr;
        self
    }

    pub fn mode(&self) -> Lr1Mode {
        self.mode
    }
}

/// LR(1) closure of `kernel`.
///
/// For an item `[A → α . B β, a]`, every production `B → γ` is added with
/// each lookahead in `First(β a)`.
pub fn closure(
    productions: &[Production],
    grammar: &Grammar,
    first: &SymbolSets,
    kernel: Vec<Lr1Item>,
) -> ItemClosure<Lr1Item> {
    let mut closure: ItemClosure<Lr1Item> = kernel.into_iter().collect();
    let mut i = 0;
    while let Some(item) = closure.get(i).cloned() {
        i += 1;
        let Some(symbol) = item.next_symbol(productions) else {
            continue;
        };
        if !grammar.is_nonterminal(symbol) {
            continue;
        }

        let rest = &productions[item.production].right[item.dot + 1..];
        let mut lookaheads = first_of(first, grammar, rest);
        if lookaheads.remove(&Terminal::Epsilon) {
            lookaheads.insert(item.lookahead.clone());
        }

        for (production, p) in productions.iter().enumerate() {
            if p.left != symbol {
                continue;
            }
            for lookahead in &lookaheads {
                closure.insert(Lr1Item {
                    production,
                    dot: 0,
                    lookahead: lookahead.clone(),
                });
            }
        }
    }
    closure
}

/// Merge the closures sharing an LR(0) core into the one with the lowest
/// state number, then drop the merged-away closures.
fn merge_lalr(vars: &mut LrVariables<Lr1Item>, probe: &Probe) -> Result<(), Halted> {
    let _enter = tracing::trace_span!("merge_lalr").entered();

    vars.lalr_drop_closures.clear();
    probe.report(Point::new(MERGE_ITEM_CLOSURE, 0), &*vars)?;

    let cores: Vec<BTreeSet<Lr0Item>> = vars
        .closure_map
        .closures()
        .iter()
        .map(ItemClosure::core)
        .collect();
    for i in 0..cores.len() {
        if vars.lalr_drop_closures.contains(&i) {
            continue;
        }
        vars.current_closure = Some(i);
        for j in i + 1..cores.len() {
            if vars.lalr_drop_closures.contains(&j) || cores[i] != cores[j] {
                continue;
            }
            vars.closure_map.absorb(i, j);
            vars.lalr_drop_closures.insert(j);
            probe.report(Point::new(MERGE_ITEM_CLOSURE, 1), &*vars)?;
        }
    }

    let before = vars.closure_map.len();
    vars.closure_map.remove_closures(&vars.lalr_drop_closures);
    vars.current_closure = None;
    tracing::debug!(
        "merged {} closures into {}",
        before,
        vars.closure_map.len()
    );
    probe.report(Point::new(MERGE_ITEM_CLOSURE, -1), &*vars)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Lr1Pipeline {
    config: Config,
    lexicon: Arc<Dfa>,
    source: Source,
}

impl Lr1Pipeline {
    pub fn new(config: Config, lexicon: Arc<Dfa>, source: Source) -> Self {
        Self {
            config,
            lexicon,
            source,
        }
    }
}

impl Pipeline for Lr1Pipeline {
    type Artifacts = LrArtifacts<Lr1Item>;

    fn run(self, probe: &Probe) -> Result<Outcome<Self::Artifacts>, Halted> {
        let _enter = tracing::trace_span!("lr1", file = %self.source.file).entered();

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
        let first = vars.key.first.clone();
        items::generate_automaton(
            &mut vars,
            vec![Lr1Item {
                production: 0,
                dot: 0,
                lookahead: Terminal::Eoi,
            }],
            |kernel| closure(&productions, &grammar, &first, kernel),
            probe,
        )?;
        if self.config.mode == Lr1Mode::Lalr {
            merge_lalr(&mut vars, probe)?;
        }

        pipeline::enter_stage(probe, 3, &vars)?;
        let conflicts = table::generate_table(
            &grammar,
            &mut vars,
            |item, _| vec![item.lookahead.clone()],
            probe,
        )?;
        if !conflicts.is_empty() {
            tracing::debug!(
                "{:?} table has {} conflicts",
                self.config.mode,
                conflicts.len()
            );
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

    const ASSIGNMENT: &str = "S := L = R | R\nL := * R | id\nR := L\n";

    fn run(mode: Lr1Mode, text: &str) -> Outcome<LrArtifacts<Lr1Item>> {
        let mut config = Config::new();
        if mode == Lr1Mode::Lalr {
            config.use_lalr();
        }
        let lexicon = Arc::new(lexicon().unwrap());
        pipeline::run(Lr1Pipeline::new(config, lexicon, Source::new("test", text))).unwrap()
    }

    #[test]
    fn closure_propagates_lookaheads() {
        let mut g = Grammar::new(
            "S",
            [
                Production::new("S", ["C", "C"]),
                Production::new("C", ["c", "C"]),
                Production::new("C", ["d"]),
            ],
        );
        let productions = augment(&mut g);
        let mut vars = LrVariables::<Lr1Item>::new(productions.clone());
        sets::compute_first(&g, &mut vars, &Probe::detached()).unwrap();

        let initial = Lr1Item {
            production: 0,
            dot: 0,
            lookahead: Terminal::Eoi,
        };
        let c = closure(&productions, &g, &vars.key.first, vec![initial]);
        assert_eq!(c.len(), 6);
        for lookahead in ["c", "d"] {
            assert!(c.contains(&Lr1Item {
                production: 2,
                dot: 0,
                lookahead: Terminal::named(lookahead),
            }));
        }
        assert!(!c.contains(&Lr1Item {
            production: 2,
            dot: 0,
            lookahead: Terminal::Eoi,
        }));
    }

    #[test]
    fn canonical_lr1_accepts_assignment_grammar() {
        let outcome = run(Lr1Mode::Canonical, ASSIGNMENT);
        assert_eq!(outcome.code(), 0);
        let artifacts = outcome.into_artifacts().unwrap();
        assert_eq!(artifacts.closure_map.len(), 14);
        assert_eq!(
            artifacts.table.action(0, &Terminal::named("id")),
            Some(&Action::Shift(5))
        );
    }

    #[test]
    fn lalr_merges_states_without_conflicts() {
        let canonical = run(Lr1Mode::Canonical, ASSIGNMENT)
            .into_artifacts()
            .unwrap();
        let lalr = run(Lr1Mode::Lalr, ASSIGNMENT).into_artifacts().unwrap();
        assert!(lalr.closure_map.len() <= canonical.closure_map.len());
        assert_eq!(lalr.closure_map.len(), 10);
        assert!(lalr.table.conflicts().is_empty());

        for edge in lalr.closure_map.edges() {
            assert!(edge.from < 10 && edge.to < 10);
        }
        let cores: BTreeSet<_> = lalr
            .closure_map
            .closures()
            .iter()
            .map(ItemClosure::core)
            .collect();
        assert_eq!(cores.len(), 10);
    }

    #[test]
    fn lalr_reports_merged_closures() {
        let lexicon = Arc::new(lexicon().unwrap());
        let mut config = Config::new();
        config.use_lalr();
        let pipeline = Lr1Pipeline::new(config, lexicon, Source::new("test", ASSIGNMENT));

        let controller = pipeline::spawn(pipeline);
        controller.wait_paused();
        controller.add_breakpoint(Point::new(MERGE_ITEM_CLOSURE, -1));
        controller.resume();
        controller.wait_paused();
        let snapshot = controller.variables().unwrap();
        let dropped = snapshot.variables["lalr_drop_closures"].as_array().unwrap();
        assert_eq!(dropped.len(), 4);

        controller.resume();
        assert!(controller.join().unwrap().is_success());
    }

    #[test]
    fn lalr_reduce_reduce_conflict() {
        let text = "\
S := a A d | b B d | a B e | b A e
A := c
B := c
";
        assert!(run(Lr1Mode::Canonical, text).is_success());
        let Outcome::Conflict { conflicts } = run(Lr1Mode::Lalr, text) else {
            panic!("expected conflicts");
        };
        assert!(conflicts
            .iter()
            .all(|c| c.reason == table::ConflictReason::ReduceReduce));
    }
}
