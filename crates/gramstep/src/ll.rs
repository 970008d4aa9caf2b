//! The LL(1) pipeline.
//!
//! Parse → RemoveLeftRecursion → ExtractCommonPrefix → First → Follow →
//! Select → CheckSelectConflict → GenerateTable. The two translation steps
//! can be turned off with [`Config::no_translate`].

use crate::{
    automaton::Dfa,
    grammar::{Grammar, Production, Terminal},
    pipeline::{self, Outcome, Pipeline, Source},
    sets::{self, first_of, KeyVariables, SymbolSets},
    stepping::{Halted, Point, Probe},
    syntax::Diagnostics,
    types::Map,
};
use serde::Serialize;
use std::{collections::BTreeSet, ops::ControlFlow, sync::Arc};

pub const REMOVE_LEFT_RECURSION: &str = "RemoveLeftRecursion";
pub const EXTRACT_COMMON_PREFIX: &str = "ExtractCommonPrefix";
pub const COMPUTE_SELECT_SET: &str = "ComputeSelectSet";
pub const CHECK_SELECT_CONFLICT: &str = "CheckSelectConflict";
pub const GENERATE_TABLE: &str = "GenerateTable";

#[derive(Debug, Clone)]
pub struct Config {
    translate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self { translate: true }
    }

    /// Skip left recursion removal and left factoring.
    pub fn no_translate(&mut self) -> &mut Self {
        self.translate = false;
        self
    }

    pub fn translates(&self) -> bool {
        self.translate
    }
}

/// Two alternatives of one nonterminal that can start with the same
/// terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectConflict {
    pub nonterminal: String,
    pub productions: (usize, usize),
    pub symbols: BTreeSet<Terminal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LlEntry {
    Production(usize),
    Conflict(Vec<usize>),
}

/// Nonterminal × terminal → production index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LlTable {
    pub rows: Map<String, Map<Terminal, LlEntry>>,
}

impl LlTable {
    /// Build the table from per-production Select sets. A cell claimed by
    /// several productions becomes [`LlEntry::Conflict`].
    pub fn from_select(productions: &[Production], select: &[BTreeSet<Terminal>]) -> Self {
        let mut rows = Map::<String, Map<Terminal, LlEntry>>::default();
        for (i, (production, symbols)) in productions.iter().zip(select).enumerate() {
            let row = rows.entry(production.left.clone()).or_default();
            for symbol in symbols {
                let entry = match row.swap_remove(symbol) {
                    None => LlEntry::Production(i),
                    Some(LlEntry::Production(j)) => LlEntry::Conflict(vec![j, i]),
                    Some(LlEntry::Conflict(mut all)) => {
                        all.push(i);
                        LlEntry::Conflict(all)
                    }
                };
                row.insert(symbol.clone(), entry);
            }
        }
        for row in rows.values_mut() {
            row.sort_keys();
        }
        Self { rows }
    }

    pub fn get(&self, nonterminal: &str, symbol: &Terminal) -> Option<&LlEntry> {
        self.rows.get(nonterminal)?.get(symbol)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LlVariables {
    #[serde(flatten)]
    pub key: KeyVariables,
    pub grammar: Grammar,
    pub select: Vec<BTreeSet<Terminal>>,
    pub conflicts: Vec<SelectConflict>,
    pub table: Option<LlTable>,
}

impl AsMut<KeyVariables> for LlVariables {
    fn as_mut(&mut self) -> &mut KeyVariables {
        &mut self.key
    }
}

impl LlVariables {
    fn new(grammar: Grammar) -> Self {
        Self {
            key: KeyVariables::new(grammar.productions().cloned().collect()),
            grammar,
            select: vec![],
            conflicts: vec![],
            table: None,
        }
    }

    fn sync_productions(&mut self) {
        self.key.productions = self.grammar.productions().cloned().collect();
    }
}

/// Everything the LL(1) pipeline produces.
#[derive(Debug, Clone, Serialize)]
pub struct LlArtifacts {
    pub grammar: Grammar,
    pub productions: Vec<Production>,
    pub first: SymbolSets,
    pub follow: SymbolSets,
    pub select: Vec<BTreeSet<Terminal>>,
    pub table: LlTable,
    pub serial_names: Map<String, String>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone)]
pub struct LlPipeline {
    config: Config,
    lexicon: Arc<Dfa>,
    source: Source,
}

impl LlPipeline {
    pub fn new(config: Config, lexicon: Arc<Dfa>, source: Source) -> Self {
        Self {
            config,
            lexicon,
            source,
        }
    }
}

impl Pipeline for LlPipeline {
    type Artifacts = LlArtifacts;

    fn run(self, probe: &Probe) -> Result<Outcome<LlArtifacts>, Halted> {
        let _enter = tracing::trace_span!("ll", file = %self.source.file).entered();

        pipeline::enter_stage(probe, 0, &self.source)?;
        let parsed = match pipeline::parse_code(&self.lexicon, &self.source, probe)? {
            ControlFlow::Continue(parsed) => parsed,
            ControlFlow::Break(outcome) => return Ok(outcome),
        };
        let mut vars = LlVariables::new(parsed.grammar);

        if self.config.translate {
            pipeline::enter_stage(probe, 1, &vars)?;
            remove_left_recursion(&mut vars, probe)?;
            extract_common_prefix(&mut vars, probe)?;
        }

        pipeline::enter_stage(probe, 2, &vars)?;
        let grammar = vars.grammar.clone();
        sets::compute_first(&grammar, &mut vars, probe)?;
        sets::compute_follow(&grammar, &mut vars, probe)?;
        compute_select(&mut vars, probe)?;

        pipeline::enter_stage(probe, 3, &vars)?;
        check_select_conflict(&mut vars, probe)?;
        if !vars.conflicts.is_empty() {
            tracing::debug!("{} select conflicts", vars.conflicts.len());
            return Ok(Outcome::SelectConflict {
                conflicts: vars.conflicts,
            });
        }
        generate_table(&mut vars, probe)?;

        let table = vars.table.take().unwrap_or_default();
        Ok(Outcome::Success {
            artifacts: LlArtifacts {
                serial_names: vars.grammar.serial_names(),
                grammar: vars.grammar,
                productions: vars.key.productions,
                first: vars.key.first,
                follow: vars.key.follow,
                select: vars.select,
                table,
                diagnostics: parsed.diagnostics,
            },
        })
    }
}

/// Remove left recursion, direct and indirect.
///
/// Nonterminals are processed in sorted order. Every `Ai → Aj γ` with
/// `j < i` is expanded by the alternatives of `Aj`, then direct recursion of
/// `Ai` is replaced by a fresh right-recursive nonterminal.
fn remove_left_recursion(vars: &mut LlVariables, probe: &Probe) -> Result<(), Halted> {
    let _enter = tracing::trace_span!("remove_left_recursion").entered();

    vars.key.nonterminal_order = vars.grammar.sorted_nonterminals();
    probe.report(Point::new(REMOVE_LEFT_RECURSION, 0), &*vars)?;

    let order = vars.key.nonterminal_order.clone();
    for (i, ai) in order.iter().enumerate() {
        vars.key.loop_i = Some(i);

        for (j, aj) in order[..i].iter().enumerate() {
            vars.key.loop_j = Some(j);
            let targets: Vec<Production> = vars
                .grammar
                .productions_of(ai)
                .iter()
                .filter(|p| p.right.first() == Some(aj))
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }
            let replacements = vars.grammar.productions_of(aj).to_vec();
            for target in targets {
                vars.grammar.remove_production(&target);
                for delta in &replacements {
                    let right = delta.right.iter().chain(&target.right[1..]).cloned();
                    vars.grammar.add_production(Production::new(ai.clone(), right));
                }
                vars.key.current_production = Some(target);
            }
            vars.sync_productions();
            probe.report(Point::new(REMOVE_LEFT_RECURSION, 1), &*vars)?;
        }
        vars.key.loop_j = None;

        if remove_direct_left_recursion(&mut vars.grammar, ai) {
            vars.sync_productions();
            probe.report(Point::new(REMOVE_LEFT_RECURSION, 2), &*vars)?;
        }
    }

    vars.key.reset_loops();
    probe.report(Point::new(REMOVE_LEFT_RECURSION, -1), &*vars)?;
    Ok(())
}

/// `A → A α | β` becomes `A → β A'`, `A' → α A' | ε`. Returns `false` if
/// `A` has no left-recursive alternative.
fn remove_direct_left_recursion(grammar: &mut Grammar, a: &str) -> bool {
    let alternatives = grammar.productions_of(a).to_vec();
    let (recursive, others): (Vec<_>, Vec<_>) = alternatives
        .into_iter()
        .partition(|p| p.right.first().map(String::as_str) == Some(a));
    if recursive.is_empty() {
        return false;
    }

    for p in recursive.iter().chain(&others) {
        grammar.remove_production(p);
    }
    let alphas: Vec<&[String]> = recursive
        .iter()
        .map(|p| &p.right[1..])
        .filter(|alpha| !alpha.is_empty())
        .collect();
    if alphas.is_empty() {
        tracing::trace!("dropped cycle {} := {}", a, a);
        for p in others {
            grammar.add_production(p);
        }
        return true;
    }

    let tail = grammar.add_new_nonterminal(a);
    tracing::trace!("{} is left recursive, introduced {}", a, tail);
    for beta in others {
        let right = beta.right.into_iter().chain(Some(tail.clone()));
        grammar.add_production(Production::new(a, right));
    }
    for alpha in alphas {
        let right = alpha.iter().cloned().chain(Some(tail.clone()));
        grammar.add_production(Production::new(tail.clone(), right));
    }
    grammar.add_production(Production::new(tail, Vec::<String>::new()));
    true
}

/// Left-factor the grammar until no two alternatives of a nonterminal start
/// with the same symbol.
fn extract_common_prefix(vars: &mut LlVariables, probe: &Probe) -> Result<(), Halted> {
    let _enter = tracing::trace_span!("extract_common_prefix").entered();

    vars.key.nonterminal_order = vars.grammar.nonterminals().map(str::to_owned).collect();
    probe.report(Point::new(EXTRACT_COMMON_PREFIX, 0), &*vars)?;

    let mut i = 0;
    while i < vars.key.nonterminal_order.len() {
        vars.key.loop_i = Some(i);
        let a = vars.key.nonterminal_order[i].clone();
        while let Some(tail) = factor_once(&mut vars.grammar, &a) {
            vars.key.nonterminal_order.push(tail);
            vars.sync_productions();
            probe.report(Point::new(EXTRACT_COMMON_PREFIX, 1), &*vars)?;
        }
        i += 1;
    }

    vars.key.reset_loops();
    probe.report(Point::new(EXTRACT_COMMON_PREFIX, -1), &*vars)?;
    Ok(())
}

/// Factor the longest common prefix out of the first group of alternatives
/// of `a` sharing a first symbol. Returns the new nonterminal, if any.
fn factor_once(grammar: &mut Grammar, a: &str) -> Option<String> {
    let mut groups = Map::<&str, Vec<&Production>>::default();
    for p in grammar.productions_of(a) {
        if let Some(first) = p.right.first() {
            groups.entry(first.as_str()).or_default().push(p);
        }
    }
    let group: Vec<Production> = groups
        .into_values()
        .find(|group| group.len() >= 2)?
        .into_iter()
        .cloned()
        .collect();

    let prefix_len = group
        .iter()
        .map(|p| {
            p.right
                .iter()
                .zip(&group[0].right)
                .take_while(|(x, y)| x == y)
                .count()
        })
        .min()
        .unwrap_or(0);
    let prefix = group[0].right[..prefix_len].to_vec();

    let tail = grammar.add_new_nonterminal(a);
    tracing::trace!("factored {:?} out of {} into {}", prefix, a, tail);
    for p in &group {
        grammar.remove_production(p);
    }
    grammar.add_production(Production::new(
        a,
        prefix.into_iter().chain(Some(tail.clone())),
    ));
    for p in group {
        grammar.add_production(Production::new(
            tail.clone(),
            p.right.into_iter().skip(prefix_len),
        ));
    }
    Some(tail)
}

fn compute_select(vars: &mut LlVariables, probe: &Probe) -> Result<(), Halted> {
    let _enter = tracing::trace_span!("compute_select").entered();

    vars.select.clear();
    probe.report(Point::new(COMPUTE_SELECT_SET, 0), &*vars)?;
    for i in 0..vars.key.productions.len() {
        let production = &vars.key.productions[i];
        let mut select = first_of(&vars.key.first, &vars.grammar, &production.right);
        if select.remove(&Terminal::Epsilon) {
            if let Some(follow) = vars.key.follow.get(&production.left) {
                select.extend(follow.iter().cloned());
            }
        }
        vars.key.loop_i = Some(i);
        vars.key.current_production = Some(production.clone());
        vars.select.push(select);
        probe.report(Point::new(COMPUTE_SELECT_SET, 1), &*vars)?;
    }
    vars.key.reset_loops();
    probe.report(Point::new(COMPUTE_SELECT_SET, -1), &*vars)?;
    Ok(())
}

fn check_select_conflict(vars: &mut LlVariables, probe: &Probe) -> Result<(), Halted> {
    let _enter = tracing::trace_span!("check_select_conflict").entered();

    vars.conflicts.clear();
    probe.report(Point::new(CHECK_SELECT_CONFLICT, 0), &*vars)?;
    let productions = &vars.key.productions;
    for i in 0..productions.len() {
        for j in i + 1..productions.len() {
            if productions[i].left != productions[j].left {
                continue;
            }
            let symbols: BTreeSet<Terminal> = vars.select[i]
                .intersection(&vars.select[j])
                .cloned()
                .collect();
            if !symbols.is_empty() {
                vars.conflicts.push(SelectConflict {
                    nonterminal: productions[i].left.clone(),
                    productions: (i, j),
                    symbols,
                });
            }
        }
    }
    probe.report(Point::new(CHECK_SELECT_CONFLICT, -1), &*vars)?;
    Ok(())
}

fn generate_table(vars: &mut LlVariables, probe: &Probe) -> Result<(), Halted> {
    let _enter = tracing::trace_span!("generate_table").entered();

    probe.report(Point::new(GENERATE_TABLE, 0), &*vars)?;
    vars.table = Some(LlTable::from_select(&vars.key.productions, &vars.select));
    probe.report(Point::new(GENERATE_TABLE, -1), &*vars)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::lexicon::lexicon;
    use proptest::prelude::*;

    fn run(config: Config, text: &str) -> Outcome<LlArtifacts> {
        let lexicon = Arc::new(lexicon().unwrap());
        let pipeline = LlPipeline::new(config, lexicon, Source::new("test", text));
        pipeline::run(pipeline).unwrap()
    }

    fn translated(text: &str) -> Grammar {
        let lexicon = lexicon().unwrap();
        let parsed = crate::syntax::parse(&lexicon, "test", text);
        let mut vars = LlVariables::new(parsed.grammar);
        remove_left_recursion(&mut vars, &Probe::detached()).unwrap();
        extract_common_prefix(&mut vars, &Probe::detached()).unwrap();
        vars.grammar
    }

    /// Terminal strings derivable from the start symbol with at most `limit`
    /// symbols in every sentential form.
    fn sentences(grammar: &Grammar, limit: usize) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut pending = vec![vec![grammar.start().to_owned()]];
        while let Some(form) = pending.pop() {
            if !seen.insert(form.clone()) {
                continue;
            }
            match form.iter().position(|s| grammar.is_nonterminal(s)) {
                None => {
                    found.insert(form.concat());
                }
                Some(at) => {
                    for p in grammar.productions_of(&form[at]) {
                        let next: Vec<String> = form[..at]
                            .iter()
                            .chain(&p.right)
                            .chain(&form[at + 1..])
                            .cloned()
                            .collect();
                        if next.len() <= limit {
                            pending.push(next);
                        }
                    }
                }
            }
        }
        found
    }

    fn is_left_recursive(grammar: &Grammar) -> bool {
        grammar
            .productions()
            .any(|p| p.right.first() == Some(&p.left))
    }

    #[test]
    fn removes_direct_left_recursion() {
        let grammar = translated("A := A b | c\n");
        assert!(!is_left_recursive(&grammar));

        let language = sentences(&grammar, 6);
        for word in ["c", "cb", "cbb"] {
            assert!(language.contains(word), "{} is missing", word);
        }
        assert!(!language.contains("b"));
        assert!(!language.contains(""));
    }

    #[test]
    fn removes_indirect_left_recursion() {
        let grammar = translated("A := B a | x\nB := A b | y\n");
        assert!(!is_left_recursive(&grammar));

        let language = sentences(&grammar, 8);
        for word in ["x", "ya", "xba", "yaba"] {
            assert!(language.contains(word), "{} is missing", word);
        }
    }

    #[test]
    fn drops_pure_cycles() {
        let grammar = translated("A := A | a\n");
        assert_eq!(grammar.productions_of("A"), [Production::new("A", ["a"])]);
    }

    #[test]
    fn factors_common_prefixes() {
        let grammar = translated("S := i E t S | i E t S e S | a\nE := b\n");
        let firsts: Vec<_> = grammar
            .productions_of("S")
            .iter()
            .filter_map(|p| p.right.first())
            .collect();
        assert_eq!(firsts.len(), 2);
        assert!(grammar
            .productions_of("S")
            .contains(&Production::new("S", ["i", "E", "t", "S", "S_0"])));
        assert!(grammar.productions_of("S_0").contains(&Production::new("S_0", ["e", "S"])));
        assert!(grammar
            .productions_of("S_0")
            .contains(&Production::new("S_0", Vec::<String>::new())));
    }

    #[test]
    fn select_conflict_without_translation() {
        let mut config = Config::new();
        config.no_translate();
        let outcome = run(config, "E := E + E | ( E ) | id\n");
        assert_eq!(outcome.code(), 2);
        let Outcome::SelectConflict { conflicts } = outcome else {
            panic!("expected a select conflict");
        };
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].nonterminal, "E");
        assert_eq!(conflicts[0].productions, (0, 1));
        assert!(conflicts[0].symbols.contains(&Terminal::named("(")));
        assert_eq!(conflicts[1].productions, (0, 2));
    }

    #[test]
    fn builds_table_for_expression_grammar() {
        let outcome = run(
            Config::new(),
            "@E\nE := E + T | T\nT := T * F | F\nF := ( E ) | id\n",
        );
        let artifacts = outcome.into_artifacts().unwrap();

        let entry = artifacts.table.get("E", &Terminal::named("id"));
        let Some(LlEntry::Production(p)) = entry else {
            panic!("unexpected entry {:?}", entry);
        };
        assert_eq!(artifacts.productions[*p], Production::new("E", ["T", "E_0"]));

        let entry = artifacts.table.get("E_0", &Terminal::Eoi);
        let Some(LlEntry::Production(p)) = entry else {
            panic!("unexpected entry {:?}", entry);
        };
        assert!(artifacts.productions[*p].is_epsilon());
        assert_eq!(artifacts.table.get("E", &Terminal::named("+")), None);
        assert_eq!(artifacts.serial_names["*"], "Asterisk");
    }

    #[test]
    fn table_marks_shared_cells() {
        let productions = [Production::new("A", ["a"]), Production::new("A", ["a", "b"])];
        let a: BTreeSet<_> = [Terminal::named("a")].into_iter().collect();
        let table = LlTable::from_select(&productions, &[a.clone(), a]);
        assert_eq!(
            table.get("A", &Terminal::named("a")),
            Some(&LlEntry::Conflict(vec![0, 1]))
        );
    }

    #[test]
    fn parse_errors_stop_the_pipeline() {
        assert_eq!(run(Config::new(), "E := := a\n").code(), 1);
        assert_eq!(run(Config::new(), "@S\nE := a\n").code(), 2);
    }

    fn arbitrary_grammar() -> impl Strategy<Value = Grammar> {
        let symbol = prop_oneof![
            Just("a"),
            Just("b"),
            Just("c"),
            Just("N0"),
            Just("N1"),
            Just("N2"),
        ];
        let production = (
            prop_oneof![Just("N0"), Just("N1"), Just("N2")],
            prop::collection::vec(symbol, 0..5),
        );
        prop::collection::vec(production, 1..10).prop_map(|productions| {
            let start = productions[0].0;
            Grammar::new(
                start,
                productions
                    .into_iter()
                    .map(|(left, right)| Production::new(left, right)),
            )
        })
    }

    proptest! {
        #[test]
        fn left_factoring_terminates(grammar in arbitrary_grammar()) {
            let mut grammar = grammar;
            let nonterminals: Vec<String> =
                grammar.nonterminals().map(str::to_owned).collect();
            let mut work = nonterminals;
            let mut i = 0;
            while i < work.len() {
                let a = work[i].clone();
                while let Some(tail) = factor_once(&mut grammar, &a) {
                    work.push(tail);
                    prop_assert!(work.len() < 200);
                }
                i += 1;
            }

            for a in grammar.nonterminals() {
                let mut firsts = BTreeSet::new();
                for p in grammar.productions_of(a) {
                    if let Some(first) = p.right.first() {
                        prop_assert!(firsts.insert(first.clone()));
                    }
                }
            }
        }
    }
}
