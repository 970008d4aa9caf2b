//! Calculation of the LR action/goto table.

use crate::{
    grammar::{Grammar, Production, Terminal},
    items::{Item, LrVariables},
    stepping::{Halted, Point, Probe},
    types::Map,
    util::display_fn,
};
use serde::Serialize;
use std::fmt;

pub const GENERATE_TABLE: &str = "GenerateTable";

/// The action that the LR automaton in a state performs on a particular
/// lookahead symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Action {
    /// Read a lookahead symbol and transition to the specified state.
    Shift(usize),

    /// Reduce to the specified production.
    Reduce(usize),

    Accept,

    /// There are multiple conflicting actions for the lookahead symbol.
    Inconsistent {
        shift: Option<usize>,
        reduces: Vec<usize>,
        reason: ConflictReason,
    },
}

impl Action {
    pub fn is_consistent(&self) -> bool {
        !matches!(self, Self::Inconsistent { .. })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ConflictReason {
    ShiftReduce,
    ReduceReduce,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShiftReduce => f.write_str("shift/reduce"),
            Self::ReduceReduce => f.write_str("reduce/reduce"),
        }
    }
}

/// A table cell that received more than one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub state: usize,
    pub symbol: Terminal,
    pub shift: Option<usize>,
    pub reduces: Vec<usize>,
    pub reason: ConflictReason,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} conflict in state {} on {}",
            self.reason, self.state, self.symbol
        )?;
        if let Some(next) = self.shift {
            write!(f, ": shift({})", next)?;
        }
        for reduce in &self.reduces {
            write!(f, ", reduce({})", reduce)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionTableRow {
    pub actions: Map<Terminal, Action>,
    pub gotos: Map<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActionTable {
    pub rows: Vec<ActionTableRow>,
}

impl ActionTable {
    pub fn action(&self, state: usize, symbol: &Terminal) -> Option<&Action> {
        self.rows.get(state)?.actions.get(symbol)
    }

    pub fn goto(&self, state: usize, symbol: &str) -> Option<usize> {
        self.rows.get(state)?.gotos.get(symbol).copied()
    }

    /// Every inconsistent cell, in state order.
    pub fn conflicts(&self) -> Vec<Conflict> {
        let mut conflicts = vec![];
        for (state, row) in self.rows.iter().enumerate() {
            for (symbol, action) in &row.actions {
                if let Action::Inconsistent {
                    shift,
                    reduces,
                    reason,
                } = action
                {
                    conflicts.push(Conflict {
                        state,
                        symbol: symbol.clone(),
                        shift: *shift,
                        reduces: reduces.clone(),
                        reason: *reason,
                    });
                }
            }
        }
        conflicts
    }

    pub fn display<'p>(&'p self, productions: &'p [Production]) -> impl fmt::Display + 'p {
        let production = move |i: usize| {
            productions
                .get(i)
                .map_or_else(|| format!("#{}", i), |p| p.to_string())
        };
        display_fn(move |f| {
            for (state, row) in self.rows.iter().enumerate() {
                if state > 0 {
                    writeln!(f)?;
                }
                writeln!(f, "#### State {}", state)?;
                writeln!(f, "## actions")?;
                for (token, action) in &row.actions {
                    match action {
                        Action::Shift(n) => writeln!(f, "- {} => shift({})", token, n)?,
                        Action::Reduce(p) => {
                            writeln!(f, "- {} => reduce({})", token, production(*p))?
                        }
                        Action::Accept => writeln!(f, "- {} => accept", token)?,
                        Action::Inconsistent {
                            shift,
                            reduces,
                            reason,
                        } => {
                            writeln!(f, "- {} => inconsistent({})", token, reason)?;
                            if let Some(n) = shift {
                                writeln!(f, "  - shift({})", n)?;
                            }
                            for p in reduces {
                                writeln!(f, "  - reduce({})", production(*p))?;
                            }
                        }
                    }
                }
                writeln!(f, "## gotos")?;
                for (symbol, goto) in &row.gotos {
                    writeln!(f, "- {} => goto({})", symbol, goto)?;
                }
            }
            Ok(())
        })
    }
}

/// Fill the action/goto table from the closure graph in `vars`.
///
/// `lookaheads` returns the terminals on which a completed item reduces.
/// The completed production 0 becomes accept on the end of input. Returns
/// the conflicting cells; the table is stored in `vars` either way.
pub fn generate_table<I, F>(
    grammar: &Grammar,
    vars: &mut LrVariables<I>,
    lookaheads: F,
    probe: &Probe,
) -> Result<Vec<Conflict>, Halted>
where
    I: Item,
    F: Fn(&I, &LrVariables<I>) -> Vec<Terminal>,
{
    let _enter = tracing::trace_span!("generate_table").entered();

    vars.table = Some(ActionTable::default());
    probe.report(Point::new(GENERATE_TABLE, 0), &*vars)?;

    let mut rows = Vec::with_capacity(vars.closure_map.len());
    for (state, closure) in vars.closure_map.closures().iter().enumerate() {
        #[derive(Default)]
        struct PendingAction {
            shift: Option<usize>,
            reduces: Vec<usize>,
        }
        let mut pending_actions = Map::<Terminal, PendingAction>::default();
        let mut gotos = Map::default();

        for edge in vars.closure_map.edges_from(state) {
            if grammar.is_nonterminal(&edge.symbol) {
                gotos.insert(edge.symbol.clone(), edge.to);
            } else {
                let action = pending_actions
                    .entry(Terminal::named(&edge.symbol))
                    .or_default();
                action.shift.replace(edge.to);
            }
        }

        for item in closure.iter() {
            if item.next_symbol(&vars.key.productions).is_some() {
                continue;
            }
            let production = item.production();
            let terminals = match production {
                0 => vec![Terminal::Eoi],
                _ => lookaheads(item, &*vars),
            };
            for t in terminals {
                let action = pending_actions.entry(t).or_default();
                if !action.reduces.contains(&production) {
                    action.reduces.push(production);
                }
            }
        }

        let mut actions = Map::default();
        for (symbol, action) in pending_actions {
            let resolved = resolve(action.shift, action.reduces);
            if !resolved.is_consistent() {
                tracing::trace!("state {}: conflict on {}", state, symbol);
            }
            actions.insert(symbol, resolved);
        }
        rows.push(ActionTableRow { actions, gotos });
    }

    let table = ActionTable { rows };
    let conflicts = table.conflicts();
    vars.table = Some(table);
    tracing::debug!("generated table with {} conflicts", conflicts.len());
    probe.report(Point::new(GENERATE_TABLE, -1), &*vars)?;
    Ok(conflicts)
}

fn resolve(shift: Option<usize>, mut reduces: Vec<usize>) -> Action {
    use Action::*;

    match (shift, &reduces[..]) {
        (Some(next), []) => Shift(next),
        (None, [0]) => Accept,
        (None, [reduce]) => Reduce(*reduce),
        (Some(_), _) => {
            reduces.sort_unstable();
            Inconsistent {
                shift,
                reduces,
                reason: ConflictReason::ShiftReduce,
            }
        }
        (None, _) => {
            reduces.sort_unstable();
            Inconsistent {
                shift: None,
                reduces,
                reason: ConflictReason::ReduceReduce,
            }
        }
    }
}
