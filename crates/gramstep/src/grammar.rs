//! Grammar types.

use crate::{
    types::{Map, Set},
    util::{display_fn, write_joined},
};
use serde::{Serialize, Serializer};
use std::fmt;

/// A terminal column of First/Follow sets and parse tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Terminal {
    /// Reserved symbol that means the end of input.
    Eoi,
    /// The empty string, only ever found in First sets.
    Epsilon,
    Named(String),
}

impl Terminal {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eoi => f.write_str("$eoi"),
            Self::Epsilon => f.write_str("ε"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl Serialize for Terminal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The type that represents a production rule in grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Production {
    pub left: String,
    /// Right-hand symbols. Empty for an epsilon production.
    pub right: Vec<String>,
}

impl Production {
    pub fn new<I, S>(left: impl Into<String>, right: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            left: left.into(),
            right: right.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_epsilon(&self) -> bool {
        self.right.is_empty()
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :=", self.left)?;
        if self.right.is_empty() {
            return f.write_str(" ε");
        }
        f.write_str(" ")?;
        write_joined(f, &self.right, " ")
    }
}

/// A context-free grammar.
///
/// Symbols are plain names. Every symbol used as the left side of a
/// production is a nonterminal and every other referenced symbol is a
/// terminal. Productions keep the order in which they were added.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Grammar {
    start: String,
    terminals: Set<String>,
    nonterminals: Set<String>,
    productions: Map<String, Vec<Production>>,
    origins: Map<String, String>,
}

impl Grammar {
    pub fn new(start: impl Into<String>, productions: impl IntoIterator<Item = Production>) -> Self {
        let mut g = Self {
            start: start.into(),
            ..Default::default()
        };
        for production in productions {
            g.add_production(production);
        }
        g
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn set_start(&mut self, start: impl Into<String>) {
        self.start = start.into();
    }

    /// Returns `true` if the start symbol is a nonterminal of this grammar.
    pub fn has_start(&self) -> bool {
        self.nonterminals.contains(&self.start)
    }

    pub fn terminals(&self) -> impl Iterator<Item = &str> + '_ {
        self.terminals.iter().map(String::as_str)
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = &str> + '_ {
        self.nonterminals.iter().map(String::as_str)
    }

    pub fn is_terminal(&self, symbol: &str) -> bool {
        self.terminals.contains(symbol)
    }

    pub fn is_nonterminal(&self, symbol: &str) -> bool {
        self.nonterminals.contains(symbol)
    }

    /// Nonterminals in lexicographic order.
    pub fn sorted_nonterminals(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nonterminals.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn productions_of(&self, nonterminal: &str) -> &[Production] {
        self.productions.get(nonterminal).map_or(&[], |p| &p[..])
    }

    /// All productions, grouped by left side in definition order.
    pub fn productions(&self) -> impl Iterator<Item = &Production> + '_ {
        self.productions.values().flatten()
    }

    /// Add a production. Returns `false` if an identical one already exists.
    pub fn add_production(&mut self, production: Production) -> bool {
        if self.terminals.shift_remove(&production.left) {
            tracing::trace!("{} became a nonterminal", production.left);
        }
        self.nonterminals.insert(production.left.clone());
        for symbol in &production.right {
            if !self.nonterminals.contains(symbol) {
                self.terminals.insert(symbol.clone());
            }
        }

        let alternatives = self.productions.entry(production.left.clone()).or_default();
        if alternatives.contains(&production) {
            return false;
        }
        alternatives.push(production);
        true
    }

    /// Remove a production. The left side stays a nonterminal even if it
    /// loses its last alternative.
    pub fn remove_production(&mut self, production: &Production) -> bool {
        let Some(alternatives) = self.productions.get_mut(&production.left) else {
            return false;
        };
        match alternatives.iter().position(|p| p == production) {
            Some(i) => {
                alternatives.remove(i);
                true
            }
            None => false,
        }
    }

    /// Allocate a fresh nonterminal derived from `from`.
    ///
    /// The name is `{root}_{n}` where `root` is the original ancestor of
    /// `from` and `n` the smallest number giving an unused symbol.
    pub fn add_new_nonterminal(&mut self, from: &str) -> String {
        let root = self.root_of(from).to_owned();
        let name = (0..)
            .map(|n| format!("{}_{}", root, n))
            .find(|name| !self.terminals.contains(name) && !self.nonterminals.contains(name))
            .unwrap_or_default();
        self.nonterminals.insert(name.clone());
        self.productions.entry(name.clone()).or_default();
        self.origins.insert(name.clone(), from.to_owned());
        name
    }

    /// The nonterminal a synthetic nonterminal was derived from.
    pub fn origin(&self, symbol: &str) -> Option<&str> {
        self.origins.get(symbol).map(String::as_str)
    }

    /// Follow the provenance chain of `symbol` back to a user-defined symbol.
    pub fn root_of<'a>(&'a self, mut symbol: &'a str) -> &'a str {
        while let Some(parent) = self.origin(symbol) {
            symbol = parent;
        }
        symbol
    }

    /// Identifier-safe names for every symbol, for use by code emitters.
    pub fn serial_names(&self) -> Map<String, String> {
        let mut used = Set::<String>::default();
        let mut names = Map::default();
        for symbol in self.terminals.iter().chain(&self.nonterminals) {
            let base = serial_base(symbol);
            let mut name = base.clone();
            let mut n = 0;
            while used.contains(&name) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            used.insert(name.clone());
            names.insert(symbol.clone(), name);
        }
        names
    }

    pub fn display(&self) -> impl fmt::Display + '_ {
        display_fn(move |f| {
            write!(f, "start: {}\nterminals: ", self.start)?;
            write_joined(f, &self.terminals, ", ")?;
            f.write_str("\nnonterminals: ")?;
            write_joined(f, &self.nonterminals, ", ")?;
            f.write_str("\nproductions:\n")?;
            for production in self.productions() {
                writeln!(f, "  {}", production)?;
            }
            Ok(())
        })
    }
}

fn serial_base(symbol: &str) -> String {
    let mut name = String::new();
    for c in symbol.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            name.push(c);
            continue;
        }
        match c {
            '+' => name.push_str("Plus"),
            '-' => name.push_str("Minus"),
            '*' => name.push_str("Asterisk"),
            '/' => name.push_str("Slash"),
            '=' => name.push_str("Equal"),
            '\\' => name.push_str("Backslash"),
            '(' => name.push_str("LeftParentheses"),
            ')' => name.push_str("RightParentheses"),
            '[' => name.push_str("LeftBrackets"),
            ']' => name.push_str("RightBrackets"),
            '{' => name.push_str("LeftBraces"),
            '}' => name.push_str("RightBraces"),
            ';' => name.push_str("Semicolon"),
            ':' => name.push_str("Colon"),
            '\'' => name.push_str("Prime"),
            c => name.push_str(&format!("u{}", c as u32)),
        }
    }
    match name.chars().next() {
        Some(c) if unicode_ident::is_xid_start(c) || c == '_' => name,
        _ => format!("T{}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> Grammar {
        Grammar::new(
            "E",
            [
                Production::new("E", ["E", "+", "T"]),
                Production::new("E", ["T"]),
                Production::new("T", ["id"]),
            ],
        )
    }

    #[test]
    fn infers_terminals() {
        let g = grammar();
        assert_eq!(g.nonterminals().collect::<Vec<_>>(), ["E", "T"]);
        assert_eq!(g.terminals().collect::<Vec<_>>(), ["+", "id"]);
        assert!(g.has_start());
    }

    #[test]
    fn deduplicates_productions() {
        let mut g = grammar();
        assert!(!g.add_production(Production::new("T", ["id"])));
        assert_eq!(g.productions_of("T").len(), 1);
        assert!(g.remove_production(&Production::new("T", ["id"])));
        assert!(!g.remove_production(&Production::new("T", ["id"])));
        assert!(g.is_nonterminal("T"));
    }

    #[test]
    fn fresh_nonterminals_trace_back_to_their_root() {
        let mut g = grammar();
        g.add_production(Production::new("X", ["E_0"]));
        assert!(g.is_terminal("E_0"));

        let e1 = g.add_new_nonterminal("E");
        assert_eq!(e1, "E_1");
        let e2 = g.add_new_nonterminal(&e1);
        assert_eq!(e2, "E_2");
        assert_eq!(g.origin(&e2), Some("E_1"));
        assert_eq!(g.root_of(&e2), "E");
        assert!(g.is_nonterminal(&e2));
        assert!(!g.is_terminal(&e2));
    }

    #[test]
    fn serial_names_are_identifiers() {
        let g = Grammar::new(
            "S",
            [
                Production::new("S", ["(", "S", ")"]),
                Production::new("S", ["1x", "\"+\"", "u40"]),
                Production::new("S", ["@", "u64"]),
            ],
        );
        let names = g.serial_names();
        assert_eq!(names["("], "LeftParentheses");
        assert_eq!(names["1x"], "T1x");
        assert_eq!(names["\"+\""], "u34Plusu34");
        assert_eq!(names["u40"], "u40");
        assert_eq!(names["@"], "u64");
        assert_eq!(names["u64"], "u64_0");
        assert_eq!(names["S"], "S");
    }

    #[test]
    fn display_lists_productions() {
        let text = grammar().display().to_string();
        assert!(text.contains("E := E + T"));
        assert!(text.contains("terminals: +, id"));
    }
}
