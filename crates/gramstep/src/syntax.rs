//! Reader for the line-oriented grammar source language.
//!
//! ```text
//! @E
//! E := E + T
//!    | T
//! T := T * F | F
//! F := ( E ) | id
//! ```
//!
//! A line starting with an identifier defines alternatives of that
//! nonterminal, a line starting with `|` adds alternatives to the previous
//! one and `@Name` declares the start symbol. Inside a body, `|` separates
//! alternatives; a literal `|` terminal is written `"|"`.

pub mod diagnostics;
pub mod lexicon;

pub use self::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};

use crate::{
    automaton::Dfa,
    grammar::{Grammar, Production},
    lexer::{LexError, Lexer, Position, Token},
};
use serde::Serialize;
use std::{fs, path::Path};

/// The outcome of reading a grammar source.
#[derive(Debug, Clone, Serialize)]
pub struct Parsed {
    pub grammar: Grammar,
    pub diagnostics: Diagnostics,
}

/// Read the grammar file at `path`.
///
/// A read failure is reported as a fatal diagnostic.
pub fn parse_file(lexicon: &Dfa, path: &Path) -> Parsed {
    let file = path.display().to_string();
    match fs::read_to_string(path) {
        Ok(source) => parse(lexicon, &file, &source),
        Err(err) => {
            let mut diagnostics = Diagnostics::default();
            diagnostics.fatal = Some(Diagnostic::new(
                DiagnosticKind::SystemFileError,
                file,
                Position { line: 0, column: 0 },
                0,
                err.to_string(),
            ));
            Parsed {
                grammar: Grammar::default(),
                diagnostics,
            }
        }
    }
}

/// Parse grammar source text using the DFA built by [`lexicon::lexicon`].
pub fn parse(lexicon: &Dfa, file: &str, source: &str) -> Parsed {
    let _enter = tracing::trace_span!("parse", file).entered();

    let mut parser = LineParser {
        file,
        diagnostics: Diagnostics::default(),
        productions: vec![],
        start: None,
        line: None,
        last_left: None,
        current_line: 0,
    };
    for token in Lexer::new(lexicon, file, source) {
        match token {
            Ok(token) => parser.token(token),
            Err(LexError::UnexpectedToken { raw, position, .. }) => {
                parser.report(
                    DiagnosticKind::UnexpectedToken,
                    position,
                    raw.chars().count(),
                    format!("unexpected token {:?}", raw),
                );
            }
        }
    }
    parser.finish_line();
    parser.into_parsed()
}

#[derive(Debug, Copy, Clone, PartialEq)]
enum Class {
    Identifier,
    Product,
    Bar,
    At,
    Other,
}

impl Class {
    fn of(token: &Token) -> Self {
        match (token.tag.as_str(), token.raw.as_str()) {
            (lexicon::IDENTIFIER, _) => Self::Identifier,
            (lexicon::PRODUCT, _) => Self::Product,
            (lexicon::SYMBOL, "|") => Self::Bar,
            (lexicon::SYMBOL, "@") => Self::At,
            _ => Self::Other,
        }
    }
}

/// What the rest of the current line means.
#[derive(Debug)]
enum Line {
    /// Left side seen, waiting for `:=`.
    Head { left: Token },
    Body {
        left: String,
        head: Token,
        bodies: Vec<Vec<String>>,
    },
    Start {
        at: Token,
        name: Option<String>,
    },
    /// The line is broken; its remaining tokens are ignored.
    Skip,
}

struct LineParser<'a> {
    file: &'a str,
    diagnostics: Diagnostics,
    productions: Vec<(Production, Token)>,
    start: Option<(String, Token)>,
    line: Option<Line>,
    last_left: Option<String>,
    current_line: usize,
}

impl LineParser<'_> {
    fn report(&mut self, kind: DiagnosticKind, position: Position, length: usize, detail: String) {
        let diagnostic = Diagnostic::new(kind, self.file, position, length, detail);
        match kind {
            DiagnosticKind::StartSymbolNotDeclared
            | DiagnosticKind::NoStartSymbol
            | DiagnosticKind::SameProduction => self.diagnostics.warning(diagnostic),
            _ => self.diagnostics.error(diagnostic),
        }
    }

    fn report_at(&mut self, kind: DiagnosticKind, token: &Token, detail: String) {
        self.report(kind, token.position, token.len(), detail);
    }

    fn token(&mut self, token: Token) {
        let class = Class::of(&token);
        if token.position.line != self.current_line {
            self.finish_line();
            self.current_line = token.position.line;
            let line = match class {
                Class::Identifier => Line::Head { left: token },
                Class::Product => {
                    self.report_at(
                        DiagnosticKind::MissingNonterminal,
                        &token,
                        "missing nonterminal before `:=`".into(),
                    );
                    Line::Skip
                }
                Class::Bar => match &self.last_left {
                    Some(left) => Line::Body {
                        left: left.clone(),
                        head: token,
                        bodies: vec![vec![]],
                    },
                    None => {
                        self.report_at(
                            DiagnosticKind::InvalidSyntax,
                            &token,
                            "`|` without a preceding production".into(),
                        );
                        Line::Skip
                    }
                },
                Class::At => Line::Start {
                    at: token,
                    name: None,
                },
                _ => {
                    let detail = format!("unexpected {:?} at the start of a line", token.raw);
                    self.report_at(DiagnosticKind::InvalidSyntax, &token, detail);
                    Line::Skip
                }
            };
            self.line = Some(line);
            return;
        }

        let line = match self.line.take() {
            Some(Line::Head { left }) if class == Class::Product => Line::Body {
                left: left.raw.clone(),
                head: left,
                bodies: vec![vec![]],
            },
            Some(Line::Head { left }) => {
                let detail = format!("expected `:=` after {:?}, found {:?}", left.raw, token.raw);
                self.report_at(DiagnosticKind::MissingProduct, &token, detail);
                Line::Skip
            }
            Some(Line::Body {
                left,
                head,
                mut bodies,
            }) => {
                match class {
                    Class::Product => self.report_at(
                        DiagnosticKind::TooManyProduct,
                        &token,
                        "more than one `:=` in a production".into(),
                    ),
                    Class::Bar => bodies.push(vec![]),
                    _ => {
                        if let Some(body) = bodies.last_mut() {
                            body.push(token.raw);
                        }
                    }
                }
                Line::Body { left, head, bodies }
            }
            Some(Line::Start { at, name: None }) if class == Class::Identifier => Line::Start {
                at,
                name: Some(token.raw),
            },
            Some(Line::Start { .. }) => {
                let detail = format!("unexpected {:?} in start symbol declaration", token.raw);
                self.report_at(DiagnosticKind::InvalidSyntax, &token, detail);
                Line::Skip
            }
            Some(Line::Skip) | None => Line::Skip,
        };
        self.line = Some(line);
    }

    fn finish_line(&mut self) {
        match self.line.take() {
            Some(Line::Head { left }) => {
                let position = Position {
                    line: left.position.line,
                    column: left.position.column + left.len(),
                };
                let detail = format!("expected `:=` after {:?}", left.raw);
                self.report(DiagnosticKind::MissingProduct, position, 1, detail);
            }
            Some(Line::Body { left, head, bodies }) => {
                for body in bodies {
                    self.productions
                        .push((Production::new(left.clone(), body), head.clone()));
                }
                self.last_left = Some(left);
            }
            Some(Line::Start { at, name: None }) => {
                self.report_at(
                    DiagnosticKind::InvalidSyntax,
                    &at,
                    "missing start symbol name after `@`".into(),
                );
            }
            Some(Line::Start {
                at,
                name: Some(name),
            }) => match &self.start {
                Some((declared, _)) => {
                    let detail = format!("start symbol already declared as {:?}", declared);
                    self.report_at(DiagnosticKind::TooManyStartSymbolDeclaration, &at, detail);
                }
                None => self.start = Some((name, at)),
            },
            Some(Line::Skip) | None => (),
        }
    }

    fn into_parsed(mut self) -> Parsed {
        let mut grammar = Grammar::default();
        for (production, head) in std::mem::take(&mut self.productions) {
            let text = production.to_string();
            if !grammar.add_production(production) {
                let detail = format!("duplicate production `{}`", text);
                self.report_at(DiagnosticKind::SameProduction, &head, detail);
            }
        }

        match self.start.take() {
            Some((name, at)) => {
                grammar.set_start(name);
                if !grammar.has_start() {
                    let detail = format!("start symbol {:?} has no production", grammar.start());
                    self.report_at(DiagnosticKind::NoStartSymbol, &at, detail);
                }
            }
            None => {
                let first = grammar.productions().next().map(|p| p.left.clone());
                let position = Position { line: 1, column: 1 };
                match first {
                    Some(first) => {
                        let detail = format!("start symbol not declared, using {:?}", first);
                        self.report(DiagnosticKind::StartSymbolNotDeclared, position, 0, detail);
                        grammar.set_start(first);
                    }
                    None => self.report(
                        DiagnosticKind::NoStartSymbol,
                        position,
                        0,
                        "the grammar has no production".into(),
                    ),
                }
            }
        }

        tracing::debug!(
            "parsed {} productions, {} errors, {} warnings",
            grammar.productions().count(),
            self.diagnostics.errors.len(),
            self.diagnostics.warnings.len()
        );

        Parsed {
            grammar,
            diagnostics: self.diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(source: &str) -> Parsed {
        let lexicon = lexicon::lexicon().unwrap();
        parse(&lexicon, "test", source)
    }

    fn kinds(diagnostics: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn continuation_lines_and_inline_alternatives() {
        let parsed = parse_str(
            "@E
            E := E + E
              | E - E
              | ( E ) | id
            ",
        );
        assert!(!parsed.diagnostics.has_errors());
        assert!(parsed.diagnostics.warnings.is_empty());

        let g = &parsed.grammar;
        assert_eq!(g.start(), "E");
        let bodies: Vec<_> = g
            .productions_of("E")
            .iter()
            .map(|p| p.right.join(" "))
            .collect();
        assert_eq!(bodies, ["E + E", "E - E", "( E )", "id"]);
        assert_eq!(g.terminals().collect::<Vec<_>>(), ["+", "-", "(", ")", "id"]);
    }

    #[test]
    fn empty_alternatives_are_epsilon() {
        let parsed = parse_str("A := a A |\nB :=\n");
        let g = &parsed.grammar;
        assert!(g.productions_of("A")[1].is_epsilon());
        assert!(g.productions_of("B")[0].is_epsilon());
    }

    #[test]
    fn quoted_terminals() {
        let parsed = parse_str("S := \"|\" S | x");
        assert_eq!(parsed.grammar.productions_of("S")[0].right, ["\"|\"", "S"]);
    }

    #[test]
    fn missing_start_declaration_defaults_to_first_nonterminal() {
        let parsed = parse_str("B := b\nA := B");
        assert_eq!(parsed.grammar.start(), "B");
        assert_eq!(
            kinds(&parsed.diagnostics.warnings),
            [DiagnosticKind::StartSymbolNotDeclared]
        );
        assert!(!parsed.diagnostics.has_errors());
    }

    #[test]
    fn undefined_start_symbol_is_a_warning() {
        let parsed = parse_str("@S\nA := a");
        assert!(!parsed.diagnostics.has_errors());
        assert_eq!(
            kinds(&parsed.diagnostics.warnings),
            [DiagnosticKind::NoStartSymbol]
        );
        assert!(!parsed.grammar.has_start());
    }

    #[test]
    fn reports_every_broken_line() {
        use DiagnosticKind::*;
        let parsed = parse_str(
            "@A
            @B
            := a
            | b
            A a
            A := a := b
            C
            + x
            A := \\
            ",
        );
        assert_eq!(
            kinds(&parsed.diagnostics.errors),
            [
                TooManyStartSymbolDeclaration,
                MissingNonterminal,
                InvalidSyntax,
                MissingProduct,
                TooManyProduct,
                MissingProduct,
                InvalidSyntax,
                UnexpectedToken,
            ]
        );
        assert_eq!(parsed.diagnostics.errors[0].code, 20006);
        assert_eq!(parsed.grammar.productions_of("A").len(), 2);
    }

    #[test]
    fn missing_product_points_past_the_nonterminal() {
        let parsed = parse_str("Expr\n");
        let error = &parsed.diagnostics.errors[0];
        assert_eq!(error.kind, DiagnosticKind::MissingProduct);
        assert_eq!((error.position.line, error.position.column), (1, 5));
    }

    #[test]
    fn duplicate_productions_are_reported() {
        let parsed = parse_str("A := a\nA := a | b");
        assert_eq!(
            kinds(&parsed.diagnostics.warnings),
            [
                DiagnosticKind::SameProduction,
                DiagnosticKind::StartSymbolNotDeclared
            ]
        );
        assert_eq!(parsed.grammar.productions_of("A").len(), 2);
    }

    #[test]
    fn unreadable_file_is_fatal() {
        let lexicon = lexicon::lexicon().unwrap();
        let parsed = parse_file(&lexicon, Path::new("/nonexistent/grammar.txt"));
        let fatal = parsed.diagnostics.fatal.unwrap();
        assert_eq!(fatal.kind, DiagnosticKind::SystemFileError);
        assert_eq!(fatal.code, 10001);
    }
}
