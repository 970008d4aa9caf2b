//! Diagnostics reported while reading grammar sources.

use crate::lexer::Position;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[non_exhaustive]
pub enum DiagnosticKind {
    /// The source file could not be read.
    SystemFileError,
    UnexpectedToken,
    /// A line starts with `:=`.
    MissingNonterminal,
    InvalidSyntax,
    /// A nonterminal is not followed by `:=`.
    MissingProduct,
    /// More than one `:=` on a line.
    TooManyProduct,
    TooManyStartSymbolDeclaration,
    /// The start symbol has no production.
    NoStartSymbol,
    StartSymbolNotDeclared,
    /// The same production is defined twice.
    SameProduction,
}

impl DiagnosticKind {
    pub const fn code(self) -> u32 {
        match self {
            Self::SystemFileError => 10001,
            Self::UnexpectedToken => 20001,
            Self::MissingNonterminal => 20002,
            Self::InvalidSyntax => 20003,
            Self::MissingProduct => 20004,
            Self::TooManyProduct => 20005,
            Self::TooManyStartSymbolDeclaration => 20006,
            Self::NoStartSymbol => 30001,
            Self::StartSymbolNotDeclared => 30003,
            Self::SameProduction => 30004,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub code: u32,
    pub file: String,
    pub position: Position,
    /// Number of characters the diagnostic spans.
    pub length: usize,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        file: impl Into<String>,
        position: Position,
        length: usize,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: kind.code(),
            file: file.into(),
            position,
            length,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: [{}] {}",
            self.file, self.position, self.code, self.detail
        )
    }
}

/// Errors and warnings collected over one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub fatal: Option<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Returns `true` if anything other than warnings was reported.
    pub fn has_errors(&self) -> bool {
        self.fatal.is_some() || !self.errors.is_empty()
    }

    pub fn error(&mut self, diagnostic: Diagnostic) {
        tracing::debug!("error: {}", diagnostic);
        self.errors.push(diagnostic);
    }

    pub fn warning(&mut self, diagnostic: Diagnostic) {
        tracing::debug!("warning: {}", diagnostic);
        self.warnings.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.fatal
            .iter()
            .chain(&self.errors)
            .chain(&self.warnings)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fatal) = &self.fatal {
            writeln!(f, "fatal: {}", fatal)?;
        }
        for e in &self.errors {
            writeln!(f, "error: {}", e)?;
        }
        for w in &self.warnings {
            writeln!(f, "warning: {}", w)?;
        }
        Ok(())
    }
}
