//! Driving pipelines and reporting their outcome.

use crate::{
    automaton::Dfa,
    ll::SelectConflict,
    stepping::{Controller, Halted, Point, Probe},
    syntax::{self, Diagnostics, Parsed},
    table::Conflict,
};
use serde::Serialize;
use std::{fs, io, ops::ControlFlow, path::Path};

pub const PIPELINE: &str = "pipeline";
pub const PARSE_CODE: &str = "ParseCode";

/// A grammar source to be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub file: String,
    pub text: String,
}

impl Source {
    pub fn new(file: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            text: text.into(),
        }
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), text))
    }
}

/// A table construction algorithm that runs from grammar source to its
/// artifacts, reporting its progress through a [`Probe`].
pub trait Pipeline: Send + 'static {
    type Artifacts: Serialize + Send + 'static;

    fn run(self, probe: &Probe) -> Result<Outcome<Self::Artifacts>, Halted>;
}

/// The structured result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success { artifacts: T },
    /// The source has syntax errors.
    ParseError { diagnostics: Diagnostics },
    /// The start symbol has no production.
    NoStartSymbol { diagnostics: Diagnostics },
    /// Alternatives of one nonterminal have overlapping Select sets.
    SelectConflict { conflicts: Vec<SelectConflict> },
    /// The LR table has cells with more than one action.
    Conflict { conflicts: Vec<Conflict> },
}

impl<T> Outcome<T> {
    /// The numeric result code.
    ///
    /// LL pipelines use 0 (success), 1 (parse error) and 2 (Select
    /// conflict or no start symbol). LR pipelines use 0 (success),
    /// 1 (parse error), 2 (no start symbol) and 3 (conflict).
    pub fn code(&self) -> u32 {
        match self {
            Self::Success { .. } => 0,
            Self::ParseError { .. } => 1,
            Self::NoStartSymbol { .. } => 2,
            Self::SelectConflict { .. } => 2,
            Self::Conflict { .. } => 3,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn artifacts(&self) -> Option<&T> {
        match self {
            Self::Success { artifacts } => Some(artifacts),
            _ => None,
        }
    }

    pub fn into_artifacts(self) -> Option<T> {
        match self {
            Self::Success { artifacts } => Some(artifacts),
            _ => None,
        }
    }
}

/// Run `pipeline` on the calling thread without stopping.
pub fn run<P: Pipeline>(pipeline: P) -> Result<Outcome<P::Artifacts>, Halted> {
    pipeline.run(&Probe::detached())
}

/// Start `pipeline` on a worker thread. The run begins paused at its first
/// instrumentation point.
pub fn spawn<P: Pipeline>(pipeline: P) -> Controller<Outcome<P::Artifacts>> {
    Controller::spawn(move |probe| pipeline.run(probe))
}

/// Report the start of stage `stage` of a pipeline.
pub(crate) fn enter_stage<V>(probe: &Probe, stage: i32, vars: &V) -> Result<(), Halted>
where
    V: Serialize + ?Sized,
{
    tracing::trace!("enter stage {}", stage);
    probe.report(Point::new(PIPELINE, stage), vars)
}

/// Read the grammar source, stopping the pipeline when it has errors or
/// lacks a start symbol.
pub(crate) fn parse_code<T>(
    lexicon: &Dfa,
    source: &Source,
    probe: &Probe,
) -> Result<ControlFlow<Outcome<T>, Parsed>, Halted> {
    probe.report(Point::new(PARSE_CODE, 0), source)?;
    let parsed = syntax::parse(lexicon, &source.file, &source.text);
    probe.report(Point::new(PARSE_CODE, -1), &parsed)?;

    if parsed.diagnostics.has_errors() {
        tracing::debug!("{} has errors", source.file);
        return Ok(ControlFlow::Break(Outcome::ParseError {
            diagnostics: parsed.diagnostics,
        }));
    }
    if !parsed.grammar.has_start() {
        tracing::debug!("{} has no start symbol", source.file);
        return Ok(ControlFlow::Break(Outcome::NoStartSymbol {
            diagnostics: parsed.diagnostics,
        }));
    }
    Ok(ControlFlow::Continue(parsed))
}
