use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use gramstep::{
    ll::{self, LlPipeline},
    lr0::{self, Lr0Pipeline},
    lr1::{self, Lr1Pipeline},
    pipeline::{self, Outcome, Pipeline, Source},
    stepping::{Point, RunMode},
    syntax::lexicon::lexicon,
};
use serde::Serialize;
use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The table construction algorithm.
    #[arg(long, value_enum, default_value_t = Algorithm::Lalr)]
    algorithm: Algorithm,

    /// Skip left recursion removal and left factoring (LL only).
    #[arg(long)]
    no_translate: bool,

    /// Print the artifacts as JSON.
    #[arg(long)]
    json: bool,

    /// Stop at the instrumentation point NAME:LINE and print the variables.
    #[arg(long = "break", value_name = "NAME:LINE", value_parser = parse_point)]
    breakpoints: Vec<Point>,

    /// The path of grammar definition file.
    input: PathBuf,
}

#[derive(Debug, Copy, Clone, PartialEq, ValueEnum)]
enum Algorithm {
    Ll,
    Lr0,
    Slr,
    Lr1,
    Lalr,
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (name, line) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected NAME:LINE, got `{}`", s))?;
    let line = line
        .parse()
        .map_err(|err| format!("invalid line `{}`: {}", line, err))?;
    Ok(Point::named(name, line))
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::debug!("parsed CLI args = {:?}", args);

    let code = process_file(&args)
        .with_context(|| anyhow::anyhow!("errored during processing {}", args.input.display()))?;

    Ok(ExitCode::from(code))
}

fn process_file(args: &Args) -> anyhow::Result<u8> {
    let source = Source::read(&args.input).context("failed to read the grammar file")?;

    let s = Instant::now();
    let lexicon = Arc::new(lexicon().context("failed to build the grammar lexicon")?);
    tracing::info!("lexicon: {:?} elapsed", s.elapsed());

    match args.algorithm {
        Algorithm::Ll => {
            let mut config = ll::Config::new();
            if args.no_translate {
                config.no_translate();
            }
            drive(args, LlPipeline::new(config, lexicon, source), |a| {
                a.table.rows.len()
            })
        }
        Algorithm::Lr0 | Algorithm::Slr => {
            let mut config = lr0::Config::new();
            if args.algorithm == Algorithm::Slr {
                config.use_slr();
            }
            let pipeline = Lr0Pipeline::new(config, lexicon, source);
            drive(args, pipeline, |a| a.closure_map.len())
        }
        Algorithm::Lr1 | Algorithm::Lalr => {
            let mut config = lr1::Config::new();
            if args.algorithm == Algorithm::Lalr {
                config.use_lalr();
            }
            let pipeline = Lr1Pipeline::new(config, lexicon, source);
            drive(args, pipeline, |a| a.closure_map.len())
        }
    }
}

/// Run `pipeline` under a controller, printing the variables at every
/// breakpoint, then print the outcome.
fn drive<P>(args: &Args, pipeline: P, rows: impl Fn(&P::Artifacts) -> usize) -> anyhow::Result<u8>
where
    P: Pipeline,
{
    let s = Instant::now();
    let controller = pipeline::spawn(pipeline);

    // the run starts paused at its first point
    controller.wait_paused();
    for point in &args.breakpoints {
        controller.add_breakpoint(point.clone());
    }
    loop {
        controller.resume();
        match controller.wait_paused() {
            RunMode::Paused => {
                if let Some(snapshot) = controller.variables() {
                    println!("==> {}", snapshot.point);
                    println!("{}", serde_json::to_string_pretty(&snapshot.variables)?);
                }
            }
            _ => break,
        }
    }

    let outcome = controller
        .join()
        .context("the pipeline exited without a result")?;
    tracing::info!("pipeline: {:?} elapsed", s.elapsed());

    print_outcome(args, &outcome, rows)?;
    Ok(outcome.code() as u8)
}

fn print_outcome<T>(
    args: &Args,
    outcome: &Outcome<T>,
    rows: impl Fn(&T) -> usize,
) -> anyhow::Result<()>
where
    T: Serialize,
{
    if args.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome {
        Outcome::Success { artifacts } => {
            println!("[success] {} table rows", rows(artifacts));
        }
        Outcome::ParseError { diagnostics } | Outcome::NoStartSymbol { diagnostics } => {
            print!("{}", diagnostics);
            println!("[failure] result code {}", outcome.code());
        }
        Outcome::SelectConflict { conflicts } => {
            for c in conflicts {
                let symbols: Vec<String> = c.symbols.iter().map(ToString::to_string).collect();
                println!(
                    "[conflict] {}: productions {} and {} share {}",
                    c.nonterminal,
                    c.productions.0,
                    c.productions.1,
                    symbols.join(" ")
                );
            }
        }
        Outcome::Conflict { conflicts } => {
            for c in conflicts {
                println!("[conflict] {}", c);
            }
        }
    }
    Ok(())
}
