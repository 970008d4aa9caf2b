//! Lexer and parse table construction with single-step inspection.
//!
//! Regular expressions are compiled into DFAs by [`automaton`], grammar
//! sources are read by [`syntax`] and turned into LL(1) ([`ll`]),
//! LR(0)/SLR(1) ([`lr0`]) or LR(1)/LALR(1) ([`lr1`]) tables. Every pipeline
//! can run on a worker thread under a [`stepping::Controller`], which stops
//! it at breakpoints and exposes its variables while it is paused.

pub mod automaton;
pub mod grammar;
pub mod items;
pub mod lexer;
pub mod ll;
pub mod lr0;
pub mod lr1;
pub mod pipeline;
pub mod sets;
pub mod stepping;
pub mod syntax;
pub mod table;
pub mod types;
pub mod util;
