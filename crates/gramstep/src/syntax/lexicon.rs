//! Token classes of the grammar source language.

use crate::automaton::{Automaton, Dfa, RegexError};

pub const IDENTIFIER: &str = "identify";
pub const PRODUCT: &str = "product";
pub const SYMBOL: &str = "symbol";
pub const ESCAPE: &str = "escape";

const IDENTIFIER_PATTERN: &str = r"([a-z]|[A-Z]|[0-9]|\_)([a-z]|[A-Z]|[0-9]|\_|\')*";
const PRODUCT_PATTERN: &str = ":=";
const SYMBOL_PATTERN: &str =
    r"+|-|\*|/|=|\(|\)|;|!|@|#|$|%|^|&|\[|]|{|}|:|'|<|>|,|\.|?|\||~|`";
const ESCAPE_PATTERN: &str =
    r#""([\u0000-\u0009]|[\u000B-\u0021]|[\u0023-\u005B]|[\u005D-\uFFFF]|\\.)*""#;

/// Build the DFA recognizing the tokens of grammar sources.
pub fn lexicon() -> Result<Dfa, RegexError> {
    let _enter = tracing::trace_span!("lexicon").entered();

    let mut classes = vec![];
    for (pattern, tag) in [
        (IDENTIFIER_PATTERN, IDENTIFIER),
        (PRODUCT_PATTERN, PRODUCT),
        (SYMBOL_PATTERN, SYMBOL),
        (ESCAPE_PATTERN, ESCAPE),
    ] {
        let mut nfa = Automaton::from_regex(pattern)?;
        nfa.set_accept_tag(tag);
        classes.push(nfa);
    }

    let mut classes = classes.into_iter();
    let mut nfa = classes.next().ok_or(RegexError::Empty)?;
    for class in classes {
        nfa = nfa.merge_or(&class);
    }
    Ok(nfa.to_dfa())
}
