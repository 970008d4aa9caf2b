//! Maximal munch tokenizer driven by a [`Dfa`].

use crate::automaton::Dfa;
use serde::Serialize;
use std::fmt;

/// 1-based line and column of a character in the source text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// Accept tag of the DFA state the token ended in.
    pub tag: String,
    pub raw: String,
    pub file: String,
    pub position: Position,
}

impl Token {
    /// Length of the raw text in characters.
    pub fn len(&self) -> usize {
        self.raw.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("{file}:{position}: unexpected token {raw:?}")]
    UnexpectedToken {
        raw: String,
        file: String,
        position: Position,
    },
}

/// Read position inside the source. `pending_lf` swallows the `\n` of a
/// `\r\n` pair.
#[derive(Debug, Copy, Clone)]
struct Cursor {
    offset: usize,
    line: usize,
    column: usize,
    pending_lf: bool,
}

impl Cursor {
    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }
}

/// Tokenizer yielding one item per token or per unrecognized run of input.
///
/// Errors do not stop the iteration: scanning resumes right after the
/// offending characters.
#[derive(Debug)]
pub struct Lexer<'a> {
    dfa: &'a Dfa,
    file: String,
    chars: Vec<char>,
    cursor: Cursor,
}

impl<'a> Lexer<'a> {
    pub fn new(dfa: &'a Dfa, file: impl Into<String>, source: &str) -> Self {
        Self {
            dfa,
            file: file.into(),
            chars: source.chars().collect(),
            cursor: Cursor {
                offset: 0,
                line: 1,
                column: 0,
                pending_lf: false,
            },
        }
    }

    pub fn position(&self) -> Position {
        self.cursor.position()
    }

    /// Reads one character. Line breaks (`\r`, `\n`, `\r\n`) come out as a
    /// single `\n`.
    fn read(&mut self) -> Option<char> {
        loop {
            let c = *self.chars.get(self.cursor.offset)?;
            self.cursor.offset += 1;
            let pending_lf = std::mem::replace(&mut self.cursor.pending_lf, false);
            match c {
                '\n' if pending_lf => continue,
                '\r' | '\n' => {
                    self.cursor.line += 1;
                    self.cursor.column = 0;
                    self.cursor.pending_lf = c == '\r';
                    return Some('\n');
                }
                c => {
                    self.cursor.column += 1;
                    return Some(c);
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            let saved = self.cursor;
            match self.read() {
                Some(' ' | '\t' | '\n' | '\u{0B}' | '\u{0C}') => continue,
                Some(_) => {
                    self.cursor = saved;
                    return;
                }
                None => return,
            }
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        let dfa = self.dfa;
        self.skip_whitespace();
        let position = self.cursor.position();

        let mut raw = String::new();
        let mut state = Dfa::INITIAL;
        let mut accepted: Option<(Cursor, usize, &str)> = None;
        while let Some(c) = self.read() {
            raw.push(c);
            match dfa.next_state(state, c) {
                Some(next) => {
                    state = next;
                    if let Some(tag) = dfa.tag(next) {
                        accepted = Some((self.cursor, raw.len(), tag));
                    }
                }
                None => break,
            }
        }

        if raw.is_empty() {
            return None;
        }

        Some(match accepted {
            Some((checkpoint, len, tag)) => {
                self.cursor = checkpoint;
                raw.truncate(len);
                Ok(Token {
                    tag: tag.to_owned(),
                    raw,
                    file: self.file.clone(),
                    position,
                })
            }
            None => {
                tracing::trace!(%position, ?raw, "unexpected token");
                Err(LexError::UnexpectedToken {
                    raw,
                    file: self.file.clone(),
                    position,
                })
            }
        })
    }
}
