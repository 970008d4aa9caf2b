//! Compiler from the restricted regular expression syntax into an NFA.
//!
//! Supported syntax:
//!
//! * literal characters, and `\c` for a literal `c`
//! * `\uXXXX` for a code point given by four hex digits
//! * `.` for any code point
//! * `[x-y]` for one inclusive range, `[x]` for one character and `[]` for
//!   the empty string
//! * `|`, implicit concatenation, postfix `*` and parentheses
//!
//! Offsets in errors count characters, not bytes.

use super::{Automaton, RuneRange, MAX_RUNE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RegexError {
    #[error("empty regular expression")]
    Empty,

    #[error("unterminated bracket starting at offset {0}")]
    UnterminatedBracket(usize),

    #[error("malformed bracket range `[{content}]` at offset {offset}")]
    MalformedBracket { offset: usize, content: String },

    #[error("unterminated escape at offset {0}")]
    UnterminatedEscape(usize),

    #[error("invalid hex digits `{digits}` at offset {offset}")]
    InvalidHex { offset: usize, digits: String },

    #[error("unbalanced `)` at offset {0}")]
    UnbalancedClose(usize),

    #[error("`(` at offset {0} is never closed")]
    UnclosedGroup(usize),

    #[error("empty group at offset {0}")]
    EmptyGroup(usize),

    #[error("operator `{op}` at offset {offset} is missing an operand")]
    MissingOperand { op: char, offset: usize },
}

/// Elements of the postfix form.
#[derive(Debug)]
enum Postfix {
    Operand(Automaton),
    Concat,
    Alt,
    Star,
}

#[derive(Debug, Copy, Clone, PartialEq)]
enum Operator {
    Open,
    Alt,
    Concat,
}

impl Operator {
    fn precedence(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Alt => 1,
            Self::Concat => 2,
        }
    }
}

pub(super) fn compile(pattern: &str) -> Result<Automaton, RegexError> {
    let postfix = Parser::new(pattern).parse()?;

    let mut stack: Vec<Automaton> = vec![];
    for item in postfix {
        match item {
            Postfix::Operand(nfa) => stack.push(nfa),
            Postfix::Star => {
                let a = stack.pop().ok_or(RegexError::Empty)?;
                stack.push(a.merge_kleene());
            }
            Postfix::Concat | Postfix::Alt => {
                let b = stack.pop().ok_or(RegexError::Empty)?;
                let a = stack.pop().ok_or(RegexError::Empty)?;
                stack.push(match item {
                    Postfix::Concat => a.merge_connect(&b),
                    _ => a.merge_or(&b),
                });
            }
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(nfa), true) => Ok(nfa),
        _ => Err(RegexError::Empty),
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    output: Vec<Postfix>,
    operators: Vec<(Operator, usize)>,
    need_operator: bool,
}

impl Parser {
    fn new(pattern: &str) -> Self {
        Self {
            chars: pattern.chars().collect(),
            pos: 0,
            output: vec![],
            operators: vec![],
            need_operator: false,
        }
    }

    fn parse(mut self) -> Result<Vec<Postfix>, RegexError> {
        while let Some(&c) = self.chars.get(self.pos) {
            let offset = self.pos;
            self.pos += 1;
            match c {
                '(' => {
                    if self.need_operator {
                        self.push_operator(Operator::Concat, offset);
                    }
                    self.operators.push((Operator::Open, offset));
                    self.need_operator = false;
                }
                ')' => {
                    if !self.need_operator {
                        return Err(match self.operators.last() {
                            Some(&(Operator::Open, open)) => RegexError::EmptyGroup(open),
                            Some(&(_, at)) => RegexError::MissingOperand { op: '|', offset: at },
                            None => RegexError::UnbalancedClose(offset),
                        });
                    }
                    loop {
                        match self.operators.pop() {
                            Some((Operator::Open, _)) => break,
                            Some((op, _)) => self.output.push(postfix(op)),
                            None => return Err(RegexError::UnbalancedClose(offset)),
                        }
                    }
                }
                '|' => {
                    if !self.need_operator {
                        return Err(RegexError::MissingOperand { op: '|', offset });
                    }
                    self.push_operator(Operator::Alt, offset);
                    self.need_operator = false;
                }
                '*' => {
                    if !self.need_operator {
                        return Err(RegexError::MissingOperand { op: '*', offset });
                    }
                    self.output.push(Postfix::Star);
                }
                '[' => {
                    let nfa = self.bracket(offset)?;
                    self.operand(nfa, offset);
                }
                '.' => self.operand(Automaton::from_range(RuneRange::ANY), offset),
                '\\' => {
                    let c = self.escape(offset)?;
                    self.operand(Automaton::from_range(RuneRange::new(c, c + 1)), offset);
                }
                c => self.operand(Automaton::from_range(RuneRange::single(c)), offset),
            }
        }

        if !self.need_operator {
            return Err(match self.operators.last() {
                Some(&(Operator::Open, open)) => RegexError::UnclosedGroup(open),
                Some(&(_, at)) => RegexError::MissingOperand { op: '|', offset: at },
                None => RegexError::Empty,
            });
        }
        while let Some((op, offset)) = self.operators.pop() {
            if op == Operator::Open {
                return Err(RegexError::UnclosedGroup(offset));
            }
            self.output.push(postfix(op));
        }

        Ok(self.output)
    }

    fn operand(&mut self, nfa: Automaton, offset: usize) {
        if self.need_operator {
            self.push_operator(Operator::Concat, offset);
        }
        self.output.push(Postfix::Operand(nfa));
        self.need_operator = true;
    }

    fn push_operator(&mut self, op: Operator, offset: usize) {
        while let Some(&(top, _)) = self.operators.last() {
            if top == Operator::Open || top.precedence() < op.precedence() {
                break;
            }
            self.operators.pop();
            self.output.push(postfix(top));
        }
        self.operators.push((op, offset));
    }

    /// Reads the character after a `\` at `offset`.
    fn escape(&mut self, offset: usize) -> Result<u32, RegexError> {
        let c = *self
            .chars
            .get(self.pos)
            .ok_or(RegexError::UnterminatedEscape(offset))?;
        self.pos += 1;
        if c != 'u' {
            return Ok(c as u32);
        }

        let end = (self.pos + 4).min(self.chars.len());
        let digits: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        match u32::from_str_radix(&digits, 16) {
            Ok(code) if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(code)
            }
            _ => Err(RegexError::InvalidHex { offset, digits }),
        }
    }

    /// Reads the body of a bracket expression opened at `offset`.
    fn bracket(&mut self, offset: usize) -> Result<Automaton, RegexError> {
        let body_start = self.pos;
        let mut body = vec![];
        loop {
            let at = self.pos;
            match self.chars.get(at) {
                None => return Err(RegexError::UnterminatedBracket(offset)),
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    body.push(self.escape(at)?);
                }
                Some(&c) => {
                    self.pos += 1;
                    body.push(c as u32);
                }
            }
        }

        let malformed = || RegexError::MalformedBracket {
            offset,
            content: self.chars[body_start..self.pos - 1].iter().collect(),
        };
        let range = match body[..] {
            [] => return Ok(Automaton::epsilon()),
            [c] => RuneRange::new(c, c + 1),
            [start, dash, end] if dash == '-' as u32 && start <= end && end < MAX_RUNE => {
                RuneRange::new(start, end + 1)
            }
            _ => return Err(malformed()),
        };
        Ok(Automaton::from_range(range))
    }
}

fn postfix(op: Operator) -> Postfix {
    match op {
        Operator::Concat => Postfix::Concat,
        _ => Postfix::Alt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicode_escape() {
        let dfa = compile(r"\u0041\u00E9").unwrap().to_dfa();
        assert!(dfa.matches("Aé").is_some());
    }

    #[test]
    fn escaped_bracket_bounds() {
        let dfa = compile(r"[\u0000-\u0009]").unwrap().to_dfa();
        assert!(dfa.matches("\t").is_some());
        assert!(dfa.matches("\n").is_none());

        let dfa = compile(r"[\[-\]]").unwrap().to_dfa();
        assert!(dfa.matches("\\").is_some());
    }

    #[test]
    fn concat_binds_tighter_than_alternation() {
        let dfa = compile("ab|cd").unwrap().to_dfa();
        assert!(dfa.matches("ab").is_some());
        assert!(dfa.matches("cd").is_some());
        assert!(dfa.matches("abd").is_none());
        assert!(dfa.matches("acd").is_none());
    }

    #[test]
    fn star_binds_tightest() {
        let dfa = compile("ab*").unwrap().to_dfa();
        assert!(dfa.matches("abbb").is_some());
        assert!(dfa.matches("abab").is_none());

        let dfa = compile("(ab)*").unwrap().to_dfa();
        assert!(dfa.matches("abab").is_some());
    }

    #[test]
    fn dot_is_an_operand() {
        let dfa = compile(".b").unwrap().to_dfa();
        assert!(dfa.matches("xb").is_some());
        assert!(dfa.matches("b").is_none());
    }
}
