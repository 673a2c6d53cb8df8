//! Term parser
//!
//! Recursive-descent parser for the canonical term syntax. Whitespace between
//! tokens is accepted and discarded, so hand-written terms parse to the same
//! tree as their canonical form.

use super::{Term, MAX_TERM_DEPTH};
use crate::error::FStateError;

/// Parse term text into a `Term`.
pub fn parse_term(input: &str) -> Result<Term, FStateError> {
    let mut parser = Parser {
        input,
        pos: 0,
        depth: 0,
    };
    parser.skip_ws();
    let term = parser.term()?;
    parser.skip_ws();
    if parser.pos != input.len() {
        return Err(parser.error("trailing input after term"));
    }
    Ok(term)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> FStateError {
        FStateError::ParseError {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), FStateError> {
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            Some(c) => {
                self.pos -= c.len_utf8();
                Err(self.error(&format!("expected '{}', found '{}'", wanted, c)))
            }
            None => Err(self.error(&format!("expected '{}', found end of input", wanted))),
        }
    }

    fn term(&mut self) -> Result<Term, FStateError> {
        self.depth += 1;
        if self.depth > MAX_TERM_DEPTH {
            return Err(self.error("term nesting too deep"));
        }
        let result = match self.peek() {
            Some('"') => self.string().map(Term::Str),
            Some('[') => self.sequence('[', ']').map(Term::List),
            Some('(') => self.sequence('(', ')').map(Term::Tuple),
            Some(c) if is_ident_start(c) => self.application(),
            Some(c) => Err(self.error(&format!("unexpected character '{}'", c))),
            None => Err(self.error("unexpected end of input")),
        };
        self.depth -= 1;
        result
    }

    fn string(&mut self) -> Result<String, FStateError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some(c) => return Err(self.error(&format!("invalid escape '\\{}'", c))),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Vec<Term>, FStateError> {
        self.expect(open)?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(close) {
            self.bump();
            return Ok(items);
        }
        loop {
            self.skip_ws();
            items.push(self.term()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                }
                Some(c) => {
                    return Err(self.error(&format!("expected ',' or '{}', found '{}'", close, c)))
                }
                None => return Err(self.error(&format!("expected '{}'", close))),
            }
        }
    }

    fn application(&mut self) -> Result<Term, FStateError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let name = self.input[start..self.pos].to_string();
        self.skip_ws();
        let args = if self.peek() == Some('(') {
            self.sequence('(', ')')?
        } else {
            Vec::new()
        };
        Ok(Term::App { name, args })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
