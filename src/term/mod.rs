//! Terms
//!
//! The universal on-disk representation for fstate expressions and file
//! contents. A term is an immutable tree of strings, lists, tuples and named
//! applications with a single canonical printed form:
//!
//! ```text
//! Path("/store/a",Regular("68656c6c6f"),[])
//! ```
//!
//! The identity of a term is the BLAKE3 hash of that printed form, so printing
//! must be deterministic and `print -> parse -> print` must be the identity.

pub mod parse;

pub use parse::parse_term;

use crate::error::FStateError;
use crate::types::FSId;
use blake3::Hasher;
use std::fmt;

/// Deepest nesting the parser accepts, counting the outermost term as one.
pub const MAX_TERM_DEPTH: usize = 1024;

/// Generic term tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Str(String),
    List(Vec<Term>),
    Tuple(Vec<Term>),
    App { name: String, args: Vec<Term> },
}

impl Term {
    pub fn string<S: Into<String>>(s: S) -> Self {
        Term::Str(s.into())
    }

    pub fn app<S: Into<String>>(name: S, args: Vec<Term>) -> Self {
        Term::App {
            name: name.into(),
            args,
        }
    }

    /// A list of identities, each rendered as a hex string.
    pub fn id_list(ids: &[FSId]) -> Self {
        Term::List(ids.iter().map(|id| Term::Str(id.to_hex())).collect())
    }

    /// Nesting depth, counting this term as one level.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((term, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            let children: &[Term] = match term {
                Term::Str(_) => &[],
                Term::List(items) | Term::Tuple(items) => items,
                Term::App { args, .. } => args,
            };
            stack.extend(children.iter().map(|child| (child, depth + 1)));
        }
        deepest
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Term::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Match an application by name and arity.
    pub fn as_app(&self, name: &str, arity: usize) -> Option<&[Term]> {
        match self {
            Term::App { name: n, args } if n == name && args.len() == arity => Some(args),
            _ => None,
        }
    }

    pub fn head(&self) -> Option<&str> {
        match self {
            Term::App { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Str(s) => write_quoted(f, s),
            Term::List(items) => {
                f.write_str("[")?;
                write_comma_separated(f, items)?;
                f.write_str("]")
            }
            Term::Tuple(items) => {
                f.write_str("(")?;
                write_comma_separated(f, items)?;
                f.write_str(")")
            }
            Term::App { name, args } => {
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("(")?;
                    write_comma_separated(f, args)?;
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

fn write_comma_separated(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("\"")
}

/// Return the canonical textual representation of a term.
pub fn print_term(t: &Term) -> String {
    t.to_string()
}

/// Hash a term: BLAKE3 over its canonical printed form.
pub fn hash_term(t: &Term) -> FSId {
    hash_text(&print_term(t))
}

/// Hash already-printed canonical term text.
pub fn hash_text(text: &str) -> FSId {
    let mut hasher = Hasher::new();
    hasher.update(text.as_bytes());
    FSId(*hasher.finalize().as_bytes())
}

/// Build an error whose message embeds the printed form of the offending term.
pub fn bad_term<S: Into<String>>(message: S, t: &Term) -> FStateError {
    FStateError::BadTerm {
        message: message.into(),
        term: print_term(t),
    }
}
