//! `#{var}` command templates.
//!
//! `##` is an escaped `#`; a `#` not followed by `{` or `#` is kept as is.

use std::{borrow::Borrow, collections::HashMap, ffi::OsStr, hash::Hash};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("Undefined variable '{0}' at column {1}")]
    UndefinedVar(String, usize),

    #[error("Unclosed brace (found '#{{' at column {0})")]
    UnclosedBrace(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Lit(String),
    /// (name, 1-based column of the leading '#')
    Var(String, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(fmt: &str) -> Result<Self, InterpError> {
        let mut segments = Vec::new();
        let mut lit = String::with_capacity(fmt.len());
        let mut chars = fmt.chars().enumerate().peekable();

        while let Some((i, c)) = chars.next() {
            if c != '#' {
                lit.push(c);
                continue;
            }
            match chars.peek() {
                Some((_, '#')) => {
                    chars.next();
                    lit.push('#');
                }
                Some((_, '{')) => {
                    chars.next();
                    let mut name = String::new();
                    let closed = loop {
                        match chars.next() {
                            Some((_, '}')) => break true,
                            Some((_, ch)) => name.push(ch),
                            None => break false,
                        }
                    };
                    if !closed {
                        return Err(InterpError::UnclosedBrace(i + 1));
                    }
                    if !lit.is_empty() {
                        segments.push(Segment::Lit(std::mem::take(&mut lit)));
                    }
                    segments.push(Segment::Var(name, i + 1));
                }
                _ => lit.push('#'),
            }
        }
        if !lit.is_empty() {
            segments.push(Segment::Lit(lit));
        }
        Ok(Self { segments })
    }

    pub fn render<K, V>(&self, variables: &HashMap<K, V>) -> Result<String, InterpError>
    where
        K: Borrow<str> + Hash + Eq,
        V: AsRef<OsStr>,
    {
        let mut res = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Lit(s) => res += s,
                Segment::Var(name, col) => {
                    let Some(value) = variables.get(name.as_str()) else {
                        return Err(InterpError::UndefinedVar(name.clone(), *col))
                    };
                    res += value.as_ref().to_string_lossy().as_ref();
                }
            }
        }
        Ok(res)
    }
}

pub fn interp<K, V>(fmt: &str, variables: &HashMap<K, V>) -> Result<String, InterpError>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<OsStr>,
{
    Template::parse(fmt)?.render(variables)
}
