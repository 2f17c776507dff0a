//! Path queries over untyped response trees.
//!
//! Expressions use a small JSONPath subset:
//!
//! ```text
//! $                 root
//! .name  ['name']   field of a mapping
//! ..name            field at any depth (descendant-or-self, pre-order)
//! .*  [*]           every element of a sequence or value of a mapping
//! ..*               every descendant
//! [n]               sequence index, negative counts from the end
//! ```
//!
//! Evaluation never fails: a branch that hits a missing field or a node of the
//! wrong shape simply contributes no matches.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("path must start with '$': {0:?}")]
    MissingRoot(String),
    #[error("unexpected {found:?} at offset {offset} in {expr:?}")]
    Unexpected {
        expr: String,
        offset: usize,
        found: char,
    },
    #[error("unterminated segment in {0:?}")]
    Unterminated(String),
    #[error("empty field name at offset {offset} in {expr:?}")]
    EmptyName { expr: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Descendant(String),
    Wildcard,
    DescendantWildcard,
    Index(i64),
}

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    expr: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Compile an expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression does not follow the grammar above.
    pub fn compile(expr: &str) -> Result<Self, QueryError> {
        let segments = Parser::new(expr).parse()?;
        Ok(Self {
            expr: expr.to_string(),
            segments,
        })
    }

    /// All matches in document order.
    #[must_use]
    pub fn find<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for node in current {
                apply(segment, node, &mut next);
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }

    /// Owned copies of all matches.
    #[must_use]
    pub fn find_cloned(&self, root: &Value) -> Vec<Value> {
        self.find(root).into_iter().cloned().collect()
    }

    /// First match, if any.
    #[must_use]
    pub fn first<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.find(root).into_iter().next()
    }

    /// Whether the path yields at least one non-null value.
    #[must_use]
    pub fn exists(&self, root: &Value) -> bool {
        self.find(root).into_iter().any(|v| !v.is_null())
    }

    /// The source expression.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl std::str::FromStr for JsonPath {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

/// A lazily compiled path for `static` call sites.
///
/// Panics on first use if the literal does not compile, the same way a bad
/// `Regex` literal would.
macro_rules! json_path {
    ($expr:literal) => {
        std::sync::LazyLock::new(|| $crate::query::JsonPath::compile($expr).unwrap())
    };
}
pub(crate) use json_path;

/// Compile and evaluate in one go, returning owned matches.
///
/// Prefer a compiled [`JsonPath`] at call sites that run more than once.
///
/// # Errors
///
/// Returns an error if the expression does not compile.
pub fn query(tree: &Value, expr: &str) -> Result<Vec<Value>, QueryError> {
    Ok(JsonPath::compile(expr)?.find_cloned(tree))
}

fn apply<'a>(segment: &Segment, node: &'a Value, out: &mut Vec<&'a Value>) {
    match segment {
        Segment::Field(name) => {
            if let Some(v) = node.as_object().and_then(|m| m.get(name)) {
                out.push(v);
            }
        }
        Segment::Wildcard => children(node, out),
        Segment::Index(i) => {
            if let Some(items) = node.as_array() {
                let len = items.len() as i64;
                let idx = if *i < 0 { len + i } else { *i };
                if (0..len).contains(&idx) {
                    out.push(&items[idx as usize]);
                }
            }
        }
        Segment::Descendant(name) => descend(node, &mut |n| {
            if let Some(v) = n.as_object().and_then(|m| m.get(name)) {
                out.push(v);
            }
        }),
        Segment::DescendantWildcard => {
            let mut nodes = Vec::new();
            descend(node, &mut |n| nodes.push(n));
            for n in nodes {
                children(n, out);
            }
        }
    }
}

fn children<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    match node {
        Value::Array(items) => out.extend(items.iter()),
        Value::Object(map) => out.extend(map.values()),
        _ => {}
    }
}

/// Visit `node` and every descendant in pre-order.
fn descend<'a>(node: &'a Value, visit: &mut impl FnMut(&'a Value)) {
    visit(node);
    match node {
        Value::Array(items) => {
            for item in items {
                descend(item, visit);
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                descend(value, visit);
            }
        }
        _ => {}
    }
}

struct Parser<'a> {
    expr: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expr: &'a str) -> Self {
        Self {
            expr,
            chars: expr.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>, QueryError> {
        if self.peek() != Some('$') {
            return Err(QueryError::MissingRoot(self.expr.to_string()));
        }
        self.pos += 1;

        let mut segments = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.pos += 1;
                    let descendant = self.peek() == Some('.');
                    if descendant {
                        self.pos += 1;
                    }
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        segments.push(if descendant {
                            Segment::DescendantWildcard
                        } else {
                            Segment::Wildcard
                        });
                        continue;
                    }
                    let name = self.name()?;
                    segments.push(if descendant {
                        Segment::Descendant(name)
                    } else {
                        Segment::Field(name)
                    });
                }
                '[' => {
                    self.pos += 1;
                    segments.push(self.bracket()?);
                }
                other => return Err(self.unexpected(other)),
            }
        }
        Ok(segments)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn unexpected(&self, found: char) -> QueryError {
        QueryError::Unexpected {
            expr: self.expr.to_string(),
            offset: self.pos,
            found,
        }
    }

    fn name(&mut self) -> Result<String, QueryError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '.' || c == '[' {
                break;
            }
            if c.is_whitespace() || c == ']' || c == '\'' || c == '"' {
                return Err(self.unexpected(c));
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(QueryError::EmptyName {
                expr: self.expr.to_string(),
                offset: start,
            });
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn bracket(&mut self) -> Result<Segment, QueryError> {
        let segment = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != quote) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(QueryError::Unterminated(self.expr.to_string()));
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Segment::Field(name)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                self.pos += 1;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits: String = self.chars[start..self.pos].iter().collect();
                let index = digits.parse().map_err(|_| QueryError::Unexpected {
                    expr: self.expr.to_string(),
                    offset: start,
                    found: c,
                })?;
                Segment::Index(index)
            }
            Some(c) => return Err(self.unexpected(c)),
            None => return Err(QueryError::Unterminated(self.expr.to_string())),
        };
        match self.peek() {
            Some(']') => {
                self.pos += 1;
                Ok(segment)
            }
            Some(c) => Err(self.unexpected(c)),
            None => Err(QueryError::Unterminated(self.expr.to_string())),
        }
    }
}
