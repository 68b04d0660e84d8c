//! Target filters over capability properties.
//!
//! Grammar: `(key=value)`, `(key=*)`, `(&f1f2..)`, `(|f1f2..)`, `(!f)`.

use std::fmt;

use thiserror::Error;

use crate::value::Properties;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equals(String, String),
    Present(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter '{filter}' at offset {offset}: {reason}")]
pub struct FilterError {
    pub filter: String,
    pub offset: usize,
    pub reason: &'static str,
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let mut p = Parser {
            src: input,
            pos: 0,
        };
        let f = p.filter()?;
        p.skip_ws();
        if p.pos != input.len() {
            return Err(p.error("trailing characters"));
        }
        Ok(f)
    }

    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Filter::Equals(key, expected) => props
                .get(key)
                .is_some_and(|v| value_matches(v, expected)),
            Filter::Present(key) => props.get(key).is_some_and(|v| !v.is_null()),
            Filter::And(fs) => fs.iter().all(|f| f.matches(props)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(props)),
            Filter::Not(f) => !f.matches(props),
        }
    }
}

fn value_matches(value: &serde_json::Value, expected: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(items) => items.iter().any(|v| value_matches(v, expected)),
        serde_json::Value::Null => false,
        other => other.to_string() == expected,
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equals(k, v) => write!(f, "({k}={v})"),
            Filter::Present(k) => write!(f, "({k}=*)"),
            Filter::And(fs) => {
                f.write_str("(&")?;
                fs.iter().try_for_each(|x| write!(f, "{x}"))?;
                f.write_str(")")
            }
            Filter::Or(fs) => {
                f.write_str("(|")?;
                fs.iter().try_for_each(|x| write!(f, "{x}"))?;
                f.write_str(")")
            }
            Filter::Not(x) => write!(f, "(!{x})"),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &'static str) -> FilterError {
        FilterError {
            filter: self.src.to_string(),
            offset: self.pos,
            reason,
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn expect(&mut self, c: char, reason: &'static str) -> Result<(), FilterError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(', "expected '('")?;
        self.skip_ws();
        let f = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(')', "expected ')'")?;
        Ok(f)
    }

    fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('(') => out.push(self.filter()?),
                _ if out.is_empty() => return Err(self.error("empty filter list")),
                _ => return Ok(out),
            }
        }
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let rest = &self.src[self.pos..];
        let eq = rest.find('=').ok_or_else(|| self.error("expected '='"))?;
        let close = rest.find(')').ok_or_else(|| self.error("expected ')'"))?;
        if close < eq {
            return Err(self.error("expected '='"));
        }
        let key = rest[..eq].trim();
        let value = rest[eq + 1..close].trim();
        if key.is_empty() {
            return Err(self.error("empty key"));
        }
        self.pos += close;
        Ok(if value == "*" {
            Filter::Present(key.to_string())
        } else {
            Filter::Equals(key.to_string(), value.to_string())
        })
    }
}
