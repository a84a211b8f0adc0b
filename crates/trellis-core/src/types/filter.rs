//! LDAP-style filter expressions.
//!
//! Used for bundle platform filters and generic requirement filters, e.g.
//! `(&(osgi.os=linux)(|(osgi.arch=x86_64)(osgi.arch=aarch64)))`.

use super::attributes::{properties_to_attributes, AttrValue, Attributes, PlatformProperties};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal { attr: String, value: String },
    Approx { attr: String, value: String },
    GreaterEq { attr: String, value: String },
    LessEq { attr: String, value: String },
    Present { attr: String },
    /// `attr=a*b*c`; empty first/last parts mean a leading/trailing wildcard
    Substring { attr: String, parts: Vec<String> },
}

/// Filter syntax errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Unexpected end of filter: {input}")]
    UnexpectedEnd { input: String },

    #[error("Unexpected character '{found}' at position {position} in filter: {input}")]
    Unexpected {
        input: String,
        position: usize,
        found: char,
    },

    #[error("Missing attribute name at position {position} in filter: {input}")]
    MissingAttribute { input: String, position: usize },
}

impl Filter {
    /// Parse a filter string
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        Self::from_str(input)
    }

    /// Evaluate the filter against an attribute map
    pub fn matches(&self, attrs: &Attributes) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(attrs)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(attrs)),
            Filter::Not(filter) => !filter.matches(attrs),
            Filter::Present { attr } => lookup(attrs, attr).is_some(),
            Filter::Equal { attr, value } => {
                lookup(attrs, attr).map_or(false, |v| compare(v, value, Ordering::is_eq))
            }
            Filter::GreaterEq { attr, value } => {
                lookup(attrs, attr).map_or(false, |v| compare(v, value, Ordering::is_ge))
            }
            Filter::LessEq { attr, value } => {
                lookup(attrs, attr).map_or(false, |v| compare(v, value, Ordering::is_le))
            }
            Filter::Approx { attr, value } => lookup(attrs, attr).map_or(false, |v| match v {
                AttrValue::String(s) => approx_eq(s, value),
                AttrValue::List(items) => items.iter().any(|s| approx_eq(s, value)),
                other => compare(other, value, Ordering::is_eq),
            }),
            Filter::Substring { attr, parts } => lookup(attrs, attr).map_or(false, |v| match v {
                AttrValue::String(s) => substring_match(s, parts),
                AttrValue::List(items) => items.iter().any(|s| substring_match(s, parts)),
                _ => false,
            }),
        }
    }

    /// Evaluate the filter against a platform property dictionary
    pub fn matches_properties(&self, properties: &PlatformProperties) -> bool {
        self.matches(&properties_to_attributes(properties))
    }
}

fn lookup<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a AttrValue> {
    attrs.get(key).or_else(|| {
        attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn compare(value: &AttrValue, operand: &str, accept: fn(Ordering) -> bool) -> bool {
    match value {
        AttrValue::List(items) => items.iter().any(|s| accept(s.as_str().cmp(operand))),
        other => other.compare_operand(operand).map_or(false, accept),
    }
}

fn approx_eq(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    normalize(a) == normalize(b)
}

fn substring_match(value: &str, parts: &[String]) -> bool {
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(pos) => remaining = &remaining[pos + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.get(self.pos).map_or(false, |c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn end_error(&self) -> FilterError {
        FilterError::UnexpectedEnd {
            input: self.input.to_string(),
        }
    }

    fn unexpected(&self, found: char) -> FilterError {
        FilterError::Unexpected {
            input: self.input.to_string(),
            position: self.pos,
            found,
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.unexpected(c)),
            None => Err(self.end_error()),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, FilterError> {
        self.skip_whitespace();
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.end_error()),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut filters = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('(') => filters.push(self.parse_filter()?),
                Some(')') if !filters.is_empty() => return Ok(filters),
                Some(c) => return Err(self.unexpected(c)),
                None => return Err(self.end_error()),
            }
        }
    }

    fn parse_item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        let mut attr = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            attr.push(c);
            self.pos += 1;
        }
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(FilterError::MissingAttribute {
                input: self.input.to_string(),
                position: start,
            });
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('~' | '<' | '>')) => {
                self.pos += 1;
                self.expect('=')?;
                c
            }
            Some(c) => return Err(self.unexpected(c)),
            None => return Err(self.end_error()),
        };

        let parts = self.parse_value()?;
        let filter = match op {
            '=' if parts.len() == 2 && parts.iter().all(String::is_empty) => {
                Filter::Present { attr }
            }
            '=' if parts.len() > 1 => Filter::Substring { attr, parts },
            '=' => Filter::Equal {
                attr,
                value: parts.concat(),
            },
            '~' => Filter::Approx {
                attr,
                value: parts.join("*"),
            },
            '>' => Filter::GreaterEq {
                attr,
                value: parts.join("*"),
            },
            _ => Filter::LessEq {
                attr,
                value: parts.join("*"),
            },
        };
        Ok(filter)
    }

    /// Value segments split on unescaped `*`
    fn parse_value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                Some(')') => break,
                Some('(') => return Err(self.unexpected('(')),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.end_error())?;
                    if let Some(last) = parts.last_mut() {
                        last.push(escaped);
                    }
                    self.pos += 1;
                }
                Some('*') => {
                    parts.push(String::new());
                    self.pos += 1;
                }
                Some(c) => {
                    if let Some(last) = parts.last_mut() {
                        last.push(c);
                    }
                    self.pos += 1;
                }
                None => return Err(self.end_error()),
            }
        }
        Ok(parts)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser::new(s);
        let filter = parser.parse_filter()?;
        parser.skip_whitespace();
        match parser.peek() {
            None => Ok(filter),
            Some(c) => Err(parser.unexpected(c)),
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(filters) | Filter::Or(filters) => {
                let op = if matches!(self, Filter::And(_)) { '&' } else { '|' };
                write!(f, "({}", op)?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            Filter::Not(filter) => write!(f, "(!{})", filter),
            Filter::Equal { attr, value } => write!(f, "({}={})", attr, escape(value)),
            Filter::Approx { attr, value } => write!(f, "({}~={})", attr, escape(value)),
            Filter::GreaterEq { attr, value } => write!(f, "({}>={})", attr, escape(value)),
            Filter::LessEq { attr, value } => write!(f, "({}<={})", attr, escape(value)),
            Filter::Present { attr } => write!(f, "({}=*)", attr),
            Filter::Substring { attr, parts } => {
                let parts: Vec<String> = parts.iter().map(|p| escape(p)).collect();
                write!(f, "({}={})", attr, parts.join("*"))
            }
        }
    }
}

impl TryFrom<String> for Filter {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Filter::from_str(&value)
    }
}

impl From<Filter> for String {
    fn from(filter: Filter) -> Self {
        filter.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Version;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_simple_equality() {
        let filter = Filter::parse("(osgi.os=linux)").unwrap();
        assert_eq!(
            filter,
            Filter::Equal {
                attr: "osgi.os".to_string(),
                value: "linux".to_string()
            }
        );
    }

    #[test]
    fn test_parse_composite() {
        let filter = Filter::parse("(&(a=1)(|(b>=2)(!(c=*))))").unwrap();
        assert!(matches!(filter, Filter::And(ref items) if items.len() == 2));
        assert_eq!(filter.to_string(), "(&(a=1)(|(b>=2)(!(c=*))))");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Filter::parse("").is_err());
        assert!(Filter::parse("(a=1").is_err());
        assert!(Filter::parse("(=1)").is_err());
        assert!(Filter::parse("(&)").is_err());
        assert!(Filter::parse("(a=1))").is_err());
    }

    #[test]
    fn test_typed_matching() {
        let values = attrs(&[
            ("count", AttrValue::Long(5)),
            ("version", AttrValue::Version(Version::new(1, 2, 0))),
            ("name", AttrValue::from("widget")),
        ]);
        assert!(Filter::parse("(count>=5)").unwrap().matches(&values));
        assert!(!Filter::parse("(count>=10)").unwrap().matches(&values));
        assert!(Filter::parse("(version>=1.1)").unwrap().matches(&values));
        assert!(Filter::parse("(version<=1.10)").unwrap().matches(&values));
        assert!(Filter::parse("(name~= WIDGET )").unwrap().matches(&values));
        assert!(Filter::parse("(NAME=widget)").unwrap().matches(&values));
    }

    #[test]
    fn test_substring_matching() {
        let values = attrs(&[("path", AttrValue::from("org.example.core.impl"))]);
        assert!(Filter::parse("(path=org.*)").unwrap().matches(&values));
        assert!(Filter::parse("(path=*core*)").unwrap().matches(&values));
        assert!(Filter::parse("(path=org*core*impl)").unwrap().matches(&values));
        assert!(!Filter::parse("(path=*api*)").unwrap().matches(&values));
    }

    #[test]
    fn test_presence_and_lists() {
        let values = attrs(&[(
            "arch",
            AttrValue::List(vec!["x86".to_string(), "arm".to_string()]),
        )]);
        assert!(Filter::parse("(arch=*)").unwrap().matches(&values));
        assert!(Filter::parse("(arch=arm)").unwrap().matches(&values));
        assert!(!Filter::parse("(os=*)").unwrap().matches(&values));
    }

    #[test]
    fn test_escaped_values() {
        let filter = Filter::parse(r"(name=a\*b)").unwrap();
        let values = attrs(&[("name", AttrValue::from("a*b"))]);
        assert!(filter.matches(&values));
        assert_eq!(filter.to_string(), r"(name=a\*b)");
    }

    #[test]
    fn test_platform_properties() {
        let mut props = PlatformProperties::new();
        props.insert("osgi.ws".to_string(), "gtk".to_string());
        assert!(Filter::parse("(osgi.ws=gtk)")
            .unwrap()
            .matches_properties(&props));
    }
}
