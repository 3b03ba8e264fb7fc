//! Route path pattern language
//!
//! Glob patterns are `/`-separated: a literal segment matches itself, `*`
//! matches exactly one segment, a trailing `*` matches one or more remaining
//! segments and a trailing `**` matches zero or more. Patterns prefixed with
//! `~` are regular expressions matched against the whole request path.

use crate::domain::types::ValidationError;
use regex::Regex;
use std::fmt;

const FIELD: &str = "path_pattern";
const REGEX_MARKER: char = '~';
const REGEX_META: &[char] = &[
    '\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$',
];

/// One non-terminal segment of a glob pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Wildcard,
}

/// How a glob pattern treats path segments beyond its fixed ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tail {
    Exact,
    OneOrMore,
    ZeroOrMore,
}

#[derive(Debug, Clone)]
pub struct GlobPattern {
    segments: Vec<Segment>,
    tail: Tail,
}

impl GlobPattern {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn tail(&self) -> Tail {
        self.tail
    }

    fn matches_segments(&self, path: &[&str]) -> bool {
        let fixed = self.segments.len();
        let arity_ok = match self.tail {
            Tail::Exact => path.len() == fixed,
            Tail::OneOrMore => path.len() > fixed,
            Tail::ZeroOrMore => path.len() >= fixed,
        };
        arity_ok
            && self
                .segments
                .iter()
                .zip(path)
                .all(|(segment, actual)| match segment {
                    Segment::Literal(lit) => lit == actual,
                    Segment::Wildcard => true,
                })
    }

    /// Length of the literal text every matching path starts with, counting
    /// the `/` that precedes a wildcard segment or a one-or-more tail
    fn literal_prefix_len(&self) -> usize {
        let fixed: usize = self
            .segments
            .iter()
            .map_while(|segment| match segment {
                Segment::Literal(lit) => Some(lit.len() + 1),
                Segment::Wildcard => None,
            })
            .sum();
        let open_ended = self.tail == Tail::OneOrMore
            || self.segments.iter().any(|s| matches!(s, Segment::Wildcard));
        if open_ended {
            fixed + 1
        } else {
            fixed.max(1)
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegexPattern {
    regex: Regex,
    literal_prefix_len: usize,
}

impl RegexPattern {
    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// A parsed `path_pattern`
#[derive(Debug, Clone)]
pub enum PathPattern {
    Glob(GlobPattern),
    Regex(RegexPattern),
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if let Some(expr) = raw.strip_prefix(REGEX_MARKER) {
            return Self::parse_regex(expr);
        }
        Self::parse_glob(raw)
    }

    fn parse_regex(expr: &str) -> Result<Self, ValidationError> {
        if expr.is_empty() {
            return Err(ValidationError::new(FIELD, "regex pattern is empty"));
        }
        let regex = Regex::new(expr)
            .map_err(|e| ValidationError::new(FIELD, format!("invalid regex: {e}")))?;
        let literal_prefix_len = expr
            .strip_prefix('^')
            .map(|rest| rest.chars().take_while(|c| !REGEX_META.contains(c)).count())
            .unwrap_or(0);
        Ok(Self::Regex(RegexPattern {
            regex,
            literal_prefix_len,
        }))
    }

    fn parse_glob(raw: &str) -> Result<Self, ValidationError> {
        if !raw.starts_with('/') {
            return Err(ValidationError::new(FIELD, "must start with '/' or '~'"));
        }

        let parts: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        let last = parts.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(parts.len());
        let mut tail = Tail::Exact;

        for (index, part) in parts.iter().enumerate() {
            match *part {
                "**" if index == last => tail = Tail::ZeroOrMore,
                "**" => {
                    return Err(ValidationError::new(
                        FIELD,
                        "'**' is only allowed as the final segment",
                    ))
                }
                "*" if index == last => tail = Tail::OneOrMore,
                "*" => segments.push(Segment::Wildcard),
                literal if literal.contains('*') => {
                    return Err(ValidationError::new(
                        FIELD,
                        format!("wildcard inside segment '{literal}'"),
                    ))
                }
                literal => segments.push(Segment::Literal(literal.to_string())),
            }
        }

        Ok(Self::Glob(GlobPattern { segments, tail }))
    }

    /// Characters of fixed text the pattern starts with; longer is more specific
    pub fn literal_prefix_len(&self) -> usize {
        match self {
            Self::Glob(glob) => glob.literal_prefix_len(),
            Self::Regex(re) => re.literal_prefix_len,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Glob(glob) => glob.matches_segments(&split_path(path)),
            Self::Regex(re) => re.regex.is_match(path),
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex(re) => write!(f, "{REGEX_MARKER}{}", re.regex.as_str()),
            Self::Glob(glob) => {
                for segment in &glob.segments {
                    match segment {
                        Segment::Literal(lit) => write!(f, "/{lit}")?,
                        Segment::Wildcard => f.write_str("/*")?,
                    }
                }
                match glob.tail {
                    Tail::Exact if glob.segments.is_empty() => f.write_str("/"),
                    Tail::Exact => Ok(()),
                    Tail::OneOrMore => f.write_str("/*"),
                    Tail::ZeroOrMore => f.write_str("/**"),
                }
            }
        }
    }
}

/// Split a request path into its non-empty segments
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
