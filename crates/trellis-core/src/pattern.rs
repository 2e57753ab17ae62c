//! Priority path-pattern matching.
//!
//! A [`PathMatcher`] holds a set of patterns split by one separator (`/` for
//! service paths, `.` for IPv4 addresses) and resolves a path to the most
//! specific pattern that structurally matches it.
//!
//! # Tokens
//!
//! - literal: must equal the segment exactly (`:name` is a literal too)
//! - `*`: exactly one non-empty segment
//! - `**`: every remaining segment, zero or more; only valid as the last token
//!
//! A trailing separator is significant for exact patterns (`/t1/*/` only
//! matches paths ending in `/`) but not once `**` is present: `/t1/**/` and
//! `/t1/**` are the same pattern.
//!
//! # Priority
//!
//! The set is kept sorted so that a lookup returns the first structural
//! match. Tokens are compared left to right: literal before `*` before `**`,
//! literals by their text. When one pattern is a prefix of the other, the
//! shorter one ranks first.
//!
//! ```rust
//! use trellis_core::PathMatcher;
//!
//! let matcher = PathMatcher::paths(["/t1/t2/t3", "/t1/t2/*", "/t1/*/t2", "/t1/**"]).unwrap();
//! assert_eq!(matcher.find("/t1/t2/t3"), Some("/t1/t2/t3"));
//! assert_eq!(matcher.find("/t1/t2/t9"), Some("/t1/t2/*"));
//! assert_eq!(matcher.find("/t1/x/y/z"), Some("/t1/**"));
//! ```

use std::cmp::Ordering;
use std::fmt;

use crate::error::PatternError;

/// Token matching exactly one segment.
pub const SINGLE_WILDCARD: &str = "*";

/// Token matching all remaining segments.
pub const MULTI_WILDCARD: &str = "**";

/// Separator used for service paths.
pub const PATH_SEPARATOR: char = '/';

/// Separator used for IPv4 address lists.
pub const IP_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Single,
    Multi,
}

impl Token {
    fn parse(segment: &str) -> Self {
        match segment {
            SINGLE_WILDCARD => Self::Single,
            MULTI_WILDCARD => Self::Multi,
            literal => Self::Literal(literal.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 0,
            Self::Single => 1,
            Self::Multi => 2,
        }
    }

    fn cmp_priority(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank()).then_with(|| match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a.cmp(b),
            _ => Ordering::Equal,
        })
    }
}

/// A parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Parses `raw` using `separator`.
    pub fn parse(raw: &str, separator: char) -> Result<Self, PatternError> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut tokens: Vec<Token> = raw.split(separator).map(Token::parse).collect();

        // `/t1/**/` is the same pattern as `/t1/**`.
        if tokens.len() >= 2
            && tokens[tokens.len() - 2] == Token::Multi
            && tokens.last() == Some(&Token::Literal(String::new()))
        {
            tokens.pop();
        }

        if let Some(pos) = tokens.iter().position(|t| *t == Token::Multi)
            && pos + 1 != tokens.len()
        {
            return Err(PatternError::MisplacedMultiWildcard {
                pattern: raw.to_string(),
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns `true` if the pattern contains a wildcard token.
    pub fn has_wildcard(&self) -> bool {
        self.tokens.iter().any(|t| !matches!(t, Token::Literal(_)))
    }

    /// Structural match against an already split path.
    pub fn matches(&self, segments: &[&str]) -> bool {
        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Multi => return true,
                Token::Single => match segments.get(i) {
                    Some(segment) if !segment.is_empty() => {}
                    _ => return false,
                },
                Token::Literal(literal) => {
                    if segments.get(i).copied() != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
        }
        segments.len() == self.tokens.len()
    }
}

impl Ord for Pattern {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.tokens.iter().zip(&other.tokens) {
            let ord = a.cmp_priority(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.tokens
            .len()
            .cmp(&other.tokens.len())
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Pattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A sorted pattern set bound to one separator.
///
/// Sorting happens on insertion, never on lookup, so [`find`](Self::find) is a
/// linear scan that stops at the first structural match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatcher {
    separator: char,
    patterns: Vec<Pattern>,
}

impl Default for PathMatcher {
    fn default() -> Self {
        Self::empty(PATH_SEPARATOR)
    }
}

impl PathMatcher {
    /// Creates an empty set for `separator`.
    pub fn empty(separator: char) -> Self {
        Self {
            separator,
            patterns: Vec::new(),
        }
    }

    /// Builds a set from `patterns`. Duplicates collapse to one entry.
    pub fn new<I, S>(separator: char, patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = patterns
            .into_iter()
            .map(|p| Pattern::parse(p.as_ref(), separator))
            .collect::<Result<Vec<_>, _>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(Self {
            separator,
            patterns: parsed,
        })
    }

    /// Builds a `/`-separated set.
    pub fn paths<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(PATH_SEPARATOR, patterns)
    }

    /// Builds a `.`-separated set for IPv4 addresses.
    pub fn ips<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(IP_SEPARATOR, patterns)
    }

    /// The separator this set splits on.
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Inserts a pattern in priority order.
    ///
    /// Returns `false` if the pattern was already present.
    pub fn insert(&mut self, raw: &str) -> Result<bool, PatternError> {
        let pattern = Pattern::parse(raw, self.separator)?;
        match self.patterns.binary_search(&pattern) {
            Ok(_) => Ok(false),
            Err(pos) => {
                self.patterns.insert(pos, pattern);
                Ok(true)
            }
        }
    }

    /// Removes a pattern. Returns `true` if it was present.
    pub fn remove(&mut self, raw: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.raw != raw);
        self.patterns.len() != before
    }

    /// Returns `true` if `raw` is registered verbatim.
    pub fn contains(&self, raw: &str) -> bool {
        self.patterns.iter().any(|p| p.raw == raw)
    }

    /// Resolves `path` to the highest-priority matching pattern.
    pub fn find(&self, path: &str) -> Option<&str> {
        if self.is_root(path) {
            return self
                .patterns
                .iter()
                .find(|p| p.raw == path)
                .map(Pattern::as_str);
        }

        let segments: Vec<&str> = path.split(self.separator).collect();
        self.patterns
            .iter()
            .find(|p| p.matches(&segments))
            .map(Pattern::as_str)
    }

    /// Returns `true` if any pattern matches `path`.
    pub fn is_match(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// Patterns in priority order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    /// Number of patterns in the set.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn is_root(&self, path: &str) -> bool {
        let mut chars = path.chars();
        chars.next() == Some(self.separator) && chars.next().is_none()
    }
}
