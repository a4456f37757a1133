//! Proxy rules and their path patterns.
//!
//! A proxy rule maps an HTTP method and a path pattern to a metric increment.
//! Patterns follow the backend's mapping-rule syntax:
//! - literal text matches itself
//! - `{name}` matches one or more characters other than `/`
//! - a trailing `$` anchors the pattern to the end of the path
//! - without `$` the pattern is a prefix match, so `/` matches everything
//!
//! Query strings are ignored on both the pattern and the destination.

use crate::domain::error::ConfigError;
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Param,
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    pieces: Vec<Piece>,
    anchored: bool,
}

impl PathPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidPattern` if the pattern does not start with
    /// `/`, has an unbalanced brace, or an empty placeholder.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let path = pattern.split('?').next().unwrap_or_default();
        if !path.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let (path, anchored) = match path.strip_suffix('$') {
            Some(stripped) => (stripped, true),
            None => (path, false),
        };

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = path.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name_len = 0;
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' | '/' => return Err(invalid("unterminated placeholder")),
                            _ => name_len += 1,
                        }
                    }
                    if !closed {
                        return Err(invalid("unterminated placeholder"));
                    }
                    if name_len == 0 {
                        return Err(invalid("empty placeholder"));
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Param);
                }
                '}' => return Err(invalid("unbalanced '}'")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            source: pattern.to_string(),
            pieces,
            anchored,
        })
    }

    /// The pattern as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether a request destination matches this pattern.
    pub fn matches(&self, destination: &str) -> bool {
        let path = destination.split('?').next().unwrap_or_default();
        match_pieces(&self.pieces, path, self.anchored)
    }
}

fn match_pieces(pieces: &[Piece], input: &str, anchored: bool) -> bool {
    let Some((first, rest)) = pieces.split_first() else {
        return !anchored || input.is_empty();
    };

    match first {
        Piece::Literal(text) => input
            .strip_prefix(text.as_str())
            .is_some_and(|tail| match_pieces(rest, tail, anchored)),
        Piece::Param => {
            let segment_len = input.find('/').unwrap_or(input.len());
            // Shortest match first so a following literal can claim the rest.
            (1..=segment_len)
                .filter(|&len| input.is_char_boundary(len))
                .any(|len| match_pieces(rest, &input[len..], anchored))
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Deserialize)]
struct RawProxyRule {
    http_method: String,
    pattern: String,
    metric_system_name: String,
    #[serde(default = "default_delta")]
    delta: i64,
}

fn default_delta() -> i64 {
    1
}

/// A mapping rule: requests matching `http_method` and `pattern` increment
/// `metric_system_name` by `delta`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawProxyRule")]
pub struct ProxyRule {
    http_method: String,
    pattern: PathPattern,
    metric_system_name: String,
    delta: i64,
}

impl ProxyRule {
    /// Create a rule, compiling its pattern.
    ///
    /// # Errors
    /// Returns `ConfigError` if the pattern is invalid or the method or metric
    /// name is empty.
    pub fn new(
        http_method: impl Into<String>,
        pattern: &str,
        metric_system_name: impl Into<String>,
        delta: i64,
    ) -> Result<Self, ConfigError> {
        let http_method = http_method.into();
        let metric_system_name = metric_system_name.into();
        if http_method.trim().is_empty() {
            return Err(ConfigError::InvalidRule(format!(
                "rule for {pattern:?} has no HTTP method"
            )));
        }
        if metric_system_name.trim().is_empty() {
            return Err(ConfigError::InvalidRule(format!(
                "rule for {pattern:?} has no metric name"
            )));
        }
        Ok(Self {
            http_method,
            pattern: PathPattern::parse(pattern)?,
            metric_system_name,
            delta,
        })
    }

    pub fn http_method(&self) -> &str {
        &self.http_method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn metric_system_name(&self) -> &str {
        &self.metric_system_name
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    /// Whether the rule's method equals `method`, ignoring case.
    pub fn applies_to_method(&self, method: &str) -> bool {
        self.http_method.eq_ignore_ascii_case(method)
    }
}

impl TryFrom<RawProxyRule> for ProxyRule {
    type Error = ConfigError;

    fn try_from(raw: RawProxyRule) -> Result<Self, Self::Error> {
        ProxyRule::new(
            raw.http_method,
            &raw.pattern,
            raw.metric_system_name,
            raw.delta,
        )
    }
}

impl fmt::Display for ProxyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} => {} += {}",
            self.http_method, self.pattern, self.metric_system_name, self.delta
        )
    }
}

/// Indices (in configuration order) of the rules whose path pattern matches.
pub fn match_paths(destination: &str, rules: &[ProxyRule]) -> Vec<usize> {
    rules
        .iter()
        .enumerate()
        .filter(|(_, rule)| rule.pattern.matches(destination))
        .map(|(index, _)| index)
        .collect()
}

/// Indices of the rules that match both the path and the HTTP method.
pub fn match_rules(destination: &str, http_method: &str, rules: &[ProxyRule]) -> Vec<usize> {
    match_paths(destination, rules)
        .into_iter()
        .filter(|&index| rules[index].applies_to_method(http_method))
        .collect()
}
