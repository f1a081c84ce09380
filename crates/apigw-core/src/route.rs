//! Ordered path-pattern routing.
//!
//! A [`RouteTable`] holds [`RouteRule`]s in registration order and resolves a
//! request path to the first rule whose pattern matches it. Order is the only
//! tie-break: a more specific rule registered after a broader one is never
//! reached for paths the broader one covers.
//!
//! Pattern syntax, segment by segment:
//!
//! - `literal` matches exactly that segment
//! - `*` or `{name}` matches exactly one segment
//! - `**` matches the rest of the path (zero or more segments); only allowed last
//!
//! Empty segments are ignored on both sides, so `/api/usuarios/` and
//! `/api//usuarios` both resolve like `/api/usuarios`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RouteError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Multi,
}

/// A parsed route pattern such as `/api/usuarios/**`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        if !raw.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash(raw.to_string()));
        }

        let parts = split_path(raw);
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "**" if i + 1 == parts.len() => Segment::Multi,
                "**" => return Err(RouteError::MisplacedMultiWildcard(raw.to_string())),
                "*" => Segment::Single,
                p if p.starts_with('{') && p.ends_with('}') && p.len() > 2 => Segment::Single,
                p if p.contains(['*', '{', '}']) => {
                    return Err(RouteError::InvalidSegment {
                        pattern: raw.to_string(),
                        segment: p.to_string(),
                    });
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Structural match of `path` against this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.matches_segments(&split_path(path))
    }

    fn matches_segments(&self, path: &[&str]) -> bool {
        let mut consumed = 0;
        for segment in &self.segments {
            match segment {
                Segment::Multi => return true,
                Segment::Single => {
                    if consumed >= path.len() {
                        return false;
                    }
                }
                Segment::Literal(literal) => {
                    if path.get(consumed).copied() != Some(literal.as_str()) {
                        return false;
                    }
                }
            }
            consumed += 1;
        }
        consumed == path.len()
    }
}

impl FromStr for PathPattern {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PathPattern {
    type Error = RouteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.raw
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Whether `path` has a `.` or `..` segment, plain or percent-encoded.
///
/// URL parsers collapse such segments, so a path that matched one route
/// could reach the backend as a path outside it. `\` counts as a
/// separator the same way it does for http(s) URLs.
pub fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// A path pattern bound to a backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub name: String,
    pub pattern: PathPattern,
    pub target_service: String,
    /// Where the target service publishes its OpenAPI document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_path: Option<String>,
}

impl RouteRule {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        target_service: impl Into<String>,
    ) -> Result<Self, RouteError> {
        Ok(Self {
            name: name.into(),
            pattern: PathPattern::parse(pattern)?,
            target_service: target_service.into(),
            docs_path: None,
        })
    }

    pub fn with_docs_path(mut self, docs_path: impl Into<String>) -> Self {
        self.docs_path = Some(docs_path.into());
        self
    }
}

/// Immutable, ordered set of route rules. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Result<Self, RouteError> {
        let mut names = HashSet::with_capacity(rules.len());
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(RouteError::DuplicateName(rule.name.clone()));
            }
            if rule.target_service.trim().is_empty() {
                return Err(RouteError::EmptyTarget(rule.name.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// Returns the first rule, in registration order, matching `path`.
    /// `None` means no route is configured for the path.
    pub fn resolve(&self, path: &str) -> Option<&RouteRule> {
        let segments = split_path(path);
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches_segments(&segments))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Distinct target services in the order they are first referenced.
    pub fn services(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .map(|rule| rule.target_service.as_str())
            .filter(|service| seen.insert(*service))
            .collect()
    }

    /// The first docs path configured for `service`, if any.
    pub fn docs_path(&self, service: &str) -> Option<&str> {
        self.rules
            .iter()
            .filter(|rule| rule.target_service == service)
            .find_map(|rule| rule.docs_path.as_deref())
    }

    pub fn rules_for<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a RouteRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.target_service == service)
    }
}
