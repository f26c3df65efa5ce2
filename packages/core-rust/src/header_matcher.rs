//! Header predicates used to gate route rules.
//!
//! A `HeaderMatcher` is built from a `HeaderMatcherConfig` and evaluated
//! against a call's `HeaderMap`. Exactly one match specifier must be set in
//! the configuration; the regex specifier must compile and matches the whole
//! value.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::headers::HeaderMap;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Half-open integer range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Int64Range {
    pub start: i64,
    pub end: i64,
}

/// Serialized form of a header matcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaderMatcherConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_match: Option<Int64Range>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub present_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains_match: Option<String>,
    pub invert_match: bool,
}

/// Errors from building a `HeaderMatcher`.
#[derive(Debug, thiserror::Error)]
pub enum HeaderMatcherError {
    #[error("header matcher has an empty header name")]
    EmptyName,
    #[error("header matcher for '{name}' sets no match specifier")]
    MissingSpecifier { name: String },
    #[error("header matcher for '{name}' sets more than one match specifier")]
    ConflictingSpecifiers { name: String },
    #[error("header matcher for '{name}' has an invalid regex: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("header matcher for '{name}' has an empty range [{start}, {end})")]
    EmptyRange { name: String, start: i64, end: i64 },
}

// ---------------------------------------------------------------------------
// HeaderMatcher
// ---------------------------------------------------------------------------

/// How a header value is compared.
#[derive(Debug, Clone)]
pub enum HeaderMatchSpec {
    Exact(String),
    Regex(Regex),
    Range { start: i64, end: i64 },
    Present(bool),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

/// A single compiled header predicate.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: String,
    spec: HeaderMatchSpec,
    invert: bool,
}

impl HeaderMatcher {
    #[must_use]
    pub fn new(name: impl Into<String>, spec: HeaderMatchSpec, invert: bool) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            spec,
            invert,
        }
    }

    /// Compiles a matcher from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `HeaderMatcherError` when the name is empty, when zero or
    /// several specifiers are set, when the regex does not compile, or when
    /// the range is empty.
    pub fn from_config(config: &HeaderMatcherConfig) -> Result<Self, HeaderMatcherError> {
        let name = config.name.clone();
        if name.is_empty() {
            return Err(HeaderMatcherError::EmptyName);
        }

        let mut specs = Vec::with_capacity(1);
        if let Some(v) = &config.exact_match {
            specs.push(HeaderMatchSpec::Exact(v.clone()));
        }
        if let Some(pattern) = &config.regex_match {
            // Anchor so the whole value must match.
            let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                HeaderMatcherError::InvalidRegex {
                    name: name.clone(),
                    source,
                }
            })?;
            specs.push(HeaderMatchSpec::Regex(regex));
        }
        if let Some(range) = config.range_match {
            if range.start >= range.end {
                return Err(HeaderMatcherError::EmptyRange {
                    name,
                    start: range.start,
                    end: range.end,
                });
            }
            specs.push(HeaderMatchSpec::Range {
                start: range.start,
                end: range.end,
            });
        }
        if let Some(present) = config.present_match {
            specs.push(HeaderMatchSpec::Present(present));
        }
        if let Some(v) = &config.prefix_match {
            specs.push(HeaderMatchSpec::Prefix(v.clone()));
        }
        if let Some(v) = &config.suffix_match {
            specs.push(HeaderMatchSpec::Suffix(v.clone()));
        }
        if let Some(v) = &config.contains_match {
            specs.push(HeaderMatchSpec::Contains(v.clone()));
        }

        match specs.len() {
            0 => Err(HeaderMatcherError::MissingSpecifier { name }),
            1 => {
                let spec = specs.remove(0);
                Ok(Self::new(name, spec, config.invert_match))
            }
            _ => Err(HeaderMatcherError::ConflictingSpecifiers { name }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates this predicate. An absent header yields `invert`; multiple
    /// values are joined with `,` before comparison.
    #[must_use]
    pub fn matches(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.joined(&self.name) else {
            return self.invert;
        };

        let matched = match &self.spec {
            HeaderMatchSpec::Exact(expected) => value == *expected,
            HeaderMatchSpec::Regex(regex) => regex.is_match(&value),
            HeaderMatchSpec::Range { start, end } => value
                .parse::<i64>()
                .is_ok_and(|n| n >= *start && n < *end),
            HeaderMatchSpec::Present(present) => *present,
            HeaderMatchSpec::Prefix(prefix) => value.starts_with(prefix.as_str()),
            HeaderMatchSpec::Suffix(suffix) => value.ends_with(suffix.as_str()),
            HeaderMatchSpec::Contains(needle) => value.contains(needle.as_str()),
        };

        matched != self.invert
    }
}

/// Returns `true` when every matcher accepts the headers. An empty matcher
/// list accepts everything.
#[must_use]
pub fn match_all(headers: &HeaderMap, matchers: &[HeaderMatcher]) -> bool {
    matchers.iter().all(|m| m.matches(headers))
}
