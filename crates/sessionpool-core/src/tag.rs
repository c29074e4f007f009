//! Session tag grammar
//!
//! A tag records which session-level state has been applied to a pooled
//! session. It is a `;`-separated list of `key=value` directives, for
//! example `NLS_DATE_FORMAT=YYYY-MM-DD;TIME_ZONE=UTC`.
//!
//! The pool compares tags as opaque strings. Parsing only happens inside
//! fix-up callbacks, which use [`Tag::parse`] and [`TagSchema`] to reject
//! requests they cannot honour.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::{PoolError, Result};

/// A parsed session tag
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tag {
    directives: Vec<(String, String)>,
}

impl Tag {
    /// Parse a tag string.
    ///
    /// Each directive must be `key=value` with a non-empty key and value and
    /// no surrounding whitespace. Keys must be unique. A trailing `;` is
    /// accepted.
    ///
    /// ```
    /// use sessionpool_core::Tag;
    ///
    /// let tag = Tag::parse("TIME_ZONE=UTC;NLS_DATE_FORMAT=YYYY-MM-DD").unwrap();
    /// assert_eq!(tag.get("TIME_ZONE"), Some("UTC"));
    /// assert!(Tag::parse("TIME_ZONE").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let mut directives: Vec<(String, String)> = Vec::new();
        let body = input.strip_suffix(';').unwrap_or(input);
        if body.is_empty() {
            return Err(PoolError::Value("tag must contain at least one key=value directive".into()));
        }

        for directive in body.split(';') {
            let (key, value) = directive.split_once('=').ok_or_else(|| {
                PoolError::Value(format!("tag directive '{}' is not of the form key=value", directive))
            })?;

            if key.is_empty() || value.is_empty() {
                return Err(PoolError::Value(format!(
                    "tag directive '{}' has an empty key or value",
                    directive
                )));
            }
            if key.trim() != key || value.trim() != value {
                return Err(PoolError::Value(format!(
                    "tag directive '{}' has surrounding whitespace",
                    directive
                )));
            }
            if directives.iter().any(|(k, _)| k == key) {
                return Err(PoolError::Value(format!("tag key '{}' appears more than once", key)));
            }

            directives.push((key.to_string(), value.to_string()));
        }

        Ok(Self { directives })
    }

    /// Look up the value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over the directives in the order they were written
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.directives.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

impl FromStr for Tag {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        Tag::parse(s)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.directives.iter().enumerate() {
            if idx > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// The set of keys and values a fix-up routine knows how to apply
#[derive(Debug, Clone, Default)]
pub struct TagSchema {
    keys: BTreeMap<String, Option<BTreeSet<String>>>,
}

impl TagSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any value for `key`
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.insert(key.into(), None);
        self
    }

    /// Accept only the listed values for `key`
    pub fn with_values<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys
            .insert(key.into(), Some(values.into_iter().map(Into::into).collect()));
        self
    }

    /// Parse `input` and check every directive against the schema
    pub fn parse(&self, input: &str) -> Result<Tag> {
        let tag = Tag::parse(input)?;
        self.validate(&tag)?;
        Ok(tag)
    }

    pub fn validate(&self, tag: &Tag) -> Result<()> {
        for (key, value) in tag.iter() {
            match self.keys.get(key) {
                None => {
                    return Err(PoolError::Value(format!("unknown tag key '{}'", key)));
                }
                Some(Some(allowed)) if !allowed.contains(value) => {
                    return Err(PoolError::Value(format!(
                        "unsupported value '{}' for tag key '{}'",
                        value, key
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
