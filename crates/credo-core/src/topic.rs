//! Topic key codec
//!
//! Controller variables are addressed on the wire as `"<name>$<index>"`.
//! This module is the only place that knows about that encoding: the
//! device proxy and the simulated bus go through [`TopicKey`] for both
//! directions.

use crate::error::TopicError;
use std::fmt;
use std::str::FromStr;

/// Separator between variable name and device index.
pub const SEPARATOR: char = '$';

/// A variable name bound to one device index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    name: String,
    index: u32,
}

impl TopicKey {
    /// Create a key, validating the variable name.
    pub fn new(name: impl Into<String>, index: u32) -> Result<Self, TopicError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, index })
    }

    /// Parse a raw `name$index` key, splitting at the last `$`.
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        let (name, index) = split(raw)?;
        Self::new(name, index)
    }

    /// Variable name without the index suffix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Consume the key, returning the variable name
    pub fn into_name(self) -> String {
        self.name
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, SEPARATOR, self.index)
    }
}

impl FromStr for TopicKey {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Encode `name` and `index` into the wire form.
pub fn encode(name: &str, index: u32) -> Result<String, TopicError> {
    Ok(TopicKey::new(name, index)?.to_string())
}

/// Split a raw key at the last `$` into name and index.
///
/// Only the index is checked; the name may be empty or contain `$`.
/// Error events are routed this way.
pub fn split(raw: &str) -> Result<(&str, u32), TopicError> {
    let (name, suffix) = raw
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| TopicError::MissingSeparator {
            key: raw.to_string(),
        })?;
    let index = parse_index(suffix).ok_or_else(|| TopicError::InvalidIndex {
        key: raw.to_string(),
        suffix: suffix.to_string(),
    })?;
    Ok((name, index))
}

fn validate_name(name: &str) -> Result<(), TopicError> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(TopicError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Canonical decimal only: no sign, no whitespace, no leading zeros.
fn parse_index(suffix: &str) -> Option<u32> {
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if suffix.len() > 1 && suffix.starts_with('0') {
        return None;
    }
    suffix.parse().ok()
}
