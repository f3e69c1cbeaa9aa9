//! Strongly-typed identifiers for sibling nodes and their containers.
//!
//! Identifiers are opaque strings (UUIDs, surrogate keys, slugs). They are
//! validated once at construction so that downstream code never has to
//! re-check for empty, oversized, or whitespace-bearing values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted identifier length in bytes.
pub const MAX_ID_LEN: usize = 128;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidId {
    #[error("identifier must not be empty")]
    Empty,
    #[error("identifier exceeds 128 bytes ({0} bytes)")]
    TooLong(usize),
    #[error("identifier '{0}' contains whitespace or control characters")]
    BadCharacter(String),
}

fn check_identifier(raw: &str) -> Result<(), InvalidId> {
    if raw.is_empty() {
        return Err(InvalidId::Empty);
    }
    if raw.len() > MAX_ID_LEN {
        return Err(InvalidId::TooLong(raw.len()));
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(InvalidId::BadCharacter(raw.to_string()));
    }
    Ok(())
}

/// Identifier of one sibling node (a sequence, phase, step or instruction).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Validate and wrap a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidId`] if the value is empty, longer than
    /// [`MAX_ID_LEN`], or contains whitespace/control characters.
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        check_identifier(&raw)?;
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of a container (plan, sequence, phase, step, ...).
///
/// A `ParentId` alone never addresses a scope: the same raw value may exist
/// at both the master and the instance level. Pair it with a
/// [`Level`](super::Level) through the resolver.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParentId(String);

impl ParentId {
    /// Validate and wrap a raw container identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidId`] under the same rules as [`NodeId::new`].
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidId> {
        let raw = raw.into();
        check_identifier(&raw)?;
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl FromStr for NodeId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ParentId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParentId> for String {
    fn from(value: ParentId) -> Self {
        value.0
    }
}

impl FromStr for ParentId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ParentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_uuid_and_slug_identifiers() {
        assert!(NodeId::new("6f1c2a9e-7c1d-4f9b-9a77-0d5c3a1b2e44").is_ok());
        assert!(ParentId::new("plan-42").is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(NodeId::new(""), Err(InvalidId::Empty));
        assert!(matches!(
            NodeId::new("step 1"),
            Err(InvalidId::BadCharacter(_))
        ));
        assert!(matches!(
            ParentId::new("plan\n"),
            Err(InvalidId::BadCharacter(_))
        ));
    }

    #[test]
    fn rejects_oversized_identifier() {
        let raw = "x".repeat(MAX_ID_LEN + 1);
        assert_eq!(NodeId::new(raw), Err(InvalidId::TooLong(MAX_ID_LEN + 1)));
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: NodeId = serde_json::from_str("\"seq-1\"").expect("valid id");
        assert_eq!(ok.as_str(), "seq-1");
        assert!(serde_json::from_str::<NodeId>("\"\"").is_err());
    }
}
