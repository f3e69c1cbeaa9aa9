use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::{fmt, str::FromStr};

use super::ids::{NodeId, ParentId};

/// The two tiers of the plan hierarchy.
///
/// Master rows are reusable templates; instance rows are time-bound copies
/// created by instantiating a master. The two are never joined by id
/// equality, only through an explicit `instantiated_from` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Master,
    Instance,
}

impl Level {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Instance => "instance",
        }
    }
}

/// The container types whose children form an ordered sibling set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Migration,
    Iteration,
    Plan,
    Sequence,
    Phase,
    Step,
}

impl ContainerKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Migration => "migration",
            Self::Iteration => "iteration",
            Self::Plan => "plan",
            Self::Sequence => "sequence",
            Self::Phase => "phase",
            Self::Step => "step",
        }
    }

    /// Name of the child rows this container orders.
    #[must_use]
    pub const fn child_noun(self) -> &'static str {
        match self {
            Self::Migration => "iteration",
            Self::Iteration => "plan",
            Self::Plan => "sequence",
            Self::Sequence => "phase",
            Self::Phase => "step",
            Self::Step => "instruction",
        }
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

impl FromStr for Level {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "master" => Ok(Self::Master),
            "instance" => Ok(Self::Instance),
            _ => Err(ParseEnumError {
                expected: "level",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for ContainerKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "migration" => Ok(Self::Migration),
            "iteration" => Ok(Self::Iteration),
            "plan" => Ok(Self::Plan),
            "sequence" => Ok(Self::Sequence),
            "phase" => Ok(Self::Phase),
            "step" => Ok(Self::Step),
            _ => Err(ParseEnumError {
                expected: "container kind",
                got: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A 1-based sibling position. Zero and negative values are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Order(NonZeroU32);

/// Error returned when a raw integer cannot be used as an [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOrder {
    #[error("order must be positive, got {0}")]
    NonPositive(i64),
    #[error("order {0} exceeds the supported range")]
    OutOfRange(i64),
}

impl Order {
    /// The first position in any sibling set.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Build an order from a raw, possibly untrusted, integer.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidOrder::NonPositive`] for `value <= 0` and
    /// [`InvalidOrder::OutOfRange`] for values above `u32::MAX`.
    pub fn from_raw(value: i64) -> Result<Self, InvalidOrder> {
        if value <= 0 {
            return Err(InvalidOrder::NonPositive(value));
        }
        let narrowed = u32::try_from(value).map_err(|_| InvalidOrder::OutOfRange(value))?;
        NonZeroU32::new(narrowed)
            .map(Self)
            .ok_or(InvalidOrder::NonPositive(value))
    }

    /// Position `index` (0-based) converted to a 1-based order.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidOrder::OutOfRange`] if the sibling set is larger
    /// than `u32::MAX - 1` entries.
    pub fn from_index(index: usize) -> Result<Self, InvalidOrder> {
        let raw = i64::try_from(index)
            .ok()
            .and_then(|i| i.checked_add(1))
            .unwrap_or(i64::MAX);
        Self::from_raw(raw)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for Order {
    type Error = InvalidOrder;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_raw(i64::from(value))
    }
}

impl From<Order> for u32 {
    fn from(value: Order) -> Self {
        value.get()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

// ---------------------------------------------------------------------------
// SiblingNode
// ---------------------------------------------------------------------------

/// One row in an ordered sibling set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingNode {
    pub id: NodeId,
    pub parent: ParentId,
    pub level: Level,
    pub order: Order,
    /// Sibling that must run before this one; `None` means free-standing.
    #[serde(default)]
    pub predecessor: Option<NodeId>,
    /// Master node this instance row was copied from.
    #[serde(default)]
    pub instantiated_from: Option<NodeId>,
}

impl SiblingNode {
    #[must_use]
    pub const fn new(id: NodeId, parent: ParentId, level: Level, order: Order) -> Self {
        Self {
            id,
            parent,
            level,
            order,
            predecessor: None,
            instantiated_from: None,
        }
    }

    #[must_use]
    pub fn with_predecessor(mut self, predecessor: Option<NodeId>) -> Self {
        self.predecessor = predecessor;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Option<NodeId>) -> Self {
        self.instantiated_from = origin;
        self
    }

    /// Returns `true` if the node lives in the `(parent, level)` partition.
    #[must_use]
    pub fn belongs_to(&self, parent: &ParentId, level: Level) -> bool {
        self.level == level && &self.parent == parent
    }
}
