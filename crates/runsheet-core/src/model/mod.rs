//! Typed domain model: identifiers, levels, orders, and sibling rows.

pub mod ids;
pub mod node;

pub use ids::{InvalidId, NodeId, ParentId};
pub use node::{ContainerKind, InvalidOrder, Level, Order, ParseEnumError, SiblingNode};
