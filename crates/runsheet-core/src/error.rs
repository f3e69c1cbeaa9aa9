use std::fmt;

/// Machine-readable error codes for transport layers and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    ScopeNotFound,
    InvalidIdentifier,
    DuplicateOrder,
    NonPositiveOrder,
    OrderOutOfRange,
    OrderGap,
    CycleDetected,
    ChainTooDeep,
    UnknownNode,
    DanglingPredecessor,
    ForeignNode,
    DuplicateNode,
    ScopeNotEmpty,
    ScopeChanged,
    FatalConsistency,
    StorageFailure,
    LockContention,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ScopeNotFound => "E2001",
            Self::InvalidIdentifier => "E2002",
            Self::DuplicateOrder => "E2101",
            Self::NonPositiveOrder => "E2102",
            Self::OrderOutOfRange => "E2103",
            Self::OrderGap => "E2104",
            Self::CycleDetected => "E2201",
            Self::ChainTooDeep => "E2202",
            Self::UnknownNode => "E2301",
            Self::DanglingPredecessor => "E2302",
            Self::ForeignNode => "E2303",
            Self::DuplicateNode => "E2304",
            Self::ScopeNotEmpty => "E2305",
            Self::ScopeChanged => "E2306",
            Self::FatalConsistency => "E3001",
            Self::StorageFailure => "E5001",
            Self::LockContention => "E5002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Runsheet store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::ScopeNotFound => "Parent scope not found at the requested level",
            Self::InvalidIdentifier => "Invalid identifier",
            Self::DuplicateOrder => "Duplicate order value",
            Self::NonPositiveOrder => "Order must be positive",
            Self::OrderOutOfRange => "Order value out of range",
            Self::OrderGap => "Order values are not contiguous",
            Self::CycleDetected => "Predecessor cycle detected",
            Self::ChainTooDeep => "Predecessor chain too deep",
            Self::UnknownNode => "Node is not part of this scope",
            Self::DanglingPredecessor => "Predecessor is not part of this scope",
            Self::ForeignNode => "Node belongs to a different scope",
            Self::DuplicateNode => "Node appears more than once",
            Self::ScopeNotEmpty => "Scope already holds nodes",
            Self::ScopeChanged => "Scope changed while the reorder was staged",
            Self::FatalConsistency => "Persisted scope violates ordering invariants",
            Self::StorageFailure => "Storage failure",
            Self::LockContention => "Scope lock contention",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `runsheet init` to create the store."),
            Self::ConfigParseError => Some("Fix syntax in .runsheet/config.toml and retry."),
            Self::ScopeNotFound => {
                Some("Check the parent id and whether it is a master or an instance.")
            }
            Self::InvalidIdentifier => Some("Identifiers are 1-128 characters without spaces."),
            Self::DuplicateOrder => Some("Give every sibling a distinct order value."),
            Self::NonPositiveOrder | Self::OrderOutOfRange => {
                Some("Use order values between 1 and the sibling count.")
            }
            Self::OrderGap => Some("Run `runsheet repair` to close gaps in the ordering."),
            Self::CycleDetected => Some("Remove or change a predecessor link on the reported path."),
            Self::ChainTooDeep => {
                Some("Shorten the predecessor chain or raise ordering.max_chain_depth.")
            }
            Self::UnknownNode | Self::DanglingPredecessor => {
                Some("Reload the scope; the node may have been deleted.")
            }
            Self::ForeignNode | Self::DuplicateNode => {
                Some("Submit each node of the target scope exactly once.")
            }
            Self::ScopeNotEmpty => Some("Instantiate into a fresh instance parent."),
            Self::ScopeChanged => Some("Reload the scope and resubmit the reorder."),
            Self::FatalConsistency => {
                Some("Do not retry. Inspect the scope with `runsheet check` and repair manually.")
            }
            Self::StorageFailure => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the concurrent reorder completes."),
        }
    }

    /// Returns `true` when retrying the same call may succeed without the
    /// caller changing its input.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ScopeChanged | Self::LockContention | Self::StorageFailure
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
