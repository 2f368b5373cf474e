use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Outcomes a node operation reports to its caller.
///
/// None of these are fatal. `NodeFull`, `Frozen`, `ParentFull` and `StaleStack` ask the caller
/// to restructure or re-traverse and then retry; `KeyExists` and `NotFound` are key-level
/// answers; `NotSplittable` means the split policy upstream asked for something impossible.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    #[error("node has no free space left for the record")]
    NodeFull,

    #[error("key already exists in node")]
    KeyExists,

    #[error("key not found in node")]
    NotFound,

    #[error("node holds fewer than two live records and cannot be split")]
    NotSplittable,

    #[error("node is frozen by a structure modification")]
    Frozen,

    #[error("parent node cannot take another separator")]
    ParentFull,

    #[error("ancestor stack does not lead to this node")]
    StaleStack,

    #[error("key of {0} bytes exceeds the maximum key length")]
    KeyTooLarge(usize),

    #[error("invalid node capacity {0}")]
    InvalidCapacity(usize),

    #[error("records are not in strictly increasing key order")]
    OutOfOrder,

    #[error("internal node must start with an empty separator")]
    MissingLowSeparator,
}
