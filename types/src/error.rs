use crate::cell::HashBytes;

/// Fallible cell-level operation outcome.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// A read past the declared data bits or references of a cell.
    #[error("cell data or reference underflow")]
    CellUnderflow,
    /// A write past 1023 bits or 4 references of a builder.
    #[error("cell data or reference overflow")]
    CellOverflow,
    /// Unexpected TL-B constructor tag.
    #[error("invalid constructor tag")]
    InvalidTag,
    /// Structurally invalid data.
    #[error("malformed data")]
    InvalidData,
    /// An integer does not fit into the requested width.
    #[error("integer out of range")]
    IntOverflow,
    /// Tried to read the payload of a pruned branch.
    #[error("pruned branch access")]
    PrunedBranchAccess,
    /// Cell tree is too deep.
    #[error("cell depth overflow")]
    DepthOverflow,
    /// The surrounding context aborted the operation (e.g. out of gas).
    #[error("operation cancelled")]
    Cancelled,
    /// A library cell could not be resolved; the hash names the missing code.
    #[error("library cell {0} not found")]
    LibraryNotFound(HashBytes),
}
