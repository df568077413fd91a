//! Partitioning errors for dgrid

use thiserror::Error;

use crate::algs::communicator::CommError;

/// Errors from building, staging, committing and querying decompositions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// A query needs a committed decomposition but none exists yet.
    #[error("partition has no committed decomposition")]
    NotCommitted,
    /// Staged regions do not tile the world (gap, overlap, bad count).
    #[error("invalid decomposition: {reason}")]
    InvalidDecomposition { reason: String },
    /// At least one rank rejected a collective commit; nothing changed.
    #[error("commit rejected by ranks {ranks:?}: {reason}")]
    CommitRejected { ranks: Vec<usize>, reason: String },
    /// No region is registered for the partition id.
    #[error("unknown partition id {0}")]
    UnknownPartition(usize),
    /// `insert` of a partition id that already has a region.
    #[error("partition id {0} already has a region")]
    DuplicatePartition(usize),
    /// Point outside a non-toroidal world.
    #[error("point {point:?} is outside the world")]
    PointOutsideWorld { point: Vec<i64> },
    /// Operation not offered by this layout.
    #[error("{operation} is not supported by the {layout} layout")]
    Unsupported {
        layout: &'static str,
        operation: &'static str,
    },
    /// The process count cannot be mapped onto the layout.
    #[error("{procs} processes: {reason}")]
    InvalidProcessCount { procs: usize, reason: String },
    /// Extent/AOI configuration rejected.
    #[error("invalid partition config: {0}")]
    InvalidConfig(String),
    /// Quad tree ran out of node ids.
    #[error("quad tree is limited to {max} nodes")]
    TreeCapacity { max: usize },
    /// No tree node with that id.
    #[error("quad tree has no node {0}")]
    UnknownNode(usize),
    /// Every communication tag block has been handed out.
    #[error("all {allocated} tag blocks are in use")]
    TagsExhausted { allocated: usize },
    /// Transport failure inside a partition collective.
    #[error(transparent)]
    Comm(#[from] CommError),
}
