//! HaloError: unified error type for distributed field operations.
//!
//! Collective operations (`sync`, `collect`, `distribute`, `reload`, group
//! transfers) return these so that every rank observes the same outcome.
//! Local contract violations (writing into the halo, reading beyond the AOI
//! under the RMA exchanger) are also reported through this type by the
//! `try_*` APIs; the infallible wrappers turn them into a panic carrying the
//! same diagnostic.

use thiserror::Error;

use crate::algs::communicator::CommError;
use crate::partitioning::error::PartitionError;

#[derive(Debug, Error)]
pub enum HaloError {
    /// Partition query or mutation failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// Point-to-point or collective transfer failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// Point lies outside a non-toroidal world.
    #[error("rank {rank}: point {point:?} is outside the world {world}")]
    OutOfWorld {
        rank: usize,
        point: Vec<i64>,
        world: String,
    },
    /// `set` targeted a cell this rank does not own (halo or remote).
    #[error("rank {rank}: write to {point:?} outside local partition {local} (local coords {local_point:?})")]
    OutOfBoundsWrite {
        rank: usize,
        point: Vec<i64>,
        local: String,
        local_point: Vec<i64>,
    },
    /// RMA read of a cell not covered by the local rect or any ghost window.
    #[error("rank {rank}: read of {point:?} is beyond the area of interest of {local}")]
    OutOfAoi {
        rank: usize,
        point: Vec<i64>,
        local: String,
    },
    /// `to_local_point` on a point outside local + halo.
    #[error("rank {rank}: point {point:?} is not within local+halo {halo}")]
    NotInLocalOrHalo {
        rank: usize,
        point: Vec<i64>,
        halo: String,
    },
    /// Flat-buffer access outside the storage.
    #[error("storage range [{offset}, {offset}+{len}) exceeds buffer of {capacity}")]
    StorageRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    /// A supplied buffer or storage has the wrong shape.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },
    /// `sync` was called after the partition changed without `reload`.
    #[error("field built against decomposition epoch {field}, partition is at {partition}; call reload first")]
    StaleDecomposition { field: u64, partition: u64 },
    /// A remote read could not be answered.
    #[error("remote read from rank {owner} failed: {reason}")]
    RemoteRead { owner: usize, reason: String },
    /// A collective was aborted by its root (e.g. missing input storage).
    #[error("collective rooted at rank {root} aborted: {reason}")]
    CollectiveAborted { root: usize, reason: String },
    /// Migration destination is not adjacent to this rank.
    #[error("rank {rank} is not a neighbor of this partition")]
    NotANeighbor { rank: usize },
    /// Operation not available for this configuration.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
