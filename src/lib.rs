#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dgrid
//!
//! dgrid is the distributed spatial-field layer of a parallel agent-based
//! simulation: a global integer grid is split into one box per process, each
//! process stores its box plus a halo of width *AOI* (area of interest), and
//! halos are refreshed from their owners at explicit synchronisation points.
//!
//! ## Features
//! - Partitions over a process grid (Cartesian), over arbitrary staged
//!   rectangles (non-uniform) or over the leaves of a quad tree, with a
//!   collective two-phase `commit`, load `balance` and quad-tree groups
//! - [`HaloField`](field::HaloField): point classification, local-index
//!   translation, `get`/`set`, `sync`, `collect`/`distribute`, group
//!   transfers and data-preserving `reload`
//! - Two halo exchangers: packed neighbour all-to-all (structured) and eager
//!   one-sided puts into ghost windows completed by a fence (RMA)
//! - Pluggable communication backends: serial ([`NoComm`](algs::NoComm)),
//!   in-process threads (`LocalComm`) and MPI (feature `mpi-support`)
//! - Entity migration between neighbouring partitions
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! dgrid = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "check-invariants"]
//! ```
//!
//! Every operation that communicates is collective: all ranks call it, in
//! the same order. Fields and migrators take a tag block from their
//! partition when they are created, so they too must be created in the same
//! order on every rank.
//!
//! ## Consistency
//! Halo cells only change inside `sync` and the collectives that end with
//! one. Between two syncs a halo read returns the value the owner had at the
//! previous sync, never an error.

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod field;
pub mod halo_error;
pub mod partitioning;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use halo_error::HaloError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::data::storage::{GridStorage, VecStorage};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::field::{
        DoubleGrid, DoubleGrid2D, ExchangeMode, HaloConfig, HaloField, IntGrid, IntGrid2D, Migrator,
        ObjectGrid, ObjectGrid2D, SyncStats,
    };
    pub use crate::halo_error::HaloError;
    pub use crate::partitioning::{LayoutKind, Partition, PartitionConfig, PartitionError};
    pub use crate::topology::point::{Int2D, Int3D, IntPoint};
    pub use crate::topology::rect::{IntRect, IntRect2D};
}
