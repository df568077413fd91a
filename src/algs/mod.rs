//! Communication algorithms: point-to-point backends, collectives, wire
//! records and one-sided window epochs.

pub mod collective;
pub mod communicator;
pub mod rma;
pub mod wire;

pub use communicator::{CommError, CommTag, Communicator, LocalComm, NoComm, Wait};
