//! Data module: grid storage and strided sub-box views.

pub mod storage;
pub mod subarray;

pub use storage::{GridStorage, VecStorage};
pub use subarray::Subarray;
