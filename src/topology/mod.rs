//! Grid geometry: integer points and half-open boxes.
//!
//! Every partition, halo strip and storage extent in the crate is expressed
//! with these two types.

pub mod point;
pub mod rect;

pub use point::{Int2D, Int3D, IntPoint};
pub use rect::{IntRect, IntRect2D, periodic_shifts};
