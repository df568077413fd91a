//! `IntPoint`: an integer coordinate in a `D`-dimensional grid index space.
//!
//! The same type is used for *global* points (coordinates in the whole
//! field) and *local* points (coordinates relative to the lower corner of a
//! process's storage box, halo included). Which frame a point lives in is a
//! property of the API that hands it out, not of the value.
//!
//! This module provides:
//! - Component-wise arithmetic (`+`, `-`) and per-axis shifting.
//! - Toroidal wrapping against a global extent.
//! - A serde representation as a plain sequence of `i64`, so points can be
//!   carried inside bincode-encoded payloads without a fixed-size array impl.

use std::fmt;
use std::ops::{Add, Index, Sub};

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An integer point with `D` components; dimension 0 is the slowest-varying
/// axis in every row-major layout used by this crate.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct IntPoint<const D: usize>(pub [i64; D]);

/// 2D point alias.
pub type Int2D = IntPoint<2>;
/// 3D point alias.
pub type Int3D = IntPoint<3>;

impl<const D: usize> IntPoint<D> {
    #[inline]
    pub const fn new(c: [i64; D]) -> Self {
        IntPoint(c)
    }

    /// The all-zero point.
    #[inline]
    pub const fn origin() -> Self {
        IntPoint([0; D])
    }

    /// A point with every component set to `v`.
    #[inline]
    pub const fn splat(v: i64) -> Self {
        IntPoint([v; D])
    }

    #[inline]
    pub const fn coords(&self) -> [i64; D] {
        self.0
    }

    /// Component `d`.
    #[inline]
    pub const fn get(&self, d: usize) -> i64 {
        self.0[d]
    }

    /// Copy of `self` with component `d` moved by `by`.
    #[inline]
    pub fn shifted(mut self, d: usize, by: i64) -> Self {
        self.0[d] += by;
        self
    }

    /// Component-wise offset by `off`.
    #[inline]
    pub fn offset(self, off: [i64; D]) -> Self {
        self + IntPoint(off)
    }

    /// Wrap every component into `[0, extent[d])`.
    #[inline]
    pub fn wrap(self, extent: [i64; D]) -> Self {
        let mut c = self.0;
        for d in 0..D {
            c[d] = c[d].rem_euclid(extent[d]);
        }
        IntPoint(c)
    }

    /// `true` when every component lies in `[0, extent[d])`.
    #[inline]
    pub fn within(&self, extent: [i64; D]) -> bool {
        (0..D).all(|d| self.0[d] >= 0 && self.0[d] < extent[d])
    }

    /// Shortest signed difference `self - other` on a torus of size `extent`.
    pub fn toroidal_delta(&self, other: &Self, extent: [i64; D]) -> [i64; D] {
        let mut out = [0; D];
        for d in 0..D {
            let w = extent[d];
            let mut dx = (self.0[d] - other.0[d]).rem_euclid(w);
            if dx > w / 2 {
                dx -= w;
            }
            out[d] = dx;
        }
        out
    }

    /// Components as a `Vec`, used when a point is reported inside an error.
    pub fn to_vec(&self) -> Vec<i64> {
        self.0.to_vec()
    }
}

impl<const D: usize> Default for IntPoint<D> {
    fn default() -> Self {
        Self::origin()
    }
}

impl<const D: usize> From<[i64; D]> for IntPoint<D> {
    fn from(c: [i64; D]) -> Self {
        IntPoint(c)
    }
}

impl<const D: usize> Index<usize> for IntPoint<D> {
    type Output = i64;
    fn index(&self, d: usize) -> &i64 {
        &self.0[d]
    }
}

impl<const D: usize> Add for IntPoint<D> {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self {
        for d in 0..D {
            self.0[d] += rhs.0[d];
        }
        self
    }
}

impl<const D: usize> Sub for IntPoint<D> {
    type Output = Self;
    fn sub(mut self, rhs: Self) -> Self {
        for d in 0..D {
            self.0[d] -= rhs.0[d];
        }
        self
    }
}

// -----------------------------------------------------------------------------
// Formatting traits
// -----------------------------------------------------------------------------

impl<const D: usize> fmt::Debug for IntPoint<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Prints `(x, y, ...)`.
impl<const D: usize> fmt::Display for IntPoint<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        f.write_str(")")
    }
}

// -----------------------------------------------------------------------------
// Serde
// -----------------------------------------------------------------------------

impl<const D: usize> Serialize for IntPoint<D> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(D)?;
        for c in &self.0 {
            tup.serialize_element(c)?;
        }
        tup.end()
    }
}

struct PointVisitor<const D: usize>;

impl<'de, const D: usize> Visitor<'de> for PointVisitor<D> {
    type Value = IntPoint<D>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a tuple of {D} integers")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<IntPoint<D>, A::Error> {
        let mut c = [0i64; D];
        for (i, slot) in c.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        Ok(IntPoint(c))
    }
}

impl<'de, const D: usize> Deserialize<'de> for IntPoint<D> {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        deserializer.deserialize_tuple(D, PointVisitor::<D>)
    }
}
