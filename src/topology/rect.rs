//! `IntRect`: half-open axis-aligned boxes `[lo, hi)` over `IntPoint`.
//!
//! Boxes are the currency of the whole crate: partitions, halo regions,
//! overlap strips, storage extents and quad-tree node shapes are all
//! `IntRect`s. Flat indexing is row-major with dimension 0 slowest, matching
//! [`crate::data::storage::GridStorage`].

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::topology::point::IntPoint;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntRect<const D: usize> {
    pub lo: IntPoint<D>,
    pub hi: IntPoint<D>,
}

pub type IntRect2D = IntRect<2>;

impl<const D: usize> IntRect<D> {
    #[inline]
    pub const fn new(lo: IntPoint<D>, hi: IntPoint<D>) -> Self {
        IntRect { lo, hi }
    }

    /// `[0, extent)`.
    pub fn from_extent(extent: [i64; D]) -> Self {
        IntRect::new(IntPoint::origin(), IntPoint(extent))
    }

    /// Per-axis width; negative widths are reported as zero.
    pub fn size(&self) -> [i64; D] {
        let mut s = [0; D];
        for d in 0..D {
            s[d] = (self.hi[d] - self.lo[d]).max(0);
        }
        s
    }

    #[inline]
    pub fn width(&self, d: usize) -> i64 {
        (self.hi[d] - self.lo[d]).max(0)
    }

    pub fn is_empty(&self) -> bool {
        (0..D).any(|d| self.hi[d] <= self.lo[d])
    }

    /// Number of cells.
    pub fn volume(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.size().iter().map(|&w| w as usize).product()
    }

    #[inline]
    pub fn contains(&self, p: &IntPoint<D>) -> bool {
        (0..D).all(|d| p[d] >= self.lo[d] && p[d] < self.hi[d])
    }

    /// `true` if `other` is non-empty and lies entirely inside `self`.
    pub fn contains_rect(&self, other: &Self) -> bool {
        !other.is_empty() && (0..D).all(|d| other.lo[d] >= self.lo[d] && other.hi[d] <= self.hi[d])
    }

    /// Overlap of two boxes, `None` when they share no cell.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let mut lo = [0; D];
        let mut hi = [0; D];
        for d in 0..D {
            lo[d] = self.lo[d].max(other.lo[d]);
            hi[d] = self.hi[d].min(other.hi[d]);
            if hi[d] <= lo[d] {
                return None;
            }
        }
        Some(IntRect::new(IntPoint(lo), IntPoint(hi)))
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.intersection(other).is_some()
    }

    /// Grow (or, with negative `by`, shrink) every face by `by[d]`.
    pub fn resize(&self, by: [i64; D]) -> Self {
        let mut lo = self.lo;
        let mut hi = self.hi;
        for d in 0..D {
            lo.0[d] -= by[d];
            hi.0[d] += by[d];
        }
        IntRect::new(lo, hi)
    }

    /// Translate by `off`.
    pub fn shift(&self, off: [i64; D]) -> Self {
        IntRect::new(self.lo.offset(off), self.hi.offset(off))
    }

    /// Integer centre `lo + size / 2`, the split point used by quad trees.
    pub fn center(&self) -> IntPoint<D> {
        let mut c = self.lo;
        for d in 0..D {
            c.0[d] += self.width(d) / 2;
        }
        c
    }

    /// Row-major offset of `p` relative to `lo`. `p` must be inside.
    #[inline]
    pub fn flat_index(&self, p: &IntPoint<D>) -> usize {
        debug_assert!(self.contains(p), "{p} outside {self}");
        let mut idx = 0usize;
        for d in 0..D {
            idx = idx * self.width(d) as usize + (p[d] - self.lo[d]) as usize;
        }
        idx
    }

    /// Inverse of [`flat_index`](Self::flat_index).
    pub fn point_at(&self, mut idx: usize) -> IntPoint<D> {
        let mut c = [0; D];
        for d in (0..D).rev() {
            let w = self.width(d) as usize;
            c[d] = self.lo[d] + (idx % w) as i64;
            idx /= w;
        }
        IntPoint(c)
    }

    /// Iterate every cell in row-major order.
    pub fn points(&self) -> RectPoints<D> {
        RectPoints {
            rect: *self,
            next: if self.is_empty() { None } else { Some(self.lo) },
        }
    }
}

impl<const D: usize> fmt::Debug for IntRect<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Prints `[lo, hi)`.
impl<const D: usize> fmt::Display for IntRect<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi)
    }
}

/// Translations under which a box may be seen from inside a world of size
/// `extent`: every vector in `{-1, 0, 1}^D * extent` (lexicographic order,
/// dimension 0 slowest) when `toroidal`, only the zero vector otherwise.
pub fn periodic_shifts<const D: usize>(extent: [i64; D], toroidal: bool) -> Vec<[i64; D]> {
    if !toroidal {
        return vec![[0; D]];
    }
    (0..D)
        .map(|_| -1i64..=1)
        .multi_cartesian_product()
        .map(|k| std::array::from_fn(|d| k[d] * extent[d]))
        .collect()
}

/// Row-major cell iterator returned by [`IntRect::points`].
#[derive(Clone, Debug)]
pub struct RectPoints<const D: usize> {
    rect: IntRect<D>,
    next: Option<IntPoint<D>>,
}

impl<const D: usize> Iterator for RectPoints<D> {
    type Item = IntPoint<D>;

    fn next(&mut self) -> Option<IntPoint<D>> {
        let cur = self.next?;
        let mut n = cur;
        let mut d = D;
        self.next = loop {
            if d == 0 {
                break None;
            }
            d -= 1;
            n.0[d] += 1;
            if n.0[d] < self.rect.hi[d] {
                break Some(n);
            }
            n.0[d] = self.rect.lo[d];
        };
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::Int2D;

    fn r(lo: [i64; 2], hi: [i64; 2]) -> IntRect2D {
        IntRect::new(Int2D::new(lo), Int2D::new(hi))
    }

    #[test]
    fn intersection_and_resize() {
        let a = r([0, 0], [5, 5]);
        let b = r([5, 0], [10, 5]);
        assert!(a.intersection(&b).is_none());
        let grown = a.resize([1, 1]);
        assert_eq!(grown, r([-1, -1], [6, 6]));
        assert_eq!(grown.intersection(&b), Some(r([5, 0], [6, 5])));
        assert!(a.resize([-3, -3]).is_empty());
    }

    #[test]
    fn flat_index_is_row_major_dim0_slowest() {
        let a = r([2, 3], [4, 6]);
        assert_eq!(a.flat_index(&Int2D::new([2, 3])), 0);
        assert_eq!(a.flat_index(&Int2D::new([2, 4])), 1);
        assert_eq!(a.flat_index(&Int2D::new([3, 3])), 3);
        for (i, p) in a.points().enumerate() {
            assert_eq!(a.flat_index(&p), i);
            assert_eq!(a.point_at(i), p);
        }
        assert_eq!(a.points().count(), a.volume());
    }

    #[test]
    fn empty_rect_has_no_points() {
        assert_eq!(r([0, 0], [0, 4]).points().count(), 0);
        assert_eq!(r([0, 0], [0, 4]).volume(), 0);
    }

    #[test]
    fn periodic_shifts_are_canonical() {
        let s = periodic_shifts([10, 20], true);
        assert_eq!(s.len(), 9);
        assert_eq!(s[0], [-10, -20]);
        assert_eq!(s[4], [0, 0]);
        assert_eq!(s[5], [0, 20]);
        assert_eq!(periodic_shifts([10, 20], false), vec![[0, 0]]);
    }

    #[test]
    fn center_floors() {
        assert_eq!(r([0, 0], [5, 10]).center(), Int2D::new([2, 5]));
    }
}
