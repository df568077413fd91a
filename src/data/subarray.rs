//! Reusable strided sub-box views into a row-major buffer.
//!
//! A [`Subarray`] plays the role of a derived communication datatype: it is
//! built once from the enclosing storage box and the region of interest, and
//! describes that region as a list of contiguous runs along the last axis.
//! Packing walks the runs and clones into a send buffer; unpacking scatters
//! a received buffer back through the same runs.

use crate::halo_error::HaloError;
use crate::topology::rect::IntRect;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subarray {
    /// `(offset, len)` runs in the enclosing buffer, in row-major order.
    runs: Vec<(usize, usize)>,
    count: usize,
}

impl Subarray {
    /// View of `region` inside a buffer laid out over `frame`.
    ///
    /// `region` is clipped to `frame`; an empty intersection yields an empty
    /// view.
    pub fn new<const D: usize>(frame: &IntRect<D>, region: &IntRect<D>) -> Self {
        let Some(region) = frame.intersection(region) else {
            return Subarray::default();
        };
        let last = D - 1;
        let run_len = region.width(last) as usize;
        let mut runs: Vec<(usize, usize)> = Vec::new();
        // one run per row: iterate the region with the last axis collapsed
        let mut rows = region;
        rows.hi.0[last] = rows.lo[last] + 1;
        for start in rows.points() {
            let off = frame.flat_index(&start);
            match runs.last_mut() {
                Some((o, l)) if *o + *l == off => *l += run_len,
                _ => runs.push((off, run_len)),
            }
        }
        Subarray {
            count: region.volume(),
            runs,
        }
    }

    /// Number of elements described.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Contiguous runs backing the view.
    pub fn runs(&self) -> &[(usize, usize)] {
        &self.runs
    }

    /// Append the viewed elements of `src` to `out`.
    pub fn pack_into<T: Clone>(&self, src: &[T], out: &mut Vec<T>) {
        out.reserve(self.count);
        for &(off, len) in &self.runs {
            out.extend_from_slice(&src[off..off + len]);
        }
    }

    pub fn pack<T: Clone>(&self, src: &[T]) -> Vec<T> {
        let mut out = Vec::with_capacity(self.count);
        self.pack_into(src, &mut out);
        out
    }

    /// Scatter `vals` (exactly `len()` elements) into the viewed cells of `dst`.
    pub fn unpack<T: Clone>(&self, dst: &mut [T], vals: &[T]) -> Result<(), HaloError> {
        if vals.len() != self.count {
            return Err(HaloError::ShapeMismatch {
                expected: format!("{} elements", self.count),
                found: vals.len().to_string(),
            });
        }
        let capacity = dst.len();
        let mut at = 0;
        for &(off, len) in &self.runs {
            let dst_run = dst.get_mut(off..off + len).ok_or(HaloError::StorageRange {
                offset: off,
                len,
                capacity,
            })?;
            dst_run.clone_from_slice(&vals[at..at + len]);
            at += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::Int2D;

    fn r(lo: [i64; 2], hi: [i64; 2]) -> IntRect<2> {
        IntRect::new(Int2D::new(lo), Int2D::new(hi))
    }

    #[test]
    fn column_strip_is_strided() {
        // 4x4 frame, strip is the last column
        let frame = r([0, 0], [4, 4]);
        let sub = Subarray::new(&frame, &r([0, 3], [4, 4]));
        assert_eq!(sub.runs(), &[(3, 1), (7, 1), (11, 1), (15, 1)]);
        let buf: Vec<u32> = (0..16).collect();
        assert_eq!(sub.pack(&buf), vec![3, 7, 11, 15]);
    }

    #[test]
    fn full_rows_coalesce_into_one_run() {
        let frame = r([-1, -1], [3, 3]);
        let sub = Subarray::new(&frame, &r([0, -1], [2, 3]));
        assert_eq!(sub.runs(), &[(4, 8)]);
        assert_eq!(sub.len(), 8);
    }

    #[test]
    fn unpack_places_values_and_rejects_wrong_length() {
        let frame = r([0, 0], [3, 3]);
        let sub = Subarray::new(&frame, &r([1, 1], [3, 3]));
        let mut buf = vec![0u8; 9];
        sub.unpack(&mut buf, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0, 1, 2, 0, 3, 4]);
        assert!(sub.unpack(&mut buf, &[1]).is_err());
    }

    #[test]
    fn disjoint_region_is_empty() {
        let sub = Subarray::new(&r([0, 0], [2, 2]), &r([5, 5], [6, 6]));
        assert!(sub.is_empty());
        assert!(sub.pack::<u8>(&[0; 4]).is_empty());
    }
}
