//! Coordinate-compressed index over a set of axis-aligned regions.
//!
//! The distinct region boundaries along each axis cut the world into a grid
//! of elementary cells; every cell is owned by exactly one region when the
//! regions tile the world. Building the index therefore *is* the tiling
//! check (gaps and overlaps show up as unowned or doubly-owned cells), and
//! once built it answers point-owner queries with one binary search per axis.

use std::collections::BTreeSet;

use crate::partitioning::error::PartitionError;
use crate::topology::point::IntPoint;
use crate::topology::rect::IntRect;

const UNOWNED: usize = usize::MAX;

#[derive(Clone, Debug)]
pub struct TileIndex<const D: usize> {
    world: IntRect<D>,
    /// Sorted, deduplicated boundaries per axis (world bounds included).
    cuts: [Vec<i64>; D],
    /// Owner of each elementary cell, row-major over the cut grid.
    cells: Vec<usize>,
}

impl<const D: usize> TileIndex<D> {
    /// Index `rects` (region `i` belongs to partition `i`) and verify they
    /// tile `world` without gaps or overlaps.
    pub fn build(world: IntRect<D>, rects: &[IntRect<D>]) -> Result<Self, PartitionError> {
        let invalid = |reason: String| PartitionError::InvalidDecomposition { reason };
        if rects.is_empty() {
            return Err(invalid("no regions".into()));
        }
        for (pid, r) in rects.iter().enumerate() {
            if !world.contains_rect(r) {
                return Err(invalid(format!(
                    "region {r} of partition {pid} is empty or leaves the world {world}"
                )));
            }
        }

        let cuts: [Vec<i64>; D] = std::array::from_fn(|d| {
            let mut c: Vec<i64> = rects
                .iter()
                .flat_map(|r| [r.lo[d], r.hi[d]])
                .chain([world.lo[d], world.hi[d]])
                .collect();
            c.sort_unstable();
            c.dedup();
            c
        });
        let grid = IntRect::from_extent(std::array::from_fn(|d| cuts[d].len() as i64 - 1));
        let mut cells = vec![UNOWNED; grid.volume()];

        for (pid, r) in rects.iter().enumerate() {
            let span = Self::cell_span(&cuts, r);
            for c in span.points() {
                let slot = &mut cells[grid.flat_index(&c)];
                if *slot != UNOWNED {
                    return Err(invalid(format!(
                        "partitions {} and {pid} overlap at {}",
                        *slot,
                        Self::corner(&cuts, &c)
                    )));
                }
                *slot = pid;
            }
        }
        if let Some(i) = cells.iter().position(|&o| o == UNOWNED) {
            return Err(invalid(format!(
                "no partition covers {}",
                Self::corner(&cuts, &grid.point_at(i))
            )));
        }
        Ok(TileIndex { world, cuts, cells })
    }

    fn grid(&self) -> IntRect<D> {
        IntRect::from_extent(std::array::from_fn(|d| self.cuts[d].len() as i64 - 1))
    }

    /// Cell-grid box covered by `r`; `r`'s bounds must be cuts.
    fn cell_span(cuts: &[Vec<i64>; D], r: &IntRect<D>) -> IntRect<D> {
        let lo = std::array::from_fn(|d| cuts[d].partition_point(|&c| c < r.lo[d]) as i64);
        let hi = std::array::from_fn(|d| cuts[d].partition_point(|&c| c < r.hi[d]) as i64);
        IntRect::new(IntPoint(lo), IntPoint(hi))
    }

    fn corner(cuts: &[Vec<i64>; D], cell: &IntPoint<D>) -> IntPoint<D> {
        IntPoint(std::array::from_fn(|d| cuts[d][cell[d] as usize]))
    }

    pub fn world(&self) -> IntRect<D> {
        self.world
    }

    /// Owning partition of `p`, `None` outside the world. O(D log P).
    pub fn owner(&self, p: &IntPoint<D>) -> Option<usize> {
        if !self.world.contains(p) {
            return None;
        }
        let cell = IntPoint(std::array::from_fn(|d| {
            self.cuts[d].partition_point(|&c| c <= p[d]) as i64 - 1
        }));
        Some(self.cells[self.grid().flat_index(&cell)])
    }

    /// Partitions owning at least one cell of `region` (clipped to the world).
    pub fn covered(&self, region: &IntRect<D>) -> BTreeSet<usize> {
        let Some(region) = self.world.intersection(region) else {
            return BTreeSet::new();
        };
        let lo = std::array::from_fn(|d| {
            self.cuts[d].partition_point(|&c| c <= region.lo[d]) as i64 - 1
        });
        let hi = std::array::from_fn(|d| self.cuts[d].partition_point(|&c| c < region.hi[d]) as i64);
        let grid = self.grid();
        IntRect::new(IntPoint(lo), IntPoint(hi))
            .points()
            .map(|c| self.cells[grid.flat_index(&c)])
            .collect()
    }

    /// Process-grid shape when every region is exactly one cell and region
    /// ids follow the row-major order of the cell grid.
    pub fn tensor_dims(&self) -> Option<[usize; D]> {
        let grid = self.grid();
        let is_tensor = self
            .cells
            .iter()
            .enumerate()
            .all(|(flat, &owner)| owner == flat);
        is_tensor.then(|| std::array::from_fn(|d| grid.width(d) as usize))
    }
}
