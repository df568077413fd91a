//! Committed, immutable snapshot of how the world is split across processes.
//!
//! A [`Decomposition`] is what every query runs against: the partition-id →
//! rectangle map, the owner lookup for points, neighbour lists, and the
//! layout-specific structure (process grid, tiling index or quad tree) that
//! produced them. `Partition::commit` builds a new one and swaps it in
//! atomically; fields hold an `Arc` to the snapshot they were built against.

use std::collections::BTreeSet;

use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::partitioning::PartitionConfig;
use crate::partitioning::error::PartitionError;
use crate::partitioning::process_grid::ProcessGrid;
use crate::partitioning::quad_tree::{Group, QuadTree};
use crate::partitioning::tiling::TileIndex;
use crate::topology::point::IntPoint;
use crate::topology::rect::{IntRect, periodic_shifts};

#[derive(Clone, Debug)]
pub enum Layout<const D: usize> {
    /// Equal blocks over a process grid; block `i` of an axis of size `S`
    /// split `n` ways is `[i*S/n, (i+1)*S/n)`.
    Cartesian { dims: [usize; D] },
    /// Arbitrary rectangles tiling the world.
    NonUniform(TileIndex<D>),
    QuadTree(QuadTree<D>),
}

impl<const D: usize> Layout<D> {
    pub fn name(&self) -> &'static str {
        match self {
            Layout::Cartesian { .. } => "cartesian",
            Layout::NonUniform(_) => "non-uniform",
            Layout::QuadTree(_) => "quad-tree",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Decomposition<const D: usize> {
    config: PartitionConfig<D>,
    layout: Layout<D>,
    /// Region of partition `pid`.
    rects: Vec<IntRect<D>>,
    /// Neighbours of every partition, ascending, self excluded.
    neighbors: Vec<Vec<usize>>,
    grid: Option<ProcessGrid<D>>,
    epoch: u64,
}

/// Equal-block bounds along one axis.
fn block_bounds(extent: i64, parts: usize, i: usize) -> (i64, i64) {
    let n = parts as i64;
    let i = i as i64;
    (i * extent / n, (i + 1) * extent / n)
}

impl<const D: usize> Decomposition<D> {
    pub fn cartesian(config: PartitionConfig<D>, dims: [usize; D], epoch: u64) -> Result<Self, PartitionError> {
        for d in 0..D {
            if dims[d] == 0 || dims[d] as i64 > config.extent[d] {
                return Err(PartitionError::InvalidProcessCount {
                    procs: dims.iter().product(),
                    reason: format!("cannot cut axis {d} of width {} into {} blocks", config.extent[d], dims[d]),
                });
            }
        }
        let grid = ProcessGrid::new(dims, config.toroidal);
        let rects = (0..grid.num_procs())
            .map(|pid| {
                let c = grid.coords(pid);
                let mut lo = [0; D];
                let mut hi = [0; D];
                for d in 0..D {
                    (lo[d], hi[d]) = block_bounds(config.extent[d], dims[d], c[d]);
                }
                IntRect::new(IntPoint(lo), IntPoint(hi))
            })
            .collect();
        Ok(Self::assemble(config, Layout::Cartesian { dims }, rects, Some(grid), epoch))
    }

    /// Rectangles indexed by partition id; they must tile the world.
    pub fn non_uniform(config: PartitionConfig<D>, rects: Vec<IntRect<D>>, epoch: u64) -> Result<Self, PartitionError> {
        let index = TileIndex::build(config.world(), &rects)?;
        let grid = index
            .tensor_dims()
            .map(|dims| ProcessGrid::new(dims, config.toroidal));
        Ok(Self::assemble(config, Layout::NonUniform(index), rects, grid, epoch))
    }

    pub fn from_quad_tree(config: PartitionConfig<D>, tree: QuadTree<D>, epoch: u64) -> Result<Self, PartitionError> {
        tree.validate()?;
        if tree.world() != config.world() {
            return Err(PartitionError::InvalidDecomposition {
                reason: format!("tree covers {}, world is {}", tree.world(), config.world()),
            });
        }
        let rects = tree.rects_by_processor();
        Ok(Self::assemble(config, Layout::QuadTree(tree), rects, None, epoch))
    }

    fn assemble(
        config: PartitionConfig<D>,
        layout: Layout<D>,
        rects: Vec<IntRect<D>>,
        grid: Option<ProcessGrid<D>>,
        epoch: u64,
    ) -> Self {
        let neighbors = match &layout {
            Layout::QuadTree(tree) => (0..rects.len())
                .map(|pid| {
                    tree.leaf_of(pid)
                        .and_then(|leaf| tree.neighbor_leaves(leaf.id, config.aoi, config.toroidal).ok())
                        .map(|ids| {
                            let mut pids: Vec<usize> = ids
                                .into_iter()
                                .filter_map(|id| tree.node(id).ok().map(|n| n.processor))
                                .collect();
                            pids.sort_unstable();
                            pids
                        })
                        .unwrap_or_default()
                })
                .collect(),
            _ => Self::intersecting_neighbors(&config, &rects),
        };
        Decomposition {
            config,
            layout,
            rects,
            neighbors,
            grid,
            epoch,
        }
    }

    /// `q` neighbours `p` when `q`'s region meets `p`'s region grown by
    /// `max(aoi, 1)`, directly or through a toroidal image.
    fn intersecting_neighbors(config: &PartitionConfig<D>, rects: &[IntRect<D>]) -> Vec<Vec<usize>> {
        let shifts = periodic_shifts(config.extent, config.toroidal);
        let grow = config.aoi.map(|a| a.max(1));
        rects
            .iter()
            .enumerate()
            .map(|(p, rp)| {
                let halo = rp.resize(grow);
                rects
                    .iter()
                    .enumerate()
                    .filter(|&(q, rq)| q != p && shifts.iter().any(|&s| halo.shift(s).intersects(rq)))
                    .map(|(q, _)| q)
                    .collect()
            })
            .collect()
    }

    pub fn config(&self) -> &PartitionConfig<D> {
        &self.config
    }

    pub fn layout(&self) -> &Layout<D> {
        &self.layout
    }

    pub fn layout_name(&self) -> &'static str {
        self.layout.name()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn num_partitions(&self) -> usize {
        self.rects.len()
    }

    pub fn rects(&self) -> &[IntRect<D>] {
        &self.rects
    }

    pub fn rect(&self, pid: usize) -> Result<IntRect<D>, PartitionError> {
        self.rects
            .get(pid)
            .copied()
            .ok_or(PartitionError::UnknownPartition(pid))
    }

    pub fn neighbors(&self, pid: usize) -> Result<&[usize], PartitionError> {
        self.neighbors
            .get(pid)
            .map(Vec::as_slice)
            .ok_or(PartitionError::UnknownPartition(pid))
    }

    /// Present for Cartesian layouts and for non-uniform layouts that happen
    /// to form a tensor grid in partition-id order.
    pub fn process_grid(&self) -> Option<&ProcessGrid<D>> {
        self.grid.as_ref()
    }

    pub fn quad_tree(&self) -> Option<&QuadTree<D>> {
        match &self.layout {
            Layout::QuadTree(t) => Some(t),
            _ => None,
        }
    }

    /// Owner of `p`. Points outside a toroidal world are wrapped first.
    pub fn to_partition_id(&self, p: &IntPoint<D>) -> Result<usize, PartitionError> {
        let p = if self.config.toroidal {
            p.wrap(self.config.extent)
        } else if p.within(self.config.extent) {
            *p
        } else {
            return Err(PartitionError::PointOutsideWorld { point: p.to_vec() });
        };
        let owner = match &self.layout {
            Layout::Cartesian { dims } => {
                let mut c = [0usize; D];
                for d in 0..D {
                    // largest i with i*S/n <= x
                    let (s, n) = (self.config.extent[d], dims[d] as i64);
                    c[d] = (((p[d] + 1) * n - 1) / s) as usize;
                }
                self.grid.map(|g| g.rank_of(c))
            }
            Layout::NonUniform(index) => index.owner(&p),
            Layout::QuadTree(tree) => tree.leaf_containing(&p).map(|n| n.processor),
        };
        owner.ok_or(PartitionError::PointOutsideWorld { point: p.to_vec() })
    }

    /// Partitions owning at least one cell of `region`, which is clipped to
    /// the world.
    pub fn covered_partition_ids(&self, region: &IntRect<D>) -> BTreeSet<usize> {
        match &self.layout {
            Layout::NonUniform(index) => index.covered(region),
            _ => self
                .rects
                .iter()
                .enumerate()
                .filter(|(_, r)| r.intersects(region))
                .map(|(pid, _)| pid)
                .collect(),
        }
    }

    /// Group of `pid` at `level`; only quad-tree layouts have groups.
    pub fn group(&self, pid: usize, level: usize) -> Result<Option<Group<D>>, PartitionError> {
        match &self.layout {
            Layout::QuadTree(tree) => tree.group(pid, level),
            other => Err(PartitionError::Unsupported {
                layout: other.name(),
                operation: "group",
            }),
        }
    }
}

impl<const D: usize> DebugInvariants for Decomposition<D> {
    fn validate_invariants(&self) -> Result<(), HaloError> {
        // regions tile the world
        TileIndex::build(self.config.world(), &self.rects)?;
        if self.neighbors.len() != self.rects.len() {
            return Err(PartitionError::InvalidDecomposition {
                reason: format!("{} neighbour lists for {} regions", self.neighbors.len(), self.rects.len()),
            }
            .into());
        }
        for (p, ns) in self.neighbors.iter().enumerate() {
            for &q in ns {
                let back = self.neighbors.get(q).is_some_and(|qs| qs.contains(&p));
                if q == p || !back {
                    return Err(PartitionError::InvalidDecomposition {
                        reason: format!("neighbour relation {p} -> {q} is not symmetric"),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}
