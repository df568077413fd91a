//! Region quad tree (oct tree in 3D) over a rectangular world.
//!
//! Every internal node carries an origin that splits its shape into `2^D`
//! children; leaves are the partitions. Nodes live in an arena keyed by id.
//! Ids are handed out from a fixed pool in FIFO order and returned to the
//! back of the pool on merge, so every rank that applies the same sequence
//! of splits and merges assigns the same ids.
//!
//! Child `i` of a node covers, along dimension `d`, the upper part
//! `[origin_d, hi_d)` when bit `D-1-d` of `i` is set and the lower part
//! `[lo_d, origin_d)` otherwise.
//!
//! Leaves sorted by id are mapped to processors `0..n`; an internal node is
//! mapped to the processor of its first child, which makes it the master of
//! the group of leaves below it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::partitioning::error::PartitionError;
use crate::topology::point::IntPoint;
use crate::topology::rect::{IntRect, periodic_shifts};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuadNode<const D: usize> {
    pub id: usize,
    pub level: usize,
    pub shape: IntRect<D>,
    /// Split point; `None` for leaves.
    pub origin: Option<IntPoint<D>>,
    pub parent: Option<usize>,
    /// Exactly `2^D` ids for an internal node, empty for a leaf.
    pub children: Vec<usize>,
    pub processor: usize,
}

impl<const D: usize> QuadNode<D> {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A node-rooted subset of processors: the leaves below `node`, led by the
/// node's processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group<const D: usize> {
    pub node: usize,
    pub level: usize,
    pub master: usize,
    /// Member processors in ascending order (master included).
    pub members: Vec<usize>,
    pub shape: IntRect<D>,
}

#[derive(Clone, Debug)]
pub struct QuadTree<const D: usize> {
    nodes: BTreeMap<usize, QuadNode<D>>,
    avail: VecDeque<usize>,
    capacity: usize,
}

pub const ROOT: usize = 0;

fn strictly_inside<const D: usize>(shape: &IntRect<D>, p: &IntPoint<D>) -> bool {
    (0..D).all(|d| shape.lo[d] < p[d] && p[d] < shape.hi[d])
}

/// Shape of child `idx` of a node with `shape` split at `origin`.
pub fn child_shape<const D: usize>(shape: &IntRect<D>, origin: &IntPoint<D>, idx: usize) -> IntRect<D> {
    let mut lo = shape.lo;
    let mut hi = shape.hi;
    for d in 0..D {
        if (idx >> (D - 1 - d)) & 1 == 1 {
            lo.0[d] = origin[d];
        } else {
            hi.0[d] = origin[d];
        }
    }
    IntRect::new(lo, hi)
}

impl<const D: usize> QuadTree<D> {
    pub const FANOUT: usize = 1 << D;

    /// Single-leaf tree sized for `procs` leaves. Each split turns one leaf
    /// into `2^D`, so `procs` must be `1 (mod 2^D - 1)`.
    pub fn new(shape: IntRect<D>, procs: usize) -> Result<Self, PartitionError> {
        let grow = Self::FANOUT - 1;
        if procs == 0 || procs % grow != 1 % grow {
            return Err(PartitionError::InvalidProcessCount {
                procs,
                reason: format!("a {D}-d quad tree needs 1 + k*{grow} leaves"),
            });
        }
        if shape.is_empty() {
            return Err(PartitionError::InvalidConfig(format!("empty world {shape}")));
        }
        let capacity = 1 + (procs / grow) * Self::FANOUT;
        let root = QuadNode {
            id: ROOT,
            level: 0,
            shape,
            origin: None,
            parent: None,
            children: Vec::new(),
            processor: 0,
        };
        Ok(QuadTree {
            nodes: BTreeMap::from([(ROOT, root)]),
            avail: (1..capacity).collect(),
            capacity,
        })
    }

    /// Repeatedly split the largest leaf (smallest id on ties) at its centre
    /// until there are `procs` leaves, then map processors.
    pub fn uniform(shape: IntRect<D>, procs: usize) -> Result<Self, PartitionError> {
        let mut tree = Self::new(shape, procs)?;
        while tree.num_leaves() < procs {
            let leaf = tree
                .leaves()
                .into_iter()
                .max_by(|a, b| a.shape.volume().cmp(&b.shape.volume()).then(b.id.cmp(&a.id)))
                .map(|n| (n.id, n.shape))
                .ok_or(PartitionError::UnknownNode(ROOT))?;
            let (id, shape) = leaf;
            if (0..D).any(|d| shape.width(d) < 2) {
                return Err(PartitionError::InvalidProcessCount {
                    procs,
                    reason: format!("leaf {shape} is too small to split further"),
                });
            }
            tree.split_node(id, shape.center())?;
        }
        tree.map_processors(procs)?;
        Ok(tree)
    }

    /// Build from explicit split points applied in order.
    pub fn from_splits(
        shape: IntRect<D>,
        procs: usize,
        splits: &[IntPoint<D>],
    ) -> Result<Self, PartitionError> {
        let mut tree = Self::new(shape, procs)?;
        for p in splits {
            tree.split(*p)?;
        }
        tree.map_processors(procs)?;
        Ok(tree)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn root(&self) -> &QuadNode<D> {
        &self.nodes[&ROOT]
    }

    pub fn world(&self) -> IntRect<D> {
        self.root().shape
    }

    pub fn node(&self, id: usize) -> Result<&QuadNode<D>, PartitionError> {
        self.nodes.get(&id).ok_or(PartitionError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: usize) -> Result<&mut QuadNode<D>, PartitionError> {
        self.nodes.get_mut(&id).ok_or(PartitionError::UnknownNode(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &QuadNode<D>> {
        self.nodes.values()
    }

    /// Leaves in ascending id order.
    pub fn leaves(&self) -> Vec<&QuadNode<D>> {
        self.nodes.values().filter(|n| n.is_leaf()).collect()
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes.values().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        self.nodes.values().map(|n| n.level).max().unwrap_or(0)
    }

    /// Leaf whose shape contains `p`.
    pub fn leaf_containing(&self, p: &IntPoint<D>) -> Option<&QuadNode<D>> {
        let mut cur = self.nodes.get(&ROOT)?;
        if !cur.shape.contains(p) {
            return None;
        }
        while !cur.is_leaf() {
            cur = cur
                .children
                .iter()
                .filter_map(|c| self.nodes.get(c))
                .find(|c| c.shape.contains(p))?;
        }
        Some(cur)
    }

    pub fn leaf_of(&self, processor: usize) -> Option<&QuadNode<D>> {
        self.nodes
            .values()
            .find(|n| n.is_leaf() && n.processor == processor)
    }

    /// Split the leaf containing `p` at `p`. Returns the new child ids.
    pub fn split(&mut self, p: IntPoint<D>) -> Result<Vec<usize>, PartitionError> {
        let id = self
            .leaf_containing(&p)
            .map(|n| n.id)
            .ok_or_else(|| PartitionError::PointOutsideWorld { point: p.to_vec() })?;
        self.split_node(id, p)
    }

    fn split_node(&mut self, id: usize, origin: IntPoint<D>) -> Result<Vec<usize>, PartitionError> {
        let (shape, level) = {
            let n = self.node(id)?;
            if !n.is_leaf() {
                return Err(PartitionError::InvalidDecomposition {
                    reason: format!("node {id} is already split"),
                });
            }
            (n.shape, n.level)
        };
        if !strictly_inside(&shape, &origin) {
            return Err(PartitionError::InvalidDecomposition {
                reason: format!("split point {origin} is not strictly inside {shape}"),
            });
        }
        if self.avail.len() < Self::FANOUT {
            return Err(PartitionError::TreeCapacity { max: self.capacity });
        }
        let ids: Vec<usize> = self.avail.drain(..Self::FANOUT).collect();
        for (i, &cid) in ids.iter().enumerate() {
            self.nodes.insert(
                cid,
                QuadNode {
                    id: cid,
                    level: level + 1,
                    shape: child_shape(&shape, &origin, i),
                    origin: None,
                    parent: Some(id),
                    children: Vec::new(),
                    processor: 0,
                },
            );
        }
        let n = self.node_mut(id)?;
        n.origin = Some(origin);
        n.children = ids.clone();
        log::trace!("quad tree: split node {id} at {origin} -> {ids:?}");
        Ok(ids)
    }

    /// Collapse node `id` into a leaf, returning its descendants' ids to the
    /// pool.
    pub fn merge(&mut self, id: usize) -> Result<(), PartitionError> {
        let children = std::mem::take(&mut self.node_mut(id)?.children);
        self.node_mut(id)?.origin = None;
        let mut stack = children;
        let mut released = Vec::new();
        while let Some(c) = stack.pop() {
            if let Some(n) = self.nodes.remove(&c) {
                stack.extend(n.children.iter().rev());
                released.push(c);
            }
        }
        // back of the pool, ascending
        released.sort_unstable();
        self.avail.extend(released);
        Ok(())
    }

    /// Move the split point of `id` to `origin` and reshape the subtree.
    /// A leaf is split instead.
    pub fn move_origin(&mut self, id: usize, origin: IntPoint<D>) -> Result<(), PartitionError> {
        let n = self.node(id)?;
        if n.is_leaf() {
            return self.split_node(id, origin).map(|_| ());
        }
        if !strictly_inside(&n.shape, &origin) {
            return Err(PartitionError::InvalidDecomposition {
                reason: format!("origin {origin} is not strictly inside {}", n.shape),
            });
        }
        let shape = n.shape;
        self.node_mut(id)?.origin = Some(origin);
        self.reshape(id, shape)
    }

    /// Give node `id` a new shape; descendants follow. An internal node whose
    /// origin falls outside the new shape is re-centred.
    fn reshape(&mut self, id: usize, shape: IntRect<D>) -> Result<(), PartitionError> {
        let n = self.node_mut(id)?;
        n.shape = shape;
        if n.is_leaf() {
            return Ok(());
        }
        let origin = match n.origin {
            Some(o) if strictly_inside(&shape, &o) => o,
            _ => shape.center(),
        };
        n.origin = Some(origin);
        let children = n.children.clone();
        for (i, c) in children.into_iter().enumerate() {
            self.reshape(c, child_shape(&shape, &origin, i))?;
        }
        Ok(())
    }

    /// Leaves by id become processors `0..procs`; internal nodes take the
    /// processor of their first child.
    pub fn map_processors(&mut self, procs: usize) -> Result<(), PartitionError> {
        let leaves: Vec<usize> = self.leaves().iter().map(|n| n.id).collect();
        if leaves.len() != procs {
            return Err(PartitionError::InvalidProcessCount {
                procs,
                reason: format!("quad tree has {} leaves", leaves.len()),
            });
        }
        for (pid, id) in leaves.into_iter().enumerate() {
            self.node_mut(id)?.processor = pid;
        }
        // deepest first so children are settled before their parents
        let mut internal: Vec<(usize, usize)> = self
            .nodes
            .values()
            .filter(|n| !n.is_leaf())
            .map(|n| (n.level, n.id))
            .collect();
        internal.sort_unstable_by(|a, b| b.cmp(a));
        for (_, id) in internal {
            let first = self.node(id)?.children[0];
            let p = self.node(first)?.processor;
            self.node_mut(id)?.processor = p;
        }
        Ok(())
    }

    /// Leaf ids (other than `leaf`) whose shape intersects `leaf`'s shape
    /// grown by `aoi`, including images across a toroidal world.
    pub fn neighbor_leaves(
        &self,
        leaf: usize,
        aoi: [i64; D],
        toroidal: bool,
    ) -> Result<BTreeSet<usize>, PartitionError> {
        let halo = self.node(leaf)?.shape.resize(aoi.map(|a| a.max(1)));
        let images: Vec<IntRect<D>> = periodic_shifts(self.world().size(), toroidal)
            .into_iter()
            .map(|s| halo.shift(s))
            .collect();
        let mut out = BTreeSet::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let n = self.node(id)?;
            if !images.iter().any(|h| h.intersects(&n.shape)) {
                continue;
            }
            if n.is_leaf() {
                if n.id != leaf {
                    out.insert(n.id);
                }
            } else {
                stack.extend(n.children.iter().copied());
            }
        }
        Ok(out)
    }

    /// Strict ancestor of `leaf` sitting at `level`, `None` when the leaf is
    /// not deeper than `level`.
    pub fn ancestor_at(&self, leaf: usize, level: usize) -> Result<Option<&QuadNode<D>>, PartitionError> {
        let mut cur = self.node(leaf)?;
        if cur.level <= level {
            return Ok(None);
        }
        while cur.level > level {
            match cur.parent {
                Some(p) => cur = self.node(p)?,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    /// Leaves below `id` (itself if it is a leaf), by processor.
    pub fn leaves_under(&self, id: usize) -> Result<Vec<&QuadNode<D>>, PartitionError> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let n = self.node(id)?;
            if n.is_leaf() {
                out.push(n);
            } else {
                stack.extend(n.children.iter().copied());
            }
        }
        out.sort_unstable_by_key(|n| n.processor);
        Ok(out)
    }

    /// Group of processor `pid` at `level`.
    pub fn group(&self, pid: usize, level: usize) -> Result<Option<Group<D>>, PartitionError> {
        let leaf = self
            .leaf_of(pid)
            .ok_or(PartitionError::UnknownPartition(pid))?
            .id;
        let Some(node) = self.ancestor_at(leaf, level)? else {
            return Ok(None);
        };
        let members = self
            .leaves_under(node.id)?
            .iter()
            .map(|n| n.processor)
            .collect();
        Ok(Some(Group {
            node: node.id,
            level,
            master: node.processor,
            members,
            shape: node.shape,
        }))
    }

    /// Every leaf must keep a non-empty shape.
    pub fn validate(&self) -> Result<(), PartitionError> {
        for n in self.leaves() {
            if n.shape.is_empty() {
                return Err(PartitionError::InvalidDecomposition {
                    reason: format!("leaf {} collapsed to {}", n.id, n.shape),
                });
            }
        }
        Ok(())
    }

    /// Leaf shapes indexed by processor.
    pub fn rects_by_processor(&self) -> Vec<IntRect<D>> {
        let mut leaves = self.leaves();
        leaves.sort_unstable_by_key(|n| n.processor);
        leaves.iter().map(|n| n.shape).collect()
    }
}

/// Runtime-weighted mean of leaf centres, floored, then kept at least
/// `margin` cells away from every face of `shape` (centre of the axis when it
/// is too narrow for that).
pub fn weighted_origin<const D: usize>(
    shape: &IntRect<D>,
    samples: &[(IntPoint<D>, f64)],
    margin: i64,
) -> Option<(IntPoint<D>, bool)> {
    let total: f64 = samples.iter().map(|(_, rt)| rt).sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let mut clamped = false;
    let mut o = [0i64; D];
    for d in 0..D {
        let sum: f64 = samples.iter().map(|(c, rt)| c[d] as f64 * rt).sum();
        let raw = (sum / total).floor() as i64;
        let (lo, hi) = (shape.lo[d] + margin, shape.hi[d] - margin);
        o[d] = if lo > hi {
            shape.lo[d] + shape.width(d) / 2
        } else {
            raw.clamp(lo, hi)
        };
        clamped |= o[d] != raw;
    }
    Some((IntPoint(o), clamped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::Int2D;

    fn world() -> IntRect<2> {
        IntRect::from_extent([100, 100])
    }

    /// 22 leaves over 100x100: four quadrants, each quartered, then two of
    /// the inner quarters split again off-centre.
    fn reference_tree() -> QuadTree<2> {
        let splits = [[50, 50], [25, 25], [25, 75], [75, 25], [75, 75], [35, 15], [40, 35]]
            .map(Int2D::new);
        QuadTree::from_splits(world(), 22, &splits).unwrap()
    }

    #[test]
    fn ids_come_from_the_pool_in_order() {
        let t = reference_tree();
        assert_eq!(t.capacity(), 29);
        assert_eq!(t.root().children, vec![1, 2, 3, 4]);
        assert_eq!(t.node(7).unwrap().children, vec![21, 22, 23, 24]);
        assert_eq!(t.node(8).unwrap().children, vec![25, 26, 27, 28]);
        assert_eq!(t.node(22).unwrap().shape, IntRect::new(Int2D::new([25, 15]), Int2D::new([35, 25])));
        assert_eq!(t.num_leaves(), 22);
        assert_eq!(t.depth(), 3);
    }

    #[test]
    fn neighbor_leaves_match_reference() {
        let t = reference_tree();
        let expect: &[(usize, &[usize])] = &[
            (22, &[5, 6, 21, 23, 24, 25]),
            (24, &[13, 14, 21, 22, 23, 25, 27]),
            (13, &[14, 15, 16, 23, 24, 27]),
            (15, &[13, 14, 16]),
            (20, &[17, 18, 19]),
            (10, &[9, 11, 12]),
            (5, &[6, 21, 22, 25]),
            (6, &[5, 9, 11, 22, 25, 26]),
            (26, &[6, 9, 11, 25, 27, 28]),
            (11, &[6, 9, 10, 12, 14, 17, 18, 26, 28]),
            (17, &[11, 12, 14, 16, 18, 19, 20, 28]),
        ];
        for &(leaf, want) in expect {
            let got: Vec<usize> = t.neighbor_leaves(leaf, [1, 1], false).unwrap().into_iter().collect();
            assert_eq!(got, want, "neighbours of node {leaf}");
        }
    }

    #[test]
    fn toroidal_neighbors_wrap() {
        let t = QuadTree::uniform(world(), 4).unwrap();
        // 2x2 over a torus: every leaf touches every other
        for leaf in t.leaves() {
            assert_eq!(t.neighbor_leaves(leaf.id, [1, 1], true).unwrap().len(), 3);
        }
        let bounded = t.neighbor_leaves(1, [1, 1], false).unwrap();
        assert_eq!(bounded.len(), 3);
    }

    #[test]
    fn processors_and_groups() {
        let t = reference_tree();
        // leaves by id: 5,6,9,10,...
        assert_eq!(t.node(5).unwrap().processor, 0);
        assert_eq!(t.node(9).unwrap().processor, 2);
        // node 1's first child is 5
        assert_eq!(t.node(1).unwrap().processor, 0);
        assert_eq!(t.root().processor, 0);

        let pid_22 = t.node(22).unwrap().processor;
        let g = t.group(pid_22, 1).unwrap().unwrap();
        assert_eq!(g.node, 1);
        assert_eq!(g.master, 0);
        assert_eq!(g.members.len(), 10);
        assert!(g.members.contains(&pid_22));
        assert_eq!(g.shape, IntRect::from_extent([50, 50]));

        // leaf 9 sits at level 2, so it has no group at level 2
        assert!(t.group(2, 2).unwrap().is_none());
        assert_eq!(t.group(pid_22, 2).unwrap().unwrap().node, 7);
    }

    #[test]
    fn move_origin_reshapes_and_recenters() {
        let mut t = reference_tree();
        t.move_origin(ROOT, Int2D::new([60, 40])).unwrap();
        assert_eq!(t.node(1).unwrap().shape, IntRect::from_extent([60, 40]));
        // node 7 was [25,50)x[0,25) with origin (35,15); its parent node 1
        // keeps origin (25,25) so node 7 becomes [25,60)x[0,25)
        assert_eq!(t.node(7).unwrap().shape, IntRect::new(Int2D::new([25, 0]), Int2D::new([60, 25])));
        assert_eq!(t.node(7).unwrap().origin, Some(Int2D::new([35, 15])));
        // node 8 shrinks to [25,60)x[25,40); origin (40,35) still fits
        assert_eq!(t.node(8).unwrap().origin, Some(Int2D::new([40, 35])));
        t.validate().unwrap();
        assert_eq!(t.rects_by_processor().iter().map(|r| r.volume()).sum::<usize>(), 100 * 100);

        // moving node 1's origin past node 8's origin recentres node 8
        t.move_origin(1, Int2D::new([45, 38])).unwrap();
        let n8 = t.node(8).unwrap();
        assert_eq!(n8.shape, IntRect::new(Int2D::new([45, 38]), Int2D::new([60, 40])));
        assert_eq!(n8.origin, Some(n8.shape.center()));
        t.validate().unwrap();
    }

    #[test]
    fn merge_returns_ids_for_reuse() {
        let mut t = QuadTree::uniform(world(), 7).unwrap();
        assert_eq!(t.node(1).unwrap().children, vec![5, 6, 7, 8]);
        t.merge(1).unwrap();
        assert!(t.node(1).unwrap().is_leaf());
        assert!(t.node(5).is_err());
        let ids = t.split(Int2D::new([10, 10])).unwrap();
        assert_eq!(ids, vec![5, 6, 7, 8]);
    }

    #[test]
    fn bad_counts_and_points_are_rejected() {
        assert!(matches!(
            QuadTree::uniform(world(), 5),
            Err(PartitionError::InvalidProcessCount { .. })
        ));
        let mut t = QuadTree::new(world(), 4).unwrap();
        assert!(t.split(Int2D::new([0, 50])).is_err());
        t.split(Int2D::new([50, 50])).unwrap();
        assert!(matches!(
            t.split(Int2D::new([10, 10])),
            Err(PartitionError::TreeCapacity { max: 5 })
        ));
    }

    #[test]
    fn weighted_origin_clamps_to_margin() {
        let shape = IntRect::from_extent([10, 10]);
        let samples = [(Int2D::new([2, 2]), 1.0), (Int2D::new([7, 7]), 3.0)];
        let (o, clamped) = weighted_origin(&shape, &samples, 1).unwrap();
        // (2 + 21) / 4 = 5.75 -> 5
        assert_eq!(o, Int2D::new([5, 5]));
        assert!(!clamped);
        let heavy = [(Int2D::new([9, 0]), 1.0)];
        let (o, clamped) = weighted_origin(&shape, &heavy, 2).unwrap();
        assert_eq!(o, Int2D::new([8, 2]));
        assert!(clamped);
        assert!(weighted_origin(&shape, &[(Int2D::new([1, 1]), 0.0)], 1).is_none());
    }
}
