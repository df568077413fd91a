//! Domain decomposition: which process owns which box of the world.
//!
//! A [`Partition`] owns the active [`Decomposition`] plus any staged edits.
//! Three layouts share one interface:
//!
//! - **Cartesian**: equal blocks over a process grid; fixed at construction.
//! - **Non-uniform**: arbitrary rectangles, edited with
//!   `insert_partition`/`update_partition`/`remove_partition` and made
//!   effective by a collective [`commit`](Partition::commit).
//! - **Quad tree**: leaves of a region tree, edited with `split`, `merge`
//!   and `move_origin`, rebalanced with [`balance`](Partition::balance).
//!
//! Every committed decomposition carries an epoch. Fields remember the epoch
//! they were built against and refuse to `sync` until they are reloaded.

pub mod config;
pub mod decomposition;
pub mod error;
pub mod process_grid;
pub mod quad_tree;
pub mod tiling;

#[cfg(test)]
mod tests;

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::algs::collective::{all_gather_serde, gather_serde};
use crate::algs::communicator::{CommTag, Communicator};

pub use self::config::PartitionConfig;
pub use self::decomposition::{Decomposition, Layout};
pub use self::error::PartitionError;
pub use self::process_grid::{Direction, ProcessGrid, create_dims};
pub use self::quad_tree::{Group, QuadNode, QuadTree};
pub use self::tiling::TileIndex;

use crate::topology::point::IntPoint;
use crate::topology::rect::IntRect;

/// Tags used by partition collectives.
const PARTITION_TAGS: CommTag = CommTag::new(0x1000);
const TAG_COMMIT: u16 = 0;
const TAG_BALANCE_GATHER: u16 = 1;
const TAG_BALANCE_MOVES: u16 = 2;

/// First tag block handed to fields; each field gets [`FIELD_TAG_STRIDE`]
/// consecutive tags.
const FIELD_TAG_BASE: u16 = 0x2000;
pub const FIELD_TAG_STRIDE: u16 = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Staged<const D: usize> {
    Insert(IntRect<D>),
    Update(IntRect<D>),
    Remove,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct CommitVote {
    ok: bool,
    reason: String,
    fingerprint: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BalanceSample<const D: usize> {
    center: IntPoint<D>,
    runtime: f64,
}

pub struct Partition<C: Communicator, const D: usize> {
    comm: C,
    config: PartitionConfig<D>,
    kind: LayoutKind,
    current: Option<Arc<Decomposition<D>>>,
    staged: BTreeMap<usize, Staged<D>>,
    staged_tree: Option<QuadTree<D>>,
    epoch: Arc<AtomicU64>,
    /// Base of the next field tag block; wider than a tag so exhaustion shows.
    next_tag: AtomicU32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayoutKind {
    Cartesian,
    NonUniform,
    QuadTree,
}

impl LayoutKind {
    fn name(self) -> &'static str {
        match self {
            LayoutKind::Cartesian => "cartesian",
            LayoutKind::NonUniform => "non-uniform",
            LayoutKind::QuadTree => "quad-tree",
        }
    }
}

impl<C: Communicator, const D: usize> Partition<C, D> {
    fn empty(comm: C, config: PartitionConfig<D>, kind: LayoutKind) -> Result<Self, PartitionError> {
        config.validate()?;
        Ok(Partition {
            comm,
            config,
            kind,
            current: None,
            staged: BTreeMap::new(),
            staged_tree: None,
            epoch: Arc::new(AtomicU64::new(0)),
            next_tag: AtomicU32::new(u32::from(FIELD_TAG_BASE)),
        })
    }

    fn install(&mut self, dec: Decomposition<D>) {
        let epoch = dec.epoch();
        let neighbors = dec.neighbors(self.comm.rank()).map(<[usize]>::len).unwrap_or(0);
        log::info!(
            "rank {}: {} decomposition epoch {epoch} committed, local {}, {neighbors} neighbours",
            self.comm.rank(),
            dec.layout_name(),
            dec.rect(self.comm.rank())
                .map(|r| r.to_string())
                .unwrap_or_else(|_| "<none>".into()),
        );
        crate::debug_invariants!(dec);
        self.current = Some(Arc::new(dec));
        self.epoch.store(epoch, Ordering::Release);
    }

    /// Equal blocks over a balanced process grid of `comm.size()` ranks.
    pub fn cartesian(comm: C, config: PartitionConfig<D>) -> Result<Self, PartitionError> {
        let dims = create_dims::<D>(comm.size())?;
        Self::cartesian_with_dims(comm, config, dims)
    }

    pub fn cartesian_with_dims(
        comm: C,
        config: PartitionConfig<D>,
        dims: [usize; D],
    ) -> Result<Self, PartitionError> {
        let procs: usize = dims.iter().product();
        if procs != comm.size() {
            return Err(PartitionError::InvalidProcessCount {
                procs: comm.size(),
                reason: format!("process grid {dims:?} holds {procs}"),
            });
        }
        let mut p = Self::empty(comm, config, LayoutKind::Cartesian)?;
        let dec = Decomposition::cartesian(config, dims, 1)?;
        p.install(dec);
        Ok(p)
    }

    /// Uncommitted non-uniform partition; stage regions and `commit`.
    pub fn non_uniform(comm: C, config: PartitionConfig<D>) -> Result<Self, PartitionError> {
        Self::empty(comm, config, LayoutKind::NonUniform)
    }

    /// Quad tree split uniformly into `comm.size()` leaves.
    pub fn quad_tree(comm: C, config: PartitionConfig<D>) -> Result<Self, PartitionError> {
        let tree = QuadTree::uniform(config.world(), comm.size())?;
        Self::quad_tree_from(comm, config, tree)
    }

    /// Quad tree built from explicit split points.
    pub fn quad_tree_with_splits(
        comm: C,
        config: PartitionConfig<D>,
        splits: &[IntPoint<D>],
    ) -> Result<Self, PartitionError> {
        let tree = QuadTree::from_splits(config.world(), comm.size(), splits)?;
        Self::quad_tree_from(comm, config, tree)
    }

    fn quad_tree_from(comm: C, config: PartitionConfig<D>, tree: QuadTree<D>) -> Result<Self, PartitionError> {
        let mut p = Self::empty(comm, config, LayoutKind::QuadTree)?;
        let dec = Decomposition::from_quad_tree(config, tree, 1)?;
        p.install(dec);
        Ok(p)
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn num_procs(&self) -> usize {
        self.comm.size()
    }

    pub fn config(&self) -> &PartitionConfig<D> {
        &self.config
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn is_committed(&self) -> bool {
        self.current.is_some()
    }

    /// Current epoch; 0 before the first commit.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn epoch_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.epoch)
    }

    /// Reserve a block of [`FIELD_TAG_STRIDE`] tags. Fields must be created
    /// in the same order on every rank.
    pub(crate) fn allocate_tags(&self) -> Result<CommTag, PartitionError> {
        let stride = u32::from(FIELD_TAG_STRIDE);
        let base = self
            .next_tag
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                (next + stride <= u32::from(u16::MAX) + 1).then_some(next + stride)
            })
            .map_err(|next| PartitionError::TagsExhausted {
                allocated: ((next - u32::from(FIELD_TAG_BASE)) / stride) as usize,
            })?;
        u16::try_from(base)
            .map(CommTag::new)
            .map_err(|_| PartitionError::TagsExhausted {
                allocated: ((base - u32::from(FIELD_TAG_BASE)) / stride) as usize,
            })
    }

    pub fn decomposition(&self) -> Result<Arc<Decomposition<D>>, PartitionError> {
        self.current.clone().ok_or(PartitionError::NotCommitted)
    }

    fn committed(&self) -> Result<&Decomposition<D>, PartitionError> {
        self.current.as_deref().ok_or(PartitionError::NotCommitted)
    }

    pub fn to_partition_id(&self, p: &IntPoint<D>) -> Result<usize, PartitionError> {
        self.committed()?.to_partition_id(p)
    }

    /// Neighbours of the calling rank.
    pub fn neighbor_ids(&self) -> Result<Vec<usize>, PartitionError> {
        self.neighbor_ids_of(self.comm.rank())
    }

    pub fn neighbor_ids_of(&self, pid: usize) -> Result<Vec<usize>, PartitionError> {
        Ok(self.committed()?.neighbors(pid)?.to_vec())
    }

    pub fn local_rect(&self) -> Result<IntRect<D>, PartitionError> {
        self.rect_of(self.comm.rank())
    }

    pub fn rect_of(&self, pid: usize) -> Result<IntRect<D>, PartitionError> {
        self.committed()?.rect(pid)
    }

    pub fn covered_partition_ids(&self, region: &IntRect<D>) -> Result<BTreeSet<usize>, PartitionError> {
        Ok(self.committed()?.covered_partition_ids(region))
    }

    pub fn process_grid(&self) -> Option<ProcessGrid<D>> {
        self.current.as_ref().and_then(|d| d.process_grid().copied())
    }

    /// Quad-tree group of the calling rank at `level`.
    pub fn group(&self, level: usize) -> Result<Option<Group<D>>, PartitionError> {
        self.committed()?.group(self.comm.rank(), level)
    }

    fn unsupported(&self, operation: &'static str) -> PartitionError {
        PartitionError::Unsupported {
            layout: self.kind.name(),
            operation,
        }
    }

    fn require(&self, kind: LayoutKind, operation: &'static str) -> Result<(), PartitionError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(self.unsupported(operation))
        }
    }

    // ---------------------------------------------------------------------
    // Staging (non-uniform)
    // ---------------------------------------------------------------------

    fn region_exists(&self, pid: usize) -> bool {
        match self.staged.get(&pid) {
            Some(Staged::Remove) => false,
            Some(_) => true,
            None => self
                .current
                .as_ref()
                .is_some_and(|d| pid < d.num_partitions()),
        }
    }

    /// Stage a region for a partition id that has none.
    pub fn insert_partition(&mut self, pid: usize, region: IntRect<D>) -> Result<(), PartitionError> {
        self.require(LayoutKind::NonUniform, "insert_partition")?;
        if self.region_exists(pid) {
            return Err(PartitionError::DuplicatePartition(pid));
        }
        self.staged.insert(pid, Staged::Insert(region));
        Ok(())
    }

    /// Stage a new region for an existing partition id.
    pub fn update_partition(&mut self, pid: usize, region: IntRect<D>) -> Result<(), PartitionError> {
        self.require(LayoutKind::NonUniform, "update_partition")?;
        if !self.region_exists(pid) {
            return Err(PartitionError::UnknownPartition(pid));
        }
        let entry = match self.staged.get(&pid) {
            Some(Staged::Insert(_)) => Staged::Insert(region),
            _ => Staged::Update(region),
        };
        self.staged.insert(pid, entry);
        Ok(())
    }

    pub fn remove_partition(&mut self, pid: usize) -> Result<(), PartitionError> {
        self.require(LayoutKind::NonUniform, "remove_partition")?;
        if !self.region_exists(pid) {
            return Err(PartitionError::UnknownPartition(pid));
        }
        self.staged.insert(pid, Staged::Remove);
        Ok(())
    }

    /// Stage equal blocks over `dims` (a balanced grid when `None`), one per
    /// rank, replacing whatever is staged or committed.
    pub fn init_uniformly(&mut self, dims: Option<[usize; D]>) -> Result<(), PartitionError> {
        self.require(LayoutKind::NonUniform, "init_uniformly")?;
        let dims = match dims {
            Some(d) => d,
            None => create_dims::<D>(self.comm.size())?,
        };
        let blocks = Decomposition::cartesian(self.config, dims, 0)?;
        self.staged.clear();
        let existing = self.current.as_ref().map_or(0, |d| d.num_partitions());
        for (pid, r) in blocks.rects().iter().enumerate() {
            let op = if pid < existing {
                Staged::Update(*r)
            } else {
                Staged::Insert(*r)
            };
            self.staged.insert(pid, op);
        }
        for pid in blocks.num_partitions()..existing {
            self.staged.insert(pid, Staged::Remove);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Staging (quad tree)
    // ---------------------------------------------------------------------

    fn tree_mut(&mut self, operation: &'static str) -> Result<&mut QuadTree<D>, PartitionError> {
        self.require(LayoutKind::QuadTree, operation)?;
        if self.staged_tree.is_none() {
            let tree = self
                .committed()?
                .quad_tree()
                .cloned()
                .ok_or(self.unsupported(operation))?;
            self.staged_tree = Some(tree);
        }
        self.staged_tree.as_mut().ok_or(PartitionError::NotCommitted)
    }

    /// Stage a split of the leaf containing `p`.
    pub fn split(&mut self, p: IntPoint<D>) -> Result<Vec<usize>, PartitionError> {
        self.tree_mut("split")?.split(p)
    }

    pub fn merge(&mut self, node: usize) -> Result<(), PartitionError> {
        self.tree_mut("merge")?.merge(node)
    }

    pub fn move_origin(&mut self, node: usize, origin: IntPoint<D>) -> Result<(), PartitionError> {
        self.tree_mut("move_origin")?.move_origin(node, origin)
    }

    /// Drop every staged edit.
    pub fn abort(&mut self) {
        self.staged.clear();
        self.staged_tree = None;
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty() || self.staged_tree.is_some()
    }

    fn candidate(&self, epoch: u64) -> Result<Decomposition<D>, PartitionError> {
        match self.kind {
            LayoutKind::Cartesian => Err(self.unsupported("commit")),
            LayoutKind::NonUniform => {
                let mut regions: BTreeMap<usize, IntRect<D>> = self
                    .current
                    .as_ref()
                    .map(|d| d.rects().iter().copied().enumerate().collect())
                    .unwrap_or_default();
                for (&pid, op) in &self.staged {
                    match op {
                        Staged::Insert(r) | Staged::Update(r) => {
                            regions.insert(pid, *r);
                        }
                        Staged::Remove => {
                            regions.remove(&pid);
                        }
                    }
                }
                let procs = self.comm.size();
                if regions.len() != procs || regions.keys().copied().ne(0..procs) {
                    return Err(PartitionError::InvalidDecomposition {
                        reason: format!(
                            "need one region for each of ranks 0..{procs}, have {:?}",
                            regions.keys().collect::<Vec<_>>()
                        ),
                    });
                }
                Decomposition::non_uniform(self.config, regions.into_values().collect(), epoch)
            }
            LayoutKind::QuadTree => {
                let mut tree = match &self.staged_tree {
                    Some(t) => t.clone(),
                    None => self
                        .committed()?
                        .quad_tree()
                        .cloned()
                        .ok_or(self.unsupported("commit"))?,
                };
                tree.map_processors(self.comm.size())?;
                Decomposition::from_quad_tree(self.config, tree, epoch)
            }
        }
    }

    /// Validate the staged edits on every rank and, if all ranks accept the
    /// same decomposition, make it current. On rejection every rank gets the
    /// same `CommitRejected`, the previous decomposition stays active and the
    /// staged edits are discarded.
    pub fn commit(&mut self) -> Result<(), PartitionError> {
        if self.kind == LayoutKind::Cartesian {
            return Err(self.unsupported("commit"));
        }
        let epoch = self.epoch() + 1;
        let candidate = self.candidate(epoch);
        let vote = match &candidate {
            Ok(dec) => {
                let mut h = DefaultHasher::new();
                dec.rects().hash(&mut h);
                CommitVote {
                    ok: true,
                    reason: String::new(),
                    fingerprint: h.finish(),
                }
            }
            Err(e) => CommitVote {
                ok: false,
                reason: e.to_string(),
                fingerprint: 0,
            },
        };
        let votes = all_gather_serde(&self.comm, PARTITION_TAGS.offset(TAG_COMMIT), &vote)?;
        self.abort();

        let rejected: Vec<usize> = votes
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.ok)
            .map(|(r, _)| r)
            .collect();
        let reason = if let Some(&r) = rejected.first() {
            votes[r].reason.clone()
        } else if votes.iter().any(|v| v.fingerprint != votes[0].fingerprint) {
            "ranks staged different decompositions".to_string()
        } else {
            String::new()
        };
        if !reason.is_empty() {
            let ranks = if rejected.is_empty() {
                (0..votes.len()).collect()
            } else {
                rejected
            };
            log::warn!("rank {}: commit rejected by {ranks:?}: {reason}", self.comm.rank());
            return Err(PartitionError::CommitRejected { ranks, reason });
        }
        let dec = candidate?;
        self.install(dec);
        Ok(())
    }

    /// One load-balancing step of a quad tree. Every group at `level` moves
    /// its node's origin to the runtime-weighted mean of its leaves' centres,
    /// kept at least `max(1, aoi)` cells from the node's faces. Collective;
    /// returns how many nodes moved. Only when an origin actually changed is
    /// a new decomposition committed (fields must then be reloaded); a step
    /// that moves nothing keeps the epoch.
    pub fn balance(&mut self, runtime: f64, level: usize) -> Result<usize, PartitionError> {
        self.require(LayoutKind::QuadTree, "balance")?;
        let me = self.comm.rank();
        let dec = self.decomposition()?;
        let tree = dec.quad_tree().ok_or(self.unsupported("balance"))?;
        let margin = self.config.aoi.iter().copied().max().unwrap_or(0).max(1);

        // 1) members report (leaf centre, runtime) to their group master
        let mut proposal: Option<(usize, IntPoint<D>)> = None;
        if let Some(group) = tree.group(me, level)? {
            let sample = BalanceSample {
                center: dec.rect(me)?.center(),
                runtime: if runtime.is_finite() { runtime.max(0.0) } else { 0.0 },
            };
            let tag = PARTITION_TAGS.offset(TAG_BALANCE_GATHER);
            if let Some(samples) = gather_serde(&self.comm, tag, group.master, &group.members, &sample)? {
                let samples: Vec<(IntPoint<D>, f64)> =
                    samples.values().map(|s| (s.center, s.runtime)).collect();
                let current = tree.node(group.node)?.origin;
                if let Some((origin, clamped)) = quad_tree::weighted_origin(&group.shape, &samples, margin)
                    .filter(|(origin, _)| current != Some(*origin))
                {
                    if clamped {
                        log::warn!(
                            "rank {me}: balance origin for node {} clamped to {origin} inside {}",
                            group.node,
                            group.shape
                        );
                    }
                    proposal = Some((group.node, origin));
                }
            }
        }

        // 2) every rank learns every move
        let moves = all_gather_serde(&self.comm, PARTITION_TAGS.offset(TAG_BALANCE_MOVES), &proposal)?;

        if moves.iter().all(Option::is_none) {
            log::debug!("rank {me}: balance at level {level} left every origin in place");
            return Ok(0);
        }

        // 3) apply identically everywhere
        let mut next = tree.clone();
        let mut moved = 0;
        for (node, origin) in moves.into_iter().flatten() {
            next.move_origin(node, origin)?;
            moved += 1;
        }
        next.validate()?;
        next.map_processors(self.comm.size())?;
        let dec = Decomposition::from_quad_tree(self.config, next, self.epoch() + 1)?;
        log::info!("rank {me}: balance at level {level} moved {moved} nodes");
        self.abort();
        self.install(dec);
        Ok(moved)
    }
}

impl<C: Communicator, const D: usize> std::fmt::Debug for Partition<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("rank", &self.comm.rank())
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("epoch", &self.epoch())
            .field("staged", &self.has_staged())
            .finish()
    }
}
