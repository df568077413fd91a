//! Distributed halo fields.
//!
//! A [`HaloField`] is one process's view of a global grid field: a storage
//! box covering the local partition grown by the area of interest, the
//! decomposition it was built against, and one of two halo exchangers:
//!
//! - [`StructuredExchanger`]: packed neighbour all-to-all, faces then
//!   corners. Reads beyond the halo fall back to a blocking remote read.
//! - [`RmaExchanger`]: ghost windows fed by eager one-sided puts on every
//!   boundary `set`, completed by a fence. Reads beyond the halo are errors.
//!
//! Every method that communicates is collective over the partition's ranks
//! and must be called in the same order everywhere. Halo values only change
//! inside `sync` (and the collectives that end with one); between syncs they
//! hold the previous epoch's data.

pub mod ghost;
pub mod migrator;
pub mod regions;
mod remote;
pub mod rma_exchange;
pub mod structured;
pub mod typed;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::algs::collective::{gather, neighbor_exchange, scatter};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire;
use crate::data::storage::GridStorage;
use crate::data::subarray::Subarray;
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::partitioning::{Decomposition, LayoutKind, Partition};
use crate::topology::point::IntPoint;
use crate::topology::rect::IntRect;

pub use self::ghost::{GhostWindow, WindowLayout};
pub use self::migrator::Migrator;
pub use self::regions::Regions;
pub use self::rma_exchange::RmaExchanger;
pub use self::structured::{StructuredExchanger, SyncStats};
pub use self::typed::{DoubleGrid, DoubleGrid2D, IntGrid, IntGrid2D, ObjectGrid, ObjectGrid2D};

use self::remote::RemoteReads;

/// Element types a field can hold.
pub trait FieldValue: Clone + Default + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> FieldValue for T where T: Clone + Default + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Offsets inside a field's tag block.
const TAG_PASSES: u16 = 0; // +0, +1
const TAG_RMA: u16 = 2; // +2, +3
const TAG_COLLECT: u16 = 4; // collect and distribute
const TAG_GROUP: u16 = 5;
const TAG_RELOAD: u16 = 6;
const TAG_READ_REQUEST: u16 = 7;
const TAG_READ_REPLY: u16 = 8;

/// Halo exchange algorithm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExchangeMode {
    /// Structured for Cartesian partitions, RMA otherwise.
    #[default]
    Auto,
    Structured,
    Rma,
}

impl ExchangeMode {
    fn resolve(self, kind: LayoutKind) -> ExchangeMode {
        match (self, kind) {
            (ExchangeMode::Auto, LayoutKind::Cartesian) => ExchangeMode::Structured,
            (ExchangeMode::Auto, _) => ExchangeMode::Rma,
            (mode, _) => mode,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HaloConfig {
    pub exchange: ExchangeMode,
    /// Structured only: also exchange edge/corner blocks (second pass).
    pub exchange_corners: bool,
    /// Structured only: serve and issue point reads beyond the halo.
    pub remote_reads: bool,
}

impl Default for HaloConfig {
    fn default() -> Self {
        HaloConfig {
            exchange: ExchangeMode::Auto,
            exchange_corners: true,
            remote_reads: true,
        }
    }
}

impl HaloConfig {
    pub fn structured() -> Self {
        HaloConfig {
            exchange: ExchangeMode::Structured,
            ..Default::default()
        }
    }

    pub fn rma() -> Self {
        HaloConfig {
            exchange: ExchangeMode::Rma,
            ..Default::default()
        }
    }

    pub fn with_corners(mut self, on: bool) -> Self {
        self.exchange_corners = on;
        self
    }

    pub fn with_remote_reads(mut self, on: bool) -> Self {
        self.remote_reads = on;
        self
    }
}

enum Exchange<T, C: Communicator, const D: usize> {
    Structured(StructuredExchanger),
    Rma(RmaExchanger<T, C, D>),
}

impl<T: FieldValue, C: Communicator, const D: usize> Exchange<T, C, D> {
    fn build(
        mode: ExchangeMode,
        config: &HaloConfig,
        comm: &C,
        dec: &Decomposition<D>,
        tags: CommTag,
        fill: &T,
    ) -> Result<Self, HaloError> {
        Ok(match mode {
            ExchangeMode::Rma => Exchange::Rma(RmaExchanger::build(
                comm.clone(),
                dec,
                tags.offset(TAG_RMA),
                fill.clone(),
            )?),
            _ => Exchange::Structured(StructuredExchanger::build(
                dec,
                comm.rank(),
                config.exchange_corners,
                tags.offset(TAG_PASSES),
            )?),
        })
    }

    fn layout(&self) -> WindowLayout {
        match self {
            Exchange::Structured(ex) => ex.layout(),
            Exchange::Rma(ex) => ex.layout(),
        }
    }
}

/// One rank's part of a distributed grid field with element type `T`.
pub struct HaloField<T, C: Communicator, S, const D: usize> {
    comm: C,
    config: HaloConfig,
    mode: ExchangeMode,
    decomp: Arc<Decomposition<D>>,
    /// Epoch of the partition this field was built from; moves on commit.
    partition_epoch: Arc<AtomicU64>,
    regions: Regions<D>,
    storage: Arc<RwLock<S>>,
    exchange: Exchange<T, C, D>,
    remote: Option<RemoteReads<T, C, D>>,
    tags: CommTag,
    fill: T,
}

impl<T, C, S, const D: usize> HaloField<T, C, S, D>
where
    T: FieldValue,
    C: Communicator,
    S: GridStorage<T, D>,
{
    /// Collective: allocate this rank's storage and build the exchanger.
    /// Every cell starts as `fill`; halo cells return to `fill` on reload.
    pub fn new(partition: &Partition<C, D>, config: HaloConfig, fill: T) -> Result<Self, HaloError> {
        let comm = partition.comm().clone();
        let me = comm.rank();
        let decomp = partition.decomposition()?;
        let regions = Regions::new(decomp.rect(me)?, decomp.config());
        let storage = Arc::new(RwLock::new(S::with_rect(regions.halo, fill.clone())));
        let tags = partition.allocate_tags()?;
        let mode = config.exchange.resolve(partition.kind());
        let exchange = Exchange::build(mode, &config, &comm, &*decomp, tags, &fill)?;

        let remote = if mode == ExchangeMode::Structured && config.remote_reads && comm.size() > 1 {
            let svc = RemoteReads::start(
                comm.clone(),
                tags.offset(TAG_READ_REQUEST),
                tags.offset(TAG_READ_REPLY),
                regions.aoi,
                Arc::clone(&storage),
            )
            .map_err(|e| HaloError::RemoteRead {
                owner: me,
                reason: format!("cannot start read service: {e}"),
            })?;
            Some(svc)
        } else {
            None
        };

        log::debug!(
            "rank {me}: field on tags {:#x} ({mode:?}, {:?}), local {}, storage {}",
            tags.as_u16(),
            exchange.layout(),
            regions.local,
            regions.halo
        );
        Ok(HaloField {
            comm,
            config,
            mode,
            decomp,
            partition_epoch: partition.epoch_handle(),
            regions,
            storage,
            exchange,
            remote,
            tags,
            fill,
        })
    }

    /// [`new`](Self::new) with `T::default()` as the fill value.
    pub fn with_default(partition: &Partition<C, D>, config: HaloConfig) -> Result<Self, HaloError> {
        Self::new(partition, config, T::default())
    }

    // ---------------------------------------------------------------------
    // Geometry
    // ---------------------------------------------------------------------

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn config(&self) -> &HaloConfig {
        &self.config
    }

    /// Exchange algorithm in use (never `Auto`).
    pub fn exchange_mode(&self) -> ExchangeMode {
        self.mode
    }

    pub fn window_layout(&self) -> WindowLayout {
        self.exchange.layout()
    }

    pub fn regions(&self) -> &Regions<D> {
        &self.regions
    }

    pub fn local_rect(&self) -> IntRect<D> {
        self.regions.local
    }

    pub fn halo_rect(&self) -> IntRect<D> {
        self.regions.halo
    }

    pub fn private_rect(&self) -> IntRect<D> {
        self.regions.private
    }

    pub fn aoi(&self) -> [i64; D] {
        self.regions.aoi
    }

    /// Epoch of the decomposition the field currently follows.
    pub fn epoch(&self) -> u64 {
        self.decomp.epoch()
    }

    pub fn decomposition(&self) -> &Arc<Decomposition<D>> {
        &self.decomp
    }

    pub fn neighbors(&self) -> Result<&[usize], HaloError> {
        Ok(self.decomp.neighbors(self.rank())?)
    }

    pub fn in_local(&self, p: &IntPoint<D>) -> bool {
        self.regions.in_local(p)
    }

    pub fn in_private(&self, p: &IntPoint<D>) -> bool {
        self.regions.in_private(p)
    }

    pub fn in_shared(&self, p: &IntPoint<D>) -> bool {
        self.regions.in_shared(p)
    }

    pub fn in_halo(&self, p: &IntPoint<D>) -> bool {
        self.regions.in_halo(p)
    }

    pub fn in_local_and_halo(&self, p: &IntPoint<D>) -> bool {
        self.regions.in_local_and_halo(p)
    }

    /// Image of `p` inside local + halo (toroidal wrap applied).
    pub fn resolve(&self, p: &IntPoint<D>) -> Option<IntPoint<D>> {
        self.regions.resolve(p)
    }

    /// Storage coordinates of `p`: global minus partition origin plus AOI.
    pub fn to_local_point(&self, p: &IntPoint<D>) -> Result<IntPoint<D>, HaloError> {
        self.regions
            .to_local_point(p)
            .ok_or_else(|| HaloError::NotInLocalOrHalo {
                rank: self.rank(),
                point: p.to_vec(),
                halo: self.regions.halo.to_string(),
            })
    }

    fn out_of_world(&self, p: &IntPoint<D>) -> HaloError {
        HaloError::OutOfWorld {
            rank: self.rank(),
            point: p.to_vec(),
            world: self.regions.world().to_string(),
        }
    }

    // ---------------------------------------------------------------------
    // Point access
    // ---------------------------------------------------------------------

    /// Write an owned cell. Halo and remote cells are rejected.
    pub fn try_set(&mut self, p: &IntPoint<D>, value: T) -> Result<(), HaloError> {
        if self.regions.canonical(p).is_none() {
            return Err(self.out_of_world(p));
        }
        let Some(g) = self.regions.owned(p) else {
            return Err(HaloError::OutOfBoundsWrite {
                rank: self.rank(),
                point: p.to_vec(),
                local: self.regions.local.to_string(),
                local_point: (*p - self.regions.halo.lo).to_vec(),
            });
        };
        if let Exchange::Rma(ex) = &mut self.exchange {
            ex.on_set(&g, &value)?;
        }
        let mut storage = self.storage.write();
        let capacity = storage.len();
        let idx = storage.global_index(&g).ok_or(HaloError::StorageRange {
            offset: 0,
            len: 1,
            capacity,
        })?;
        storage.set(idx, value)
    }

    /// [`try_set`](Self::try_set), treating failure as a fatal contract
    /// violation.
    pub fn set(&mut self, p: &IntPoint<D>, value: T) {
        if let Err(e) = self.try_set(p, value) {
            panic!("{e}");
        }
    }

    /// Read any cell. Local and halo cells come from storage (halo values
    /// are as of the last `sync`); beyond the halo a structured field asks
    /// the owner, an RMA field fails.
    pub fn try_get(&self, p: &IntPoint<D>) -> Result<T, HaloError> {
        let Some(canonical) = self.regions.canonical(p) else {
            return Err(self.out_of_world(p));
        };
        if let Some(q) = self.regions.resolve(p) {
            if let Exchange::Rma(ex) = &self.exchange {
                if !self.regions.local.contains(&q) {
                    if let Some(v) = ex.read(&q) {
                        return Ok(v.clone());
                    }
                }
            }
            let storage = self.storage.read();
            return storage
                .global_index(&q)
                .and_then(|i| storage.get(i))
                .cloned()
                .ok_or(HaloError::StorageRange {
                    offset: 0,
                    len: 1,
                    capacity: storage.len(),
                });
        }
        if let Exchange::Rma(_) = self.exchange {
            return Err(HaloError::OutOfAoi {
                rank: self.rank(),
                point: p.to_vec(),
                local: self.regions.local.to_string(),
            });
        }
        let owner = self.decomp.to_partition_id(&canonical)?;
        let Some(remote) = &self.remote else {
            return Err(HaloError::RemoteRead {
                owner,
                reason: "remote reads are disabled".into(),
            });
        };
        log::warn!(
            "rank {}: {p} is beyond the halo {}, reading it from rank {owner}",
            self.rank(),
            self.regions.halo
        );
        remote.read(owner, &canonical)
    }

    /// [`try_get`](Self::try_get), treating failure as fatal.
    pub fn get(&self, p: &IntPoint<D>) -> T {
        match self.try_get(p) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }

    /// Read access to the whole storage box (local + halo).
    pub fn storage(&self) -> RwLockReadGuard<'_, S> {
        self.storage.read()
    }

    /// Bulk edit of the storage. Halo cells written here are overwritten by
    /// the next `sync`; owned cells are pushed in full at the next `sync`.
    pub fn with_storage_mut<R>(&mut self, f: impl FnOnce(&mut S) -> R) -> R {
        if let Exchange::Rma(ex) = &mut self.exchange {
            ex.request_full_push();
        }
        f(&mut self.storage.write())
    }

    /// Fold over the owned cells in row-major order.
    pub fn fold_local<A>(&self, init: A, mut f: impl FnMut(A, IntPoint<D>, &T) -> A) -> A {
        let storage = self.storage.read();
        let frame = storage.rect();
        let mut acc = init;
        for p in self.regions.local.points() {
            if let Some(v) = storage.get(frame.flat_index(&p)) {
                acc = f(acc, p, v);
            }
        }
        acc
    }

    /// Owned cells, packed row-major.
    pub fn local_values(&self) -> Vec<T> {
        Subarray::new(&self.regions.halo, &self.regions.local).pack(self.storage.read().as_slice())
    }

    // ---------------------------------------------------------------------
    // Collectives
    // ---------------------------------------------------------------------

    fn ensure_current(&self) -> Result<(), HaloError> {
        let partition = self.partition_epoch.load(Ordering::Acquire);
        if partition != self.decomp.epoch() {
            return Err(HaloError::StaleDecomposition {
                field: self.decomp.epoch(),
                partition,
            });
        }
        Ok(())
    }

    /// Collective: refresh every halo cell from its owner.
    pub fn sync(&mut self) -> Result<SyncStats, HaloError> {
        self.ensure_current()?;
        let stats = match &mut self.exchange {
            Exchange::Structured(ex) => ex.exchange(&self.comm, &self.storage)?,
            Exchange::Rma(ex) => ex.fence(&mut *self.storage.write())?,
        };
        log::debug!(
            "rank {}: sync at epoch {}: {} messages, {} values out, {} in",
            self.rank(),
            self.decomp.epoch(),
            stats.messages,
            stats.values_sent,
            stats.values_received
        );
        Ok(stats)
    }

    /// Collective: gather every rank's owned cells into one storage over the
    /// world on `root`. Other ranks get `None`.
    pub fn collect(&self, root: usize) -> Result<Option<S>, HaloError> {
        self.ensure_current()?;
        let members: Vec<usize> = (0..self.comm.size()).collect();
        let world = self.regions.world();
        self.gather_into(self.tags.offset(TAG_COLLECT), root, &members, world)
    }

    /// Collective: overwrite every rank's owned cells from `source` (a
    /// storage covering the world, only read on `root`), then `sync`.
    /// If the root cannot serve, every rank gets `CollectiveAborted`.
    pub fn distribute(&mut self, root: usize, source: Option<&S>) -> Result<(), HaloError> {
        self.ensure_current()?;
        let members: Vec<usize> = (0..self.comm.size()).collect();
        let world = self.regions.world();
        self.scatter_from(self.tags.offset(TAG_COLLECT), root, &members, world, source)?;
        self.sync().map(|_| ())
    }

    /// Collective over the quad-tree group of this rank at `level`: the
    /// group master receives a storage shaped like the group node. Ranks
    /// without a group at `level` take no part and get `None`.
    pub fn collect_group(&self, level: usize) -> Result<Option<S>, HaloError> {
        self.ensure_current()?;
        let Some(group) = self.decomp.group(self.rank(), level)? else {
            return Ok(None);
        };
        self.gather_into(self.tags.offset(TAG_GROUP), group.master, &group.members, group.shape)
    }

    /// Inverse of [`collect_group`](Self::collect_group); `source` is read on
    /// the group master and must cover the group node. Ends with a `sync`
    /// on every rank.
    pub fn distribute_group(&mut self, level: usize, source: Option<&S>) -> Result<(), HaloError> {
        self.ensure_current()?;
        if let Some(group) = self.decomp.group(self.rank(), level)? {
            self.scatter_from(
                self.tags.offset(TAG_GROUP),
                group.master,
                &group.members,
                group.shape,
                source,
            )?;
        }
        self.sync().map(|_| ())
    }

    fn gather_into(
        &self,
        tag: CommTag,
        root: usize,
        members: &[usize],
        shape: IntRect<D>,
    ) -> Result<Option<S>, HaloError> {
        let payload = wire::encode(root, &self.local_values())?;
        let Some(parts) = gather(&self.comm, tag, root, members, payload)? else {
            return Ok(None);
        };
        let mut out = S::with_rect(shape, self.fill.clone());
        for (rank, bytes) in parts {
            let vals: Vec<T> = wire::decode(rank, &bytes)?;
            let region = self.decomp.rect(rank)?;
            Subarray::new(&shape, &region).unpack(out.as_mut_slice(), &vals)?;
        }
        log::debug!("rank {root}: gathered {} ranks into {shape}", members.len());
        Ok(Some(out))
    }

    fn scatter_from(
        &mut self,
        tag: CommTag,
        root: usize,
        members: &[usize],
        shape: IntRect<D>,
        source: Option<&S>,
    ) -> Result<(), HaloError> {
        let payloads = if self.rank() == root {
            let mut out = BTreeMap::new();
            for &pid in members {
                let part: Result<Vec<T>, String> = match source {
                    None => Err("root was given no source storage".into()),
                    Some(src) if !src.rect().contains_rect(&shape) => {
                        Err(format!("source {} does not cover {shape}", src.rect()))
                    }
                    Some(src) => {
                        let region = self.decomp.rect(pid)?;
                        Ok(Subarray::new(&src.rect(), &region).pack(src.as_slice()))
                    }
                };
                out.insert(pid, wire::encode(pid, &part)?);
            }
            Some(out)
        } else {
            None
        };
        let bytes = scatter(&self.comm, tag, root, members, payloads)?;
        let vals = wire::decode::<Result<Vec<T>, String>>(root, &bytes)?
            .map_err(|reason| HaloError::CollectiveAborted { root, reason })?;
        let view = Subarray::new(&self.regions.halo, &self.regions.local);
        view.unpack(self.storage.write().as_mut_slice(), &vals)?;
        if let Exchange::Rma(ex) = &mut self.exchange {
            ex.request_full_push();
        }
        Ok(())
    }

    /// Collective: follow the partition to its current decomposition.
    ///
    /// Owned cells move from their old owners to their new owners, halo
    /// cells are reset to the fill value and the exchanger is rebuilt; the
    /// next `sync` refills the halo. Returns `false` when the field is
    /// already current.
    pub fn reload(&mut self, partition: &Partition<C, D>) -> Result<bool, HaloError> {
        let next = partition.decomposition()?;
        if next.epoch() == self.decomp.epoch() {
            return Ok(false);
        }
        let me = self.rank();
        let old_local = self.regions.local;
        let new_local = next.rect(me)?;

        // 1) flush puts issued against the old windows
        if let Exchange::Rma(ex) = &mut self.exchange {
            ex.fence(&mut *self.storage.write())?;
        }

        // 2) ship old ∩ new intersections to their new owners
        let mut sends = BTreeMap::new();
        {
            let storage = self.storage.read();
            for pid in next.covered_partition_ids(&old_local) {
                let Some(region) = next.rect(pid)?.intersection(&old_local) else {
                    continue;
                };
                let vals = Subarray::new(&self.regions.halo, &region).pack(storage.as_slice());
                sends.insert(pid, wire::encode(pid, &vals)?);
            }
        }
        let recv_from: BTreeSet<usize> = self.decomp.covered_partition_ids(&new_local);
        let replies = neighbor_exchange(&self.comm, self.tags.offset(TAG_RELOAD), sends, &recv_from)?;

        // 3) reshape and fill the new owned box
        let regions = Regions::new(new_local, next.config());
        {
            let mut storage = self.storage.write();
            storage.reshape(regions.halo, self.fill.clone());
            for (src, bytes) in replies {
                let Some(region) = self.decomp.rect(src)?.intersection(&new_local) else {
                    continue;
                };
                let vals: Vec<T> = wire::decode(src, &bytes)?;
                Subarray::new(&regions.halo, &region).unpack(storage.as_mut_slice(), &vals)?;
            }
        }

        // 4) rebuild the exchanger
        self.exchange = Exchange::build(self.mode, &self.config, &self.comm, &*next, self.tags, &self.fill)?;
        log::info!(
            "rank {me}: field reloaded from epoch {} to {}, local {old_local} -> {new_local}",
            self.decomp.epoch(),
            next.epoch()
        );
        self.regions = regions;
        self.decomp = next;
        crate::debug_invariants!(*self);
        Ok(true)
    }
}

impl<T, C, S, const D: usize> DebugInvariants for HaloField<T, C, S, D>
where
    T: FieldValue,
    C: Communicator,
    S: GridStorage<T, D>,
{
    fn validate_invariants(&self) -> Result<(), HaloError> {
        let storage = self.storage.read();
        if storage.rect() != self.regions.halo {
            return Err(HaloError::ShapeMismatch {
                expected: format!("storage over {}", self.regions.halo),
                found: storage.rect().to_string(),
            });
        }
        let local = self.decomp.rect(self.rank())?;
        if local != self.regions.local {
            return Err(HaloError::ShapeMismatch {
                expected: format!("local box {local}"),
                found: self.regions.local.to_string(),
            });
        }
        if !self.regions.halo.contains_rect(&self.regions.local) {
            return Err(HaloError::ShapeMismatch {
                expected: format!("halo containing {}", self.regions.local),
                found: self.regions.halo.to_string(),
            });
        }
        Ok(())
    }
}

impl<T, C: Communicator, S, const D: usize> std::fmt::Debug for HaloField<T, C, S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaloField")
            .field("rank", &self.comm.rank())
            .field("mode", &self.mode)
            .field("epoch", &self.decomp.epoch())
            .field("local", &self.regions.local)
            .field("halo", &self.regions.halo)
            .field("tags", &self.tags)
            .finish()
    }
}
