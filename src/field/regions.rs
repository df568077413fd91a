//! Classification of global points relative to one process's storage.
//!
//! `local` is the partition rectangle, `halo` is `local` grown by the area
//! of interest (the whole storage box) and `private` is `local` shrunk by it.
//! Every cell of the storage box is exactly one of private, shared
//! (`local \ private`) or halo (`halo \ local`).

use crate::partitioning::PartitionConfig;
use crate::topology::point::IntPoint;
use crate::topology::rect::{IntRect, periodic_shifts};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Regions<const D: usize> {
    pub local: IntRect<D>,
    pub halo: IntRect<D>,
    pub private: IntRect<D>,
    pub extent: [i64; D],
    pub aoi: [i64; D],
    pub toroidal: bool,
}

impl<const D: usize> Regions<D> {
    pub fn new(local: IntRect<D>, config: &PartitionConfig<D>) -> Self {
        Regions {
            local,
            halo: local.resize(config.aoi),
            private: local.resize(config.aoi.map(|a| -a)),
            extent: config.extent,
            aoi: config.aoi,
            toroidal: config.toroidal,
        }
    }

    pub fn world(&self) -> IntRect<D> {
        IntRect::from_extent(self.extent)
    }

    /// The point as stored by its owner: wrapped on a torus, unchanged
    /// inside a bounded world, `None` outside it.
    pub fn canonical(&self, p: &IntPoint<D>) -> Option<IntPoint<D>> {
        if self.toroidal {
            Some(p.wrap(self.extent))
        } else {
            p.within(self.extent).then_some(*p)
        }
    }

    /// Image of `p` inside the storage box: `p` itself when it is already
    /// there, otherwise (on a torus) the first periodic image that is, local
    /// cells taking precedence.
    pub fn resolve(&self, p: &IntPoint<D>) -> Option<IntPoint<D>> {
        if self.local.contains(p) {
            return Some(*p);
        }
        if !self.toroidal {
            return self.halo.contains(p).then_some(*p);
        }
        let w = p.wrap(self.extent);
        if self.local.contains(&w) {
            return Some(w);
        }
        if self.halo.contains(p) {
            return Some(*p);
        }
        periodic_shifts(self.extent, true)
            .into_iter()
            .map(|s| w.offset(s))
            .find(|q| self.halo.contains(q))
    }

    pub fn in_local(&self, p: &IntPoint<D>) -> bool {
        self.canonical(p).is_some_and(|q| self.local.contains(&q))
    }

    pub fn in_private(&self, p: &IntPoint<D>) -> bool {
        self.canonical(p).is_some_and(|q| self.private.contains(&q))
    }

    pub fn in_shared(&self, p: &IntPoint<D>) -> bool {
        self.in_local(p) && !self.in_private(p)
    }

    pub fn in_halo(&self, p: &IntPoint<D>) -> bool {
        !self.in_local(p) && self.resolve(p).is_some()
    }

    pub fn in_local_and_halo(&self, p: &IntPoint<D>) -> bool {
        self.resolve(p).is_some()
    }

    /// `resolve(p) - origin + aoi`.
    pub fn to_local_point(&self, p: &IntPoint<D>) -> Option<IntPoint<D>> {
        self.resolve(p).map(|q| q - self.halo.lo)
    }

    /// Owned cell addressed by `p`, if any.
    pub fn owned(&self, p: &IntPoint<D>) -> Option<IntPoint<D>> {
        self.canonical(p).filter(|q| self.local.contains(q))
    }
}
