//! Geometry of halo transfers.
//!
//! A [`GhostWindow`] is one box of a process's halo that is filled from one
//! source process: `region` in the owner's storage frame, `source_region`
//! the same cells in the source's storage frame (they differ by a periodic
//! shift across a toroidal seam). Both exchangers derive their traffic from
//! these lists: the owner receives into `region`, the source packs
//! `source_region`. Because any rank can compute any other rank's list from
//! the shared decomposition, sender and receiver agree on fragment order
//! without negotiating.
//!
//! Two layouts are used:
//! - *direction* windows, one per neighbour direction of a process grid
//!   (faces in pass 0, edges and corners in pass 1); the neighbour comes from
//!   the closed-form grid rank formula;
//! - *overlap* windows, one per (neighbour, periodic image) pair whose region
//!   meets the halo, for layouts without a grid.

use std::collections::BTreeSet;

use crate::partitioning::{Decomposition, Direction, PartitionError, ProcessGrid};
use crate::topology::point::IntPoint;
use crate::topology::rect::{IntRect, periodic_shifts};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GhostWindow<const D: usize> {
    pub source: usize,
    pub region: IntRect<D>,
    pub source_region: IntRect<D>,
    /// 0 for faces and overlaps, 1 for edges and corners.
    pub pass: usize,
}

impl<const D: usize> GhostWindow<D> {
    /// Translation from the source frame to the owner frame.
    pub fn shift(&self) -> [i64; D] {
        std::array::from_fn(|d| self.region.lo[d] - self.source_region.lo[d])
    }

    pub fn len(&self) -> usize {
        self.region.volume()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WindowLayout {
    Direction,
    Overlap,
}

/// Halo strip of `local` on the `dir` side.
pub fn halo_strip<const D: usize>(local: &IntRect<D>, aoi: [i64; D], dir: Direction<D>) -> IntRect<D> {
    let mut r = *local;
    for d in 0..D {
        match dir.component(d) {
            -1 => {
                r.hi.0[d] = local.lo[d];
                r.lo.0[d] = local.lo[d] - aoi[d];
            }
            1 => {
                r.lo.0[d] = local.hi[d];
                r.hi.0[d] = local.hi[d] + aoi[d];
            }
            _ => {}
        }
    }
    r
}

/// Owned strip of `local` facing `dir`.
pub fn inner_strip<const D: usize>(local: &IntRect<D>, aoi: [i64; D], dir: Direction<D>) -> IntRect<D> {
    let mut r = *local;
    for d in 0..D {
        match dir.component(d) {
            -1 => r.hi.0[d] = local.lo[d] + aoi[d],
            1 => r.lo.0[d] = local.hi[d] - aoi[d],
            _ => {}
        }
    }
    r
}

/// Direction windows need a grid whose every block is at least one AOI wide,
/// so each halo strip is owned by exactly one neighbour.
pub fn choose_layout<const D: usize>(dec: &Decomposition<D>) -> WindowLayout {
    let aoi = dec.config().aoi;
    let wide_enough = dec
        .rects()
        .iter()
        .all(|r| (0..D).all(|d| r.width(d) >= aoi[d]));
    if dec.process_grid().is_some() && wide_enough {
        WindowLayout::Direction
    } else {
        WindowLayout::Overlap
    }
}

/// Windows of partition `pid`, in canonical order.
pub fn windows_of<const D: usize>(
    dec: &Decomposition<D>,
    layout: WindowLayout,
    pid: usize,
) -> Result<Vec<GhostWindow<D>>, PartitionError> {
    match (layout, dec.process_grid()) {
        (WindowLayout::Direction, Some(grid)) => direction_windows(dec, grid, pid),
        _ => overlap_windows(dec, pid),
    }
}

fn direction_windows<const D: usize>(
    dec: &Decomposition<D>,
    grid: &ProcessGrid<D>,
    pid: usize,
) -> Result<Vec<GhostWindow<D>>, PartitionError> {
    let aoi = dec.config().aoi;
    let local = dec.rect(pid)?;
    let mut out = Vec::new();
    for dir in Direction::<D>::all() {
        let Some(src) = grid.neighbor(pid, dir) else {
            continue;
        };
        let region = halo_strip(&local, aoi, dir);
        if region.is_empty() {
            continue;
        }
        out.push(GhostWindow {
            source: src,
            region,
            source_region: inner_strip(&dec.rect(src)?, aoi, dir.opposite()),
            pass: usize::from(!dir.is_face()),
        });
    }
    Ok(out)
}

fn overlap_windows<const D: usize>(dec: &Decomposition<D>, pid: usize) -> Result<Vec<GhostWindow<D>>, PartitionError> {
    let cfg = dec.config();
    let local = dec.rect(pid)?;
    let halo = local.resize(cfg.aoi);
    let mut sources: BTreeSet<usize> = dec.neighbors(pid)?.iter().copied().collect();
    if cfg.toroidal {
        sources.insert(pid);
    }
    let shifts = periodic_shifts(cfg.extent, cfg.toroidal);
    let mut out = Vec::new();
    for src in sources {
        let owned = dec.rect(src)?;
        for &s in &shifts {
            if src == pid && s.iter().all(|&v| v == 0) {
                continue;
            }
            if let Some(region) = owned.shift(s).intersection(&halo) {
                let back = s.map(|v| -v);
                out.push(GhostWindow {
                    source: src,
                    region,
                    source_region: region.shift(back),
                    pass: 0,
                });
            }
        }
    }
    Ok(out)
}

/// `(owner, window index, window)` for every window that `me` feeds, over
/// the given owners.
pub fn fed_by<const D: usize>(
    dec: &Decomposition<D>,
    layout: WindowLayout,
    me: usize,
    owners: impl IntoIterator<Item = usize>,
) -> Result<Vec<(usize, usize, GhostWindow<D>)>, PartitionError> {
    let mut out = Vec::new();
    for owner in owners {
        for (i, w) in windows_of(dec, layout, owner)?.into_iter().enumerate() {
            if w.source == me {
                out.push((owner, i, w));
            }
        }
    }
    Ok(out)
}

/// Every rank that can own a window fed by `me`: its neighbours, plus
/// itself on a torus.
pub fn window_peers<const D: usize>(dec: &Decomposition<D>, me: usize) -> Result<BTreeSet<usize>, PartitionError> {
    let mut peers: BTreeSet<usize> = dec.neighbors(me)?.iter().copied().collect();
    peers.insert(me);
    Ok(peers)
}

/// Offset of owner-frame point `p` inside window `w`'s buffer.
pub fn window_offset<const D: usize>(w: &GhostWindow<D>, p: &IntPoint<D>) -> Option<usize> {
    w.region.contains(p).then(|| w.region.flat_index(p))
}
