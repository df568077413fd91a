//! Halo synchronisation by one-sided puts into ghost windows.
//!
//! Every window this rank owns is exposed as one RMA window sized to its
//! region. Every window it feeds on a neighbour becomes a *target*: when a
//! `set` lands inside the target's source region, the value is put straight
//! into the neighbour's window (a corner cell fans out to up to three
//! neighbours in 2D). `sync` is the fence; afterwards the windows are
//! mirrored into the halo cells of the local storage.

use std::collections::BTreeSet;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::rma::RmaWindows;
use crate::data::storage::GridStorage;
use crate::data::subarray::Subarray;
use crate::field::FieldValue;
use crate::field::ghost::{self, GhostWindow, WindowLayout};
use crate::field::structured::SyncStats;
use crate::halo_error::HaloError;
use crate::partitioning::{Decomposition, PartitionError};
use crate::topology::point::IntPoint;
use crate::topology::rect::IntRect;

#[derive(Clone, Debug)]
struct Target<const D: usize> {
    owner: usize,
    window: usize,
    region: GhostWindow<D>,
    /// `source_region` as a view over the local storage.
    view: Subarray,
}

pub struct RmaExchanger<T, C: Communicator, const D: usize> {
    layout: WindowLayout,
    frame: IntRect<D>,
    own: Vec<GhostWindow<D>>,
    /// `region` of each own window as a view over the local storage.
    own_views: Vec<Subarray>,
    targets: Vec<Target<D>>,
    windows: RmaWindows<T, C>,
    /// Push whole source regions at the next fence (after a rebuild or a
    /// bulk write).
    full_push: bool,
}

impl<T: FieldValue, C: Communicator, const D: usize> RmaExchanger<T, C, D> {
    pub fn build(
        comm: C,
        dec: &Decomposition<D>,
        tag: CommTag,
        fill: T,
    ) -> Result<Self, PartitionError> {
        let me = comm.rank();
        let layout = ghost::choose_layout(dec);
        let frame = dec.rect(me)?.resize(dec.config().aoi);
        let own = ghost::windows_of(dec, layout, me)?;
        let own_views = own.iter().map(|w| Subarray::new(&frame, &w.region)).collect();
        let peers = ghost::window_peers(dec, me)?;
        let targets: Vec<Target<D>> = ghost::fed_by(dec, layout, me, peers.iter().copied())?
            .into_iter()
            .map(|(owner, window, region)| Target {
                owner,
                window,
                view: Subarray::new(&frame, &region.source_region),
                region,
            })
            .collect();
        let lens: Vec<usize> = own.iter().map(GhostWindow::len).collect();
        let group: BTreeSet<usize> = own
            .iter()
            .map(|w| w.source)
            .chain(targets.iter().map(|t| t.owner))
            .collect();
        log::debug!(
            "rank {me}: rma exchanger ({layout:?}) with {} windows, {} targets",
            own.len(),
            targets.len()
        );
        Ok(RmaExchanger {
            layout,
            frame,
            own,
            own_views,
            targets,
            windows: RmaWindows::new(comm, tag, &lens, fill, group),
            full_push: true,
        })
    }

    pub fn layout(&self) -> WindowLayout {
        self.layout
    }

    pub fn num_windows(&self) -> usize {
        self.own.len()
    }

    pub fn request_full_push(&mut self) {
        self.full_push = true;
    }

    /// Eagerly forward an owned cell to every window it feeds.
    pub fn on_set(&mut self, g: &IntPoint<D>, value: &T) -> Result<usize, HaloError> {
        let mut puts = 0;
        for t in &self.targets {
            if !t.region.source_region.contains(g) {
                continue;
            }
            let at = g.offset(t.region.shift());
            let offset = t.region.region.flat_index(&at);
            self.windows
                .put(t.owner, t.window, offset, std::slice::from_ref(value))?;
            puts += 1;
        }
        Ok(puts)
    }

    /// Latest value this rank has for halo point `p` (owner frame), from the
    /// window mirror; `None` when no window covers `p`.
    pub fn read(&self, p: &IntPoint<D>) -> Option<&T> {
        self.own.iter().enumerate().find_map(|(i, w)| {
            let off = ghost::window_offset(w, p)?;
            self.windows.window(i)?.get(off)
        })
    }

    /// Fence every window, then copy them into the halo of `storage`.
    pub fn fence<S: GridStorage<T, D>>(&mut self, storage: &mut S) -> Result<SyncStats, HaloError> {
        debug_assert_eq!(storage.rect(), self.frame);
        let mut stats = SyncStats::default();
        if self.full_push {
            for t in &self.targets {
                let vals = t.view.pack(storage.as_slice());
                stats.values_sent += vals.len();
                self.windows.put(t.owner, t.window, 0, &vals)?;
            }
            self.full_push = false;
        }
        stats.messages = self.windows.fence()?;
        for (i, view) in self.own_views.iter().enumerate() {
            let vals = self.windows.window(i).ok_or_else(|| HaloError::ShapeMismatch {
                expected: format!("window {i}"),
                found: format!("{} windows", self.windows.num_windows()),
            })?;
            view.unpack(storage.as_mut_slice(), vals)?;
            stats.values_received += vals.len();
        }
        Ok(stats)
    }
}

impl<T, C: Communicator, const D: usize> std::fmt::Debug for RmaExchanger<T, C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmaExchanger")
            .field("layout", &self.layout)
            .field("windows", &self.own.len())
            .field("targets", &self.targets.len())
            .field("full_push", &self.full_push)
            .finish()
    }
}
