//! Halo synchronisation by packed neighbour all-to-all.
//!
//! Built once per decomposition: every window this rank owns becomes a
//! receive fragment, every window it feeds on a neighbour becomes a send
//! fragment, each backed by a [`Subarray`] over the local storage. A sync
//! packs all fragments bound for one peer into one message, runs one
//! neighbour exchange per pass and scatters the replies through the receive
//! views. Faces travel in the first pass and edges/corners in the second, so
//! a corner sees the same epoch as the faces around it.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::algs::collective::neighbor_exchange;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire;
use crate::data::storage::GridStorage;
use crate::data::subarray::Subarray;
use crate::field::FieldValue;
use crate::field::ghost::{self, WindowLayout};
use crate::halo_error::HaloError;
use crate::partitioning::{Decomposition, PartitionError};

#[derive(Clone, Debug, Default)]
struct Pass {
    /// Per peer, the views to pack, in the order the peer unpacks them.
    sends: BTreeMap<usize, Vec<Subarray>>,
    /// Per peer, the views to fill, in the order the peer packs them.
    recvs: BTreeMap<usize, Vec<Subarray>>,
}

#[derive(Clone, Debug)]
pub struct StructuredExchanger {
    layout: WindowLayout,
    passes: Vec<Pass>,
    tag: CommTag,
}

/// Statistics of one sync, for logging and tests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub messages: usize,
    pub values_sent: usize,
    pub values_received: usize,
}

impl StructuredExchanger {
    pub fn build<const D: usize>(
        dec: &Decomposition<D>,
        me: usize,
        corners: bool,
        tag: CommTag,
    ) -> Result<Self, PartitionError> {
        let layout = ghost::choose_layout(dec);
        let frame = dec.rect(me)?.resize(dec.config().aoi);
        let mut passes = vec![Pass::default(), Pass::default()];

        for w in ghost::windows_of(dec, layout, me)? {
            if w.pass == 1 && !corners {
                continue;
            }
            passes[w.pass]
                .recvs
                .entry(w.source)
                .or_default()
                .push(Subarray::new(&frame, &w.region));
        }
        for (owner, _, w) in ghost::fed_by(dec, layout, me, ghost::window_peers(dec, me)?)? {
            if w.pass == 1 && !corners {
                continue;
            }
            passes[w.pass]
                .sends
                .entry(owner)
                .or_default()
                .push(Subarray::new(&frame, &w.source_region));
        }
        log::debug!(
            "rank {me}: structured exchanger ({layout:?}), peers {:?}",
            passes.iter().flat_map(|p| p.recvs.keys()).collect::<BTreeSet<_>>()
        );
        Ok(StructuredExchanger { layout, passes, tag })
    }

    pub fn layout(&self) -> WindowLayout {
        self.layout
    }

    /// Passes that move data on this rank. Empty passes still run so that
    /// pass tags line up across ranks.
    pub fn num_passes(&self) -> usize {
        self.passes
            .iter()
            .filter(|p| !p.sends.is_empty() || !p.recvs.is_empty())
            .count()
    }

    /// Collective over the neighbourhood. The storage lock is only held
    /// while packing and unpacking, never across the exchange itself.
    pub fn exchange<T, C, S, const D: usize>(&self, comm: &C, storage: &RwLock<S>) -> Result<SyncStats, HaloError>
    where
        T: FieldValue,
        C: Communicator,
        S: GridStorage<T, D>,
    {
        let mut stats = SyncStats::default();
        for (k, pass) in self.passes.iter().enumerate() {
            // 1) pack one buffer per peer
            let mut sends = BTreeMap::new();
            {
                let storage = storage.read();
                for (&peer, views) in &pass.sends {
                    let mut vals: Vec<T> = Vec::new();
                    for v in views {
                        v.pack_into(storage.as_slice(), &mut vals);
                    }
                    stats.values_sent += vals.len();
                    sends.insert(peer, wire::encode(peer, &vals)?);
                }
            }
            stats.messages += sends.len();
            let recv_from: BTreeSet<usize> = pass.recvs.keys().copied().collect();

            // 2) exchange
            let replies = neighbor_exchange(comm, self.tag.offset(k as u16), sends, &recv_from)?;

            // 3) unpack into the halo
            let mut storage = storage.write();
            for (peer, bytes) in replies {
                let Some(views) = pass.recvs.get(&peer) else {
                    continue;
                };
                let vals: Vec<T> = wire::decode(peer, &bytes)?;
                let expected: usize = views.iter().map(Subarray::len).sum();
                if vals.len() != expected {
                    return Err(HaloError::ShapeMismatch {
                        expected: format!("{expected} halo values from rank {peer}"),
                        found: vals.len().to_string(),
                    });
                }
                let mut at = 0;
                for v in views {
                    v.unpack(storage.as_mut_slice(), &vals[at..at + v.len()])?;
                    at += v.len();
                }
                stats.values_received += vals.len();
            }
        }
        Ok(stats)
    }
}
