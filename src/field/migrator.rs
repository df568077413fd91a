//! Hand-off of entities that cross partition boundaries.
//!
//! Entities are queued with [`Migrator::migrate`] as they leave the local
//! box and delivered by the collective [`Migrator::sync`]: after it returns,
//! every entity queued anywhere before the call is in the hands of its
//! destination. Destinations are limited to the calling rank and its
//! neighbours, so one neighbour exchange is enough.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::algs::collective::neighbor_exchange;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire;
use crate::halo_error::HaloError;
use crate::partitioning::{Decomposition, Partition};
use crate::topology::point::IntPoint;

pub struct Migrator<E, C: Communicator, const D: usize> {
    comm: C,
    tag: CommTag,
    decomp: Arc<Decomposition<D>>,
    /// Neighbours plus self.
    peers: BTreeSet<usize>,
    outbox: BTreeMap<usize, Vec<(E, IntPoint<D>)>>,
}

impl<E, C, const D: usize> Migrator<E, C, D>
where
    E: Serialize + DeserializeOwned,
    C: Communicator,
{
    /// Collective in the sense of tag allocation: create migrators in the
    /// same order on every rank.
    pub fn new(partition: &Partition<C, D>) -> Result<Self, HaloError> {
        let comm = partition.comm().clone();
        let decomp = partition.decomposition()?;
        let peers = Self::peers_of(&decomp, comm.rank())?;
        Ok(Migrator {
            tag: partition.allocate_tags()?,
            comm,
            decomp,
            peers,
            outbox: BTreeMap::new(),
        })
    }

    fn peers_of(decomp: &Decomposition<D>, me: usize) -> Result<BTreeSet<usize>, HaloError> {
        let mut peers: BTreeSet<usize> = decomp.neighbors(me)?.iter().copied().collect();
        peers.insert(me);
        Ok(peers)
    }

    /// Queue `entity` for `destination`, to arrive at `location`.
    pub fn migrate(&mut self, entity: E, destination: usize, location: IntPoint<D>) -> Result<(), HaloError> {
        if !self.peers.contains(&destination) {
            return Err(HaloError::NotANeighbor { rank: destination });
        }
        self.outbox.entry(destination).or_default().push((entity, location));
        Ok(())
    }

    /// Queue `entity` for the owner of `location`.
    pub fn migrate_to(&mut self, entity: E, location: IntPoint<D>) -> Result<usize, HaloError> {
        let owner = self.decomp.to_partition_id(&location)?;
        self.migrate(entity, owner, location)?;
        Ok(owner)
    }

    pub fn pending(&self) -> usize {
        self.outbox.values().map(Vec::len).sum()
    }

    /// Collective over the neighbourhood: deliver the queues and return what
    /// arrived, ordered by source rank then queue order.
    pub fn sync(&mut self) -> Result<Vec<(E, IntPoint<D>)>, HaloError> {
        let me = self.comm.rank();
        let mut sends = BTreeMap::new();
        for &peer in &self.peers {
            let batch = self.outbox.remove(&peer).unwrap_or_default();
            sends.insert(peer, wire::encode(peer, &batch)?);
        }
        let sent = sends.len();
        let replies = neighbor_exchange(&self.comm, self.tag, sends, &self.peers)?;
        let mut arrived = Vec::new();
        for (src, bytes) in replies {
            let batch: Vec<(E, IntPoint<D>)> = wire::decode(src, &bytes)?;
            arrived.extend(batch);
        }
        log::debug!("rank {me}: migration to {sent} peers, {} entities arrived", arrived.len());
        Ok(arrived)
    }

    /// Follow the partition to its current decomposition. Collective in the
    /// sense that every rank must reload before the next `sync`.
    ///
    /// Queued entities whose destination is no longer a peer are re-routed to
    /// the new owner of their location. Those that still have no reachable
    /// owner are handed back to the caller, who must place them again.
    pub fn reload(&mut self, partition: &Partition<C, D>) -> Result<Vec<(E, IntPoint<D>)>, HaloError> {
        let me = self.comm.rank();
        let decomp = partition.decomposition()?;
        let peers = Self::peers_of(&decomp, me)?;
        let lost: Vec<usize> = self.outbox.keys().copied().filter(|d| !peers.contains(d)).collect();
        let mut stranded = Vec::new();
        for dest in lost {
            for (entity, location) in self.outbox.remove(&dest).unwrap_or_default() {
                match decomp.to_partition_id(&location) {
                    Ok(owner) if peers.contains(&owner) => {
                        self.outbox.entry(owner).or_default().push((entity, location));
                    }
                    _ => stranded.push((entity, location)),
                }
            }
        }
        if !stranded.is_empty() {
            log::warn!(
                "rank {me}: {} queued entities lost their destination on reload",
                stranded.len()
            );
        }
        self.decomp = decomp;
        self.peers = peers;
        Ok(stranded)
    }
}

impl<E, C: Communicator, const D: usize> std::fmt::Debug for Migrator<E, C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("rank", &self.comm.rank())
            .field("peers", &self.peers)
            .field("queued", &self.outbox.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
