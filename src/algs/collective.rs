//! Collective patterns built from `isend`/`irecv`.
//!
//! Every function here follows the same discipline:
//! 1. post all receives,
//! 2. post all sends,
//! 3. wait for all receives, remembering the first failure but never
//!    returning early,
//! 4. drain every send handle,
//! 5. return the error or the result.
//!
//! Messages addressed to the calling rank are routed locally and never reach
//! the communicator, so one-rank worlds (including [`NoComm`]) work with
//! toroidal self-neighbours.
//!
//! [`NoComm`]: crate::algs::communicator::NoComm

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::algs::communicator::{CommError, CommTag, Communicator, Wait};
use crate::algs::wire;

fn wait_all<C: Communicator>(
    recvs: Vec<(usize, C::RecvHandle)>,
    sends: Vec<C::SendHandle>,
) -> Result<BTreeMap<usize, Vec<u8>>, CommError> {
    // 3) wait for all recvs (but do not early-return)
    let mut out = BTreeMap::new();
    let mut maybe_err = None;
    for (peer, h) in recvs {
        match h.wait() {
            Some(data) => {
                out.insert(peer, data);
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(CommError::new(peer, "receive completed without data"));
            }
            None => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in sends {
        let _ = send.wait();
    }

    // 5) return error or success
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Neighbour all-to-all-v: send `sends[peer]` to each key and receive one
/// message from every rank in `recv_from`.
pub fn neighbor_exchange<C: Communicator>(
    comm: &C,
    tag: CommTag,
    mut sends: BTreeMap<usize, Vec<u8>>,
    recv_from: &BTreeSet<usize>,
) -> Result<BTreeMap<usize, Vec<u8>>, CommError> {
    let me = comm.rank();

    // 1) post all receives
    let recvs: Vec<_> = recv_from
        .iter()
        .filter(|&&p| p != me)
        .map(|&p| (p, comm.irecv(p, tag.as_u16())))
        .collect();

    // 2) post all sends; the self-message is kept back
    let own = sends.remove(&me);
    let pending: Vec<_> = sends
        .iter()
        .map(|(&p, buf)| comm.isend(p, tag.as_u16(), buf))
        .collect();

    let mut out = wait_all::<C>(recvs, pending)?;
    if recv_from.contains(&me) {
        out.insert(me, own.unwrap_or_default());
    }
    Ok(out)
}

/// Gather one payload from every rank in `members` to `root`.
/// Returns `Some(rank -> payload)` on the root and `None` elsewhere.
pub fn gather<C: Communicator>(
    comm: &C,
    tag: CommTag,
    root: usize,
    members: &[usize],
    payload: Vec<u8>,
) -> Result<Option<BTreeMap<usize, Vec<u8>>>, CommError> {
    let me = comm.rank();
    if me != root {
        let send = comm.isend(root, tag.as_u16(), &payload);
        let _ = send.wait();
        return Ok(None);
    }
    let recvs: Vec<_> = members
        .iter()
        .filter(|&&p| p != me)
        .map(|&p| (p, comm.irecv(p, tag.as_u16())))
        .collect();
    let mut out = wait_all::<C>(recvs, Vec::new())?;
    out.insert(me, payload);
    Ok(Some(out))
}

/// Scatter per-member payloads from `root`. Only the root passes `Some`.
/// A member missing from the root's map receives an empty payload and the
/// root reports the omission after every send has drained.
pub fn scatter<C: Communicator>(
    comm: &C,
    tag: CommTag,
    root: usize,
    members: &[usize],
    payloads: Option<BTreeMap<usize, Vec<u8>>>,
) -> Result<Vec<u8>, CommError> {
    let me = comm.rank();
    if me != root {
        return comm
            .irecv(root, tag.as_u16())
            .wait()
            .ok_or_else(|| CommError::new(root, "scatter root sent nothing"));
    }
    let mut payloads = payloads.unwrap_or_default();
    let mut maybe_err = None;
    let mut pending = Vec::with_capacity(members.len());
    for &p in members.iter().filter(|&&p| p != me) {
        let buf = match payloads.remove(&p) {
            Some(buf) => buf,
            None => {
                maybe_err.get_or_insert_with(|| CommError::new(p, "no scatter payload for member"));
                Vec::new()
            }
        };
        pending.push(comm.isend(p, tag.as_u16(), &buf));
    }
    for send in pending {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }
    Ok(payloads.remove(&me).unwrap_or_default())
}

/// Every rank contributes one payload; every rank receives all of them,
/// indexed by rank.
pub fn all_gather<C: Communicator>(
    comm: &C,
    tag: CommTag,
    payload: Vec<u8>,
) -> Result<Vec<Vec<u8>>, CommError> {
    let me = comm.rank();
    let n = comm.size();
    let recvs: Vec<_> = (0..n)
        .filter(|&p| p != me)
        .map(|p| (p, comm.irecv(p, tag.as_u16())))
        .collect();
    let pending: Vec<_> = (0..n)
        .filter(|&p| p != me)
        .map(|p| comm.isend(p, tag.as_u16(), &payload))
        .collect();
    let mut by_rank = wait_all::<C>(recvs, pending)?;
    by_rank.insert(me, payload);
    Ok(by_rank.into_values().collect())
}

/// [`all_gather`] of a serde value.
pub fn all_gather_serde<C, T>(comm: &C, tag: CommTag, value: &T) -> Result<Vec<T>, CommError>
where
    C: Communicator,
    T: Serialize + DeserializeOwned,
{
    let bytes = wire::encode(comm.rank(), value)?;
    all_gather(comm, tag, bytes)?
        .iter()
        .enumerate()
        .map(|(rank, b)| wire::decode(rank, b))
        .collect()
}

/// [`gather`] of a serde value.
pub fn gather_serde<C, T>(
    comm: &C,
    tag: CommTag,
    root: usize,
    members: &[usize],
    value: &T,
) -> Result<Option<BTreeMap<usize, T>>, CommError>
where
    C: Communicator,
    T: Serialize + DeserializeOwned,
{
    let bytes = wire::encode(root, value)?;
    match gather(comm, tag, root, members, bytes)? {
        None => Ok(None),
        Some(map) => map
            .into_iter()
            .map(|(rank, b)| wire::decode(rank, &b).map(|v| (rank, v)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Some),
    }
}
