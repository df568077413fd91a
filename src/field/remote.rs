//! Point reads served by the owning rank.
//!
//! A structured field cannot see beyond its halo. When `get` is asked for
//! such a point it sends a [`ReadRequest`] to the owner and blocks on the
//! reply. Every field with remote reads enabled runs one service thread
//! that answers those requests from its storage under a read lock, so the
//! owner does not have to be inside a collective for the read to complete.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire;
use crate::data::storage::GridStorage;
use crate::field::FieldValue;
use crate::halo_error::HaloError;
use crate::topology::point::IntPoint;

#[derive(Debug, Serialize, Deserialize)]
enum ReadRequest {
    Read(Vec<i64>),
    Stop,
}

#[derive(Debug, Serialize, Deserialize)]
enum ReadReply<T> {
    Value(T),
    Missing(String),
}

/// Handle to the service thread of one field; stopping it is tied to drop.
pub(crate) struct RemoteReads<T, C: Communicator, const D: usize> {
    comm: C,
    request: CommTag,
    reply: CommTag,
    worker: Option<JoinHandle<()>>,
    _value: PhantomData<fn() -> T>,
}

impl<T: FieldValue, C: Communicator, const D: usize> RemoteReads<T, C, D> {
    /// Spawn the service over `storage`. Only cells of `storage`'s box
    /// shrunk by `aoi` (the owned cells) are served.
    pub fn start<S>(
        comm: C,
        request: CommTag,
        reply: CommTag,
        aoi: [i64; D],
        storage: Arc<RwLock<S>>,
    ) -> std::io::Result<Self>
    where
        S: GridStorage<T, D>,
    {
        let service = comm.clone();
        let worker = thread::Builder::new()
            .name(format!("dgrid-remote-{}-{}", comm.rank(), request.as_u16()))
            .spawn(move || serve::<T, C, S, D>(service, request, reply, aoi, storage))?;
        Ok(RemoteReads {
            comm,
            request,
            reply,
            worker: Some(worker),
            _value: PhantomData,
        })
    }

    /// Blocking read of `p` (owner frame) from `owner`.
    pub fn read(&self, owner: usize, p: &IntPoint<D>) -> Result<T, HaloError> {
        let msg = wire::encode(owner, &ReadRequest::Read(p.to_vec()))?;
        let pending = self.comm.irecv(owner, self.reply.as_u16());
        let send = self.comm.isend(owner, self.request.as_u16(), &msg);
        let bytes = pending.wait();
        let _ = send.wait();
        let bytes = bytes.ok_or_else(|| HaloError::RemoteRead {
            owner,
            reason: "no reply".into(),
        })?;
        match wire::decode::<ReadReply<T>>(owner, &bytes)? {
            ReadReply::Value(v) => Ok(v),
            ReadReply::Missing(reason) => Err(HaloError::RemoteRead { owner, reason }),
        }
    }
}

fn serve<T, C, S, const D: usize>(
    comm: C,
    request: CommTag,
    reply: CommTag,
    aoi: [i64; D],
    storage: Arc<RwLock<S>>,
) where
    T: FieldValue,
    C: Communicator,
    S: GridStorage<T, D>,
{
    let me = comm.rank();
    while let Some((src, bytes)) = comm.recv_any(request.as_u16()) {
        let point = match wire::decode::<ReadRequest>(src, &bytes) {
            Ok(ReadRequest::Stop) if src == me => break,
            Ok(ReadRequest::Stop) => continue,
            Ok(ReadRequest::Read(p)) => p,
            Err(e) => {
                log::warn!("rank {me}: dropping malformed read request: {e}");
                continue;
            }
        };
        let answer = lookup::<T, S, D>(&storage.read(), aoi, &point);
        log::trace!("rank {me}: remote read of {point:?} for rank {src}");
        match wire::encode(src, &answer) {
            Ok(msg) => {
                let _ = comm.isend(src, reply.as_u16(), &msg).wait();
            }
            Err(e) => log::warn!("rank {me}: cannot encode read reply: {e}"),
        }
    }
    log::debug!("rank {me}: remote read service on tag {:#x} stopped", request.as_u16());
}

fn lookup<T, S, const D: usize>(storage: &S, aoi: [i64; D], point: &[i64]) -> ReadReply<T>
where
    T: FieldValue,
    S: GridStorage<T, D>,
{
    let Ok(c) = <[i64; D]>::try_from(point) else {
        return ReadReply::Missing(format!("point {point:?} has the wrong dimension"));
    };
    let p = IntPoint::new(c);
    let owned = storage.rect().resize(aoi.map(|a| -a));
    if !owned.contains(&p) {
        return ReadReply::Missing(format!("{p} is not owned here ({owned})"));
    }
    match storage.global_index(&p).and_then(|i| storage.get(i)) {
        Some(v) => ReadReply::Value(v.clone()),
        None => ReadReply::Missing(format!("{p} is outside the storage")),
    }
}

impl<T, C: Communicator, const D: usize> Drop for RemoteReads<T, C, D> {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let me = self.comm.rank();
        match wire::encode(me, &ReadRequest::Stop) {
            Ok(msg) => {
                let _ = self.comm.isend(me, self.request.as_u16(), &msg).wait();
                if worker.join().is_err() {
                    log::warn!("rank {me}: remote read service panicked");
                }
            }
            Err(e) => log::warn!("rank {me}: cannot stop remote read service: {e}"),
        }
    }
}

impl<T, C: Communicator, const D: usize> std::fmt::Debug for RemoteReads<T, C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReads")
            .field("request", &self.request)
            .field("running", &self.worker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::data::storage::VecStorage;
    use crate::topology::point::Int2D;
    use crate::topology::rect::IntRect;

    #[test]
    fn owner_answers_only_owned_cells() {
        let out = LocalComm::run(2, |comm| {
            let me = comm.rank();
            // rank r owns [5r, 5r+5) x [0, 5) with a one-cell halo
            let owned = IntRect::new(Int2D::new([5 * me as i64, 0]), Int2D::new([5 * me as i64 + 5, 5]));
            let mut s = VecStorage::<i32, 2>::with_rect(owned.resize([1, 1]), -1);
            for p in owned.points() {
                let i = s.global_index(&p).unwrap();
                s.set(i, (p[0] * 10 + p[1]) as i32).unwrap();
            }
            let storage = Arc::new(RwLock::new(s));
            let svc = RemoteReads::<i32, _, 2>::start(
                comm.clone(),
                CommTag::new(0x700),
                CommTag::new(0x701),
                [1, 1],
                storage,
            )
            .unwrap();
            let other = 1 - me;
            let hit = svc.read(other, &Int2D::new([5 * other as i64 + 2, 3])).unwrap();
            let miss = svc.read(other, &Int2D::new([5 * me as i64 + 2, 3]));
            comm.barrier();
            (hit, matches!(miss, Err(HaloError::RemoteRead { .. })))
        });
        assert_eq!(out, vec![(73, true), (23, true)]);
    }
}
