//! One-sided window epochs over point-to-point messages.
//!
//! Each rank exposes a set of windows (flat element buffers). Between two
//! fences any rank may `put` into a peer's window; the put is issued
//! immediately as a message (eager, unbatched). `fence` is collective over
//! the window group: it exchanges how many puts each rank issued to each
//! peer, applies exactly that many incoming puts, and only then returns.
//! Reads of the local windows between fences may observe the previous
//! epoch's contents.
//!
//! Puts to self are applied at once; remote puts become visible at the
//! fence.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::algs::communicator::{CommError, CommTag, Communicator, Wait};
use crate::algs::wire::{self, WireCount, WirePut, cast_slice};

/// Local memory and outstanding traffic of one window group.
pub struct RmaWindows<T, C: Communicator> {
    comm: C,
    /// `sizes` tag carries per-epoch put counts, `data` tag carries puts.
    sizes: CommTag,
    data: CommTag,
    windows: Vec<Vec<T>>,
    /// Ranks that may put to us or receive our puts.
    group: BTreeSet<usize>,
    issued: BTreeMap<usize, usize>,
    pending: Vec<C::SendHandle>,
}

impl<T, C> RmaWindows<T, C>
where
    T: Clone + Serialize + DeserializeOwned,
    C: Communicator,
{
    /// Expose one window per entry of `lens`, each filled with `fill`.
    /// `group` must be symmetric across ranks: if A lists B then B lists A.
    pub fn new(
        comm: C,
        tag: CommTag,
        lens: &[usize],
        fill: T,
        group: BTreeSet<usize>,
    ) -> Self {
        let me = comm.rank();
        RmaWindows {
            sizes: tag,
            data: tag.offset(1),
            windows: lens.iter().map(|&n| vec![fill.clone(); n]).collect(),
            group: group.into_iter().filter(|&p| p != me).collect(),
            issued: BTreeMap::new(),
            pending: Vec::new(),
            comm,
        }
    }

    pub fn window(&self, id: usize) -> Option<&[T]> {
        self.windows.get(id).map(Vec::as_slice)
    }

    pub fn num_windows(&self) -> usize {
        self.windows.len()
    }

    /// Write `values` into window `window` of `target` starting at `offset`.
    pub fn put(
        &mut self,
        target: usize,
        window: usize,
        offset: usize,
        values: &[T],
    ) -> Result<(), CommError> {
        if target == self.comm.rank() {
            return self.apply(target, window, offset, values.to_vec());
        }
        if !self.group.contains(&target) {
            return Err(CommError::new(target, "put target is outside the window group"));
        }
        let msg = wire::encode_put(target, window, offset, values)?;
        log::trace!(
            "rank {} put {} values -> rank {target} window {window} @ {offset}",
            self.comm.rank(),
            values.len()
        );
        self.pending.push(self.comm.isend(target, self.data.as_u16(), &msg));
        *self.issued.entry(target).or_default() += 1;
        Ok(())
    }

    fn apply(
        &mut self,
        source: usize,
        window: usize,
        offset: usize,
        values: Vec<T>,
    ) -> Result<(), CommError> {
        let win = self
            .windows
            .get_mut(window)
            .ok_or_else(|| CommError::new(source, format!("no window {window}")))?;
        let end = offset + values.len();
        let cap = win.len();
        let dst = win.get_mut(offset..end).ok_or_else(|| {
            CommError::new(
                source,
                format!("put [{offset}, {end}) exceeds window {window} of {cap}"),
            )
        })?;
        dst.clone_from_slice(&values);
        Ok(())
    }

    /// Close the epoch: after this returns every put issued to this rank
    /// before the matching `fence` on its origin has been applied.
    /// Returns the number of remote puts applied.
    pub fn fence(&mut self) -> Result<usize, CommError> {
        let sizes = self.sizes.as_u16();
        let data = self.data.as_u16();

        // 1) announce how many puts each peer should expect
        let count_recvs: Vec<_> = self
            .group
            .iter()
            .map(|&p| (p, self.comm.irecv(p, sizes)))
            .collect();
        let mut count_sends = Vec::with_capacity(self.group.len());
        for &p in &self.group {
            let cnt = WireCount::new(self.issued.get(&p).copied().unwrap_or(0));
            count_sends.push(self.comm.isend(p, sizes, cast_slice(std::slice::from_ref(&cnt))));
        }

        // 2) read the counts (no early return)
        let mut expected = Vec::with_capacity(count_recvs.len());
        let mut maybe_err = None;
        for (p, h) in count_recvs {
            match h.wait().map(|d| WireCount::decode(p, &d)) {
                Some(Ok(n)) => expected.push((p, n)),
                Some(Err(e)) => {
                    maybe_err.get_or_insert(e);
                }
                None => {
                    maybe_err.get_or_insert(CommError::new(p, "missing put count"));
                }
            }
        }

        // 3) drain exactly that many puts per peer and apply them
        let mut applied = 0;
        for (p, n) in expected {
            for _ in 0..n {
                let Some(msg) = self.comm.irecv(p, data).wait() else {
                    maybe_err.get_or_insert(CommError::new(p, "missing put payload"));
                    continue;
                };
                let decoded = WirePut::split(p, &msg).and_then(|(hdr, body)| {
                    let vals: Vec<T> = wire::decode(p, body)?;
                    if vals.len() != hdr.count() {
                        return Err(CommError::new(p, "put count disagrees with payload"));
                    }
                    Ok((hdr, vals))
                });
                match decoded.and_then(|(hdr, vals)| self.apply(p, hdr.window(), hdr.offset(), vals)) {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        maybe_err.get_or_insert(e);
                    }
                }
            }
        }

        // 4) always drain every send handle
        for s in count_sends.into_iter().chain(self.pending.drain(..)) {
            let _ = s.wait();
        }
        self.issued.clear();

        match maybe_err {
            Some(e) => Err(e),
            None => Ok(applied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};

    #[test]
    fn puts_land_after_fence() {
        let out = LocalComm::run(2, |comm| {
            let me = comm.rank();
            let other = 1 - me;
            let mut w = RmaWindows::new(comm, CommTag::new(0x300), &[4, 2], 0i32, BTreeSet::from([other]));
            w.put(other, 0, 1, &[me as i32 + 10, me as i32 + 20]).unwrap();
            w.put(other, 1, 0, &[-1]).unwrap();
            let applied = w.fence().unwrap();
            (applied, w.window(0).unwrap().to_vec(), w.window(1).unwrap().to_vec())
        });
        assert_eq!(out[0], (2, vec![0, 11, 21, 0], vec![-1, 0]));
        assert_eq!(out[1], (2, vec![0, 10, 20, 0], vec![-1, 0]));
    }

    #[test]
    fn later_epoch_puts_wait_for_their_fence() {
        let out = LocalComm::run(2, |comm| {
            let me = comm.rank();
            let other = 1 - me;
            let mut w = RmaWindows::new(comm, CommTag::new(0x310), &[1], 0u8, BTreeSet::from([other]));
            w.put(other, 0, 0, &[1]).unwrap();
            w.fence().unwrap();
            let first = w.window(0).unwrap()[0];
            w.put(other, 0, 0, &[2]).unwrap();
            w.fence().unwrap();
            (first, w.window(0).unwrap()[0])
        });
        assert_eq!(out, vec![(1, 2), (1, 2)]);
    }

    #[test]
    fn self_put_and_bounds() {
        let mut w = RmaWindows::new(NoComm, CommTag::new(0x320), &[2], 0u8, BTreeSet::new());
        w.put(0, 0, 1, &[5]).unwrap();
        assert_eq!(w.window(0).unwrap(), &[0, 5]);
        let err = w.put(0, 0, 1, &[5, 6]).unwrap_err();
        assert_eq!(err.reason, "put [1, 3) exceeds window 0 of 2");
        assert!(w.put(0, 0, 2, &[5]).is_err());
        assert!(w.put(3, 0, 0, &[5]).is_err());
        assert_eq!(w.fence().unwrap(), 0);
    }
}
