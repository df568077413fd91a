//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: collectives call
//! `.wait()` before they trust that a buffer has arrived, and always drain
//! their send handles before returning, even on error.
//!
//! Ordering contract shared by every backend: messages between one
//! `(source, destination, tag)` triple are delivered in the order they were
//! sent. Collectives rely on this to reuse a tag across epochs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Non-blocking point-to-point interface every backend implements.
pub trait Communicator: Clone + Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This process's rank.
    fn rank(&self) -> usize;
    /// Number of ranks.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Block until a message with `tag` arrives from any rank.
    /// Returns `None` when the backend cannot deliver one (e.g. [`NoComm`]).
    fn recv_any(&self, tag: u16) -> Option<(usize, Vec<u8>)>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self);

    /// `true` only for the serial no-op backend.
    fn is_no_comm(&self) -> bool {
        false
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Typed message tag. Fields and partitions own disjoint tag blocks so that
/// independent collectives never match each other's messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// The `k`-th tag of the block starting at `self`.
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Failure of a point-to-point or collective transfer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("communication with rank {neighbor} failed: {reason}")]
pub struct CommError {
    pub neighbor: usize,
    pub reason: String,
}

impl CommError {
    pub fn new(neighbor: usize, reason: impl Into<String>) -> Self {
        CommError {
            neighbor,
            reason: reason.into(),
        }
    }
}

// --- NoComm: single rank, nothing on the wire ---

/// Compile-time no-op comm for pure serial use. Collectives in this crate
/// route self-messages locally, so a one-rank field never touches it.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}
    fn recv_any(&self, _tag: u16) -> Option<(usize, Vec<u8>)> {
        None
    }
    fn barrier(&self) {}
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- LocalComm: ranks as threads of one process ---

/// Mailbox shared by every rank of one in-process world.
#[derive(Debug)]
struct Hub {
    size: usize,
    /// `(dst, tag) -> [(src, payload)]` in arrival order.
    mail: Mutex<HashMap<(usize, u16), VecDeque<(usize, Bytes)>>>,
    arrived: Condvar,
    barrier: std::sync::Barrier,
}

/// In-process communicator: each rank is a thread holding one `LocalComm`.
///
/// Sends are buffered (never block); receives block on [`Wait::wait`]. The
/// world is owned by the handles, so independent worlds can run side by
/// side in one test binary.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    hub: Arc<Hub>,
}

impl LocalComm {
    /// One communicator per rank of a fresh `size`-rank world.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let hub = Arc::new(Hub {
            size,
            mail: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
            barrier: std::sync::Barrier::new(size),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                hub: hub.clone(),
            })
            .collect()
    }

    /// Run `f` once per rank on scoped threads and collect the results by rank.
    /// A panic on any rank is re-raised on the caller.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let comms = Self::world(size);
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| s.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// Pending receive on a [`LocalComm`]; blocks in `wait`.
#[derive(Debug)]
pub struct LocalRecv {
    hub: Arc<Hub>,
    me: usize,
    peer: usize,
    tag: u16,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let mut mail = self.hub.mail.lock();
        loop {
            if let Some(queue) = mail.get_mut(&(self.me, self.tag)) {
                if let Some(pos) = queue.iter().position(|(src, _)| *src == self.peer) {
                    return queue.remove(pos).map(|(_, bytes)| bytes.to_vec());
                }
            }
            self.hub.arrived.wait(&mut mail);
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.hub.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let mut mail = self.hub.mail.lock();
        mail.entry((peer, tag))
            .or_default()
            .push_back((self.rank, Bytes::copy_from_slice(buf)));
        self.hub.arrived.notify_all();
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalRecv {
        LocalRecv {
            hub: self.hub.clone(),
            me: self.rank,
            peer,
            tag,
        }
    }

    fn recv_any(&self, tag: u16) -> Option<(usize, Vec<u8>)> {
        let mut mail = self.hub.mail.lock();
        loop {
            if let Some((src, bytes)) = mail.get_mut(&(self.rank, tag)).and_then(VecDeque::pop_front) {
                return Some((src, bytes.to_vec()));
            }
            self.hub.arrived.wait(&mut mail);
        }
    }

    fn barrier(&self) {
        self.hub.barrier.wait();
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Threading;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// Handle-free view of `MPI_COMM_WORLD`; every call re-derives the world
    /// communicator, so the value is `Clone + Send + Sync`.
    #[derive(Clone, Debug)]
    pub struct MpiComm {
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialize MPI with `MPI_THREAD_MULTIPLE` (remote-read service
        /// threads receive concurrently with the main thread). Keep the
        /// returned universe alive until the program is done with MPI.
        pub fn init() -> Result<(Universe, Self), CommError> {
            let (universe, threading) = mpi::initialize_with_threading(Threading::Multiple)
                .ok_or_else(|| CommError::new(0, "MPI was already initialized"))?;
            if threading != Threading::Multiple {
                log::warn!("MPI provides {threading:?}; remote reads need Multiple");
            }
            Ok((universe, Self::attach()))
        }

        /// Use an MPI environment initialized elsewhere.
        pub fn attach() -> Self {
            let world = SimpleCommunicator::world();
            Self {
                rank: world.rank() as usize,
                size: world.size() as usize,
            }
        }
    }

    /// Immediate send over a leaked copy of the payload, reclaimed once the
    /// request completes.
    pub struct MpiSend {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    impl Drop for MpiSend {
        fn drop(&mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
                // SAFETY: `buf` came from `Box::leak` in `isend` and the only
                // borrow of it was held by `req`, which has completed.
                unsafe { drop(Box::from_raw(self.buf)) };
            }
        }
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            drop(self);
            None
        }
    }

    /// Receive posted lazily: the matching blocking receive runs in `wait`.
    /// Sends are immediate, so posting late cannot deadlock.
    pub struct MpiRecv {
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let world = SimpleCommunicator::world();
            let (data, _status) = world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let owned: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = owned;
            // SAFETY: `ptr` stays valid until `MpiSend` frees it after the request completes.
            let data: &'static [u8] = unsafe { &*ptr };
            let world = SimpleCommunicator::world();
            let req = world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiSend {
                req: Some(req),
                buf: ptr,
            }
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv {
            MpiRecv {
                peer: peer as i32,
                tag: tag as i32,
            }
        }

        fn recv_any(&self, tag: u16) -> Option<(usize, Vec<u8>)> {
            let world = SimpleCommunicator::world();
            let (data, status) = world.any_process().receive_vec_with_tag::<u8>(tag as i32);
            Some((status.source_rank() as usize, data))
        }

        fn barrier(&self) {
            SimpleCommunicator::world().barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
