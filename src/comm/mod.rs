//! Communication abstraction for in-process (thread mailbox) and
//! inter-process (MPI) message passing.
//!
//! Wire format conventions for every higher-level protocol in this crate:
//! - payloads are flat slices of `bytemuck::Pod` records (`#[repr(C)]`,
//!   fixed width, native little-endian on the homogeneous clusters this
//!   library targets);
//! - `u16` tags above [`RESERVED_TAG_BASE`] belong to internal protocols
//!   (handshake, signal, gather, halo, hash); user exchange ids must stay
//!   below that band;
//! - receivers post exact lengths; protocols that need variable sizes
//!   exchange a fixed-size count message first.

pub mod handshake;
pub mod request;
pub mod subset;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

/// Anything that can be waited on. Returns the received bytes for receive
/// handles, `None` for send handles.
pub trait Wait {
    fn wait(self) -> Option<Vec<u8>>;
}

/// Non-blocking completion test; `true` means [`Wait::wait`] will not block.
pub trait PollWait {
    fn poll(&mut self) -> bool;
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// First tag of the internal band.
pub const RESERVED_TAG_BASE: u16 = 0xFF00;
/// Dynamic handshake probe tag.
pub const TAG_HANDSHAKE: u16 = RESERVED_TAG_BASE;
/// Signal (non-blocking barrier replacement) member-to-root tag.
pub const TAG_SIGNAL_UP: u16 = RESERVED_TAG_BASE + 1;
/// Signal root-to-member release tag.
pub const TAG_SIGNAL_DOWN: u16 = RESERVED_TAG_BASE + 2;
/// Default all-gather length phase tag.
pub const TAG_GATHER_LEN: u16 = RESERVED_TAG_BASE + 3;
/// Default all-gather payload phase tag.
pub const TAG_GATHER_DATA: u16 = RESERVED_TAG_BASE + 4;
/// Subset-communicator chain barrier tag.
pub const TAG_SUBSET_BARRIER: u16 = RESERVED_TAG_BASE + 5;
/// Partition halo exchange tag.
pub const TAG_HALO: u16 = RESERVED_TAG_BASE + 6;
/// Bounding-box hash construction and retrieval tags.
pub const TAG_HASH_COUNT: u16 = RESERVED_TAG_BASE + 7;
pub const TAG_HASH_DATA: u16 = RESERVED_TAG_BASE + 8;
/// Overlap-detection protocol tags (metadata, counts, rows share the
/// m-grid-id tag; these cover the pair bootstrap).
pub const TAG_PAIR_COUNT: u16 = RESERVED_TAG_BASE + 9;
pub const TAG_PAIR_DATA: u16 = RESERVED_TAG_BASE + 10;

/// Non-blocking communication interface (minimal by design).
///
/// Implementors provide asynchronous point-to-point operations plus a
/// barrier and an all-gather; everything else in the crate is built on
/// top of these.
pub trait Communicator: Send + Sync + 'static {
    type SendHandle: Wait + PollWait + Send + 'static;
    type RecvHandle: Wait + PollWait + Send + 'static;

    /// Post a non-blocking send. The buffer is copied; the handle must be
    /// waited to guarantee delivery started.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;

    /// Synchronous-mode variant: completion of the handle implies the peer
    /// has matched the message. Backends where ordinary sends already have
    /// that property (the in-process mailbox) keep the default.
    fn issend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.isend(peer, tag, buf)
    }

    /// Post a non-blocking receive of exactly `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: u16, len: usize) -> Self::RecvHandle;

    /// Check for an unmatched incoming message with `tag` from any source;
    /// returns `(source, length)` without consuming it.
    fn iprobe(&self, tag: u16) -> Option<(usize, usize)>;

    /// Rank of this process (0..size).
    fn rank(&self) -> usize;

    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier across all ranks.
    fn barrier(&self);

    /// Gather every rank's byte payload on every rank, indexed by rank.
    ///
    /// Default implementation is point-to-point (length phase, payload
    /// phase); backends with a native collective may override.
    fn all_gather(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let me = self.rank();
        let size = self.size();
        let my_len = (bytes.len() as u64).to_le_bytes();
        let mut len_recvs = Vec::with_capacity(size);
        let mut sends = Vec::new();
        for peer in 0..size {
            if peer != me {
                len_recvs.push((peer, self.irecv(peer, TAG_GATHER_LEN, 8)));
            }
        }
        for peer in 0..size {
            if peer != me {
                sends.push(self.isend(peer, TAG_GATHER_LEN, &my_len));
            }
        }
        let mut lens = vec![0usize; size];
        lens[me] = bytes.len();
        for (peer, h) in len_recvs {
            let raw = h.wait().expect("all_gather length phase failed");
            lens[peer] = u64::from_le_bytes(raw.try_into().expect("length record")) as usize;
        }
        let mut data_recvs = Vec::with_capacity(size);
        for peer in 0..size {
            if peer != me {
                data_recvs.push((peer, self.irecv(peer, TAG_GATHER_DATA, lens[peer])));
            }
        }
        for peer in 0..size {
            if peer != me {
                sends.push(self.isend(peer, TAG_GATHER_DATA, bytes));
            }
        }
        let mut out: Vec<Vec<u8>> = (0..size).map(|_| Vec::new()).collect();
        out[me] = bytes.to_vec();
        for (peer, h) in data_recvs {
            out[peer] = h.wait().expect("all_gather payload phase failed");
        }
        for s in sends {
            let _ = s.wait();
        }
        out
    }
}

// --- NoComm: single-rank no-op for serial unit tests ---

/// Compile-time no-op comm for pure serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl PollWait for () {
    fn poll(&mut self) -> bool {
        true
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _len: usize) {}

    fn iprobe(&self, _tag: u16) -> Option<(usize, usize)> {
        None
    }

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_gather(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        vec![bytes.to_vec()]
    }
}

// --- LocalComm: in-process mailbox universe, one thread per rank ---

type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Default)]
struct Slot {
    q: std::collections::VecDeque<Vec<u8>>,
}

struct EpochBarrier {
    arrived: usize,
    epoch: usize,
}

/// Shared state for a set of [`LocalComm`] endpoints. Scoping the mailbox
/// per universe (instead of a process-global static) keeps concurrently
/// running multi-rank tests from seeing each other's messages.
pub struct LocalUniverse {
    size: usize,
    mailboxes: Mutex<HashMap<Key, Arc<(Mutex<Slot>, Condvar)>>>,
    barrier: (Mutex<EpochBarrier>, Condvar),
}

impl LocalUniverse {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            mailboxes: Mutex::new(HashMap::new()),
            barrier: (
                Mutex::new(EpochBarrier { arrived: 0, epoch: 0 }),
                Condvar::new(),
            ),
        })
    }

    /// One endpoint per rank, ready to be moved into rank threads.
    pub fn comms(size: usize) -> Vec<LocalComm> {
        let uni = Self::new(size);
        (0..size).map(|rank| LocalComm { universe: uni.clone(), rank }).collect()
    }

    fn entry(&self, key: Key) -> Arc<(Mutex<Slot>, Condvar)> {
        let mut g = self.mailboxes.lock().expect("mailbox map poisoned");
        g.entry(key)
            .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
            .clone()
    }
}

/// In-process communicator endpoint; one per rank thread.
#[derive(Clone)]
pub struct LocalComm {
    universe: Arc<LocalUniverse>,
    rank: usize,
}

impl LocalComm {
    pub fn new(universe: Arc<LocalUniverse>, rank: usize) -> Self {
        debug_assert!(rank < universe.size);
        Self { universe, rank }
    }
}

pub struct LocalSendHandle;

impl Wait for LocalSendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl PollWait for LocalSendHandle {
    fn poll(&mut self) -> bool {
        true
    }
}

pub struct LocalRecvHandle {
    cell: Arc<(Mutex<Slot>, Condvar)>,
    want_len: usize,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let (lock, cv) = &*self.cell;
        let mut slot = lock.lock().expect("mailbox slot poisoned");
        while slot.q.is_empty() {
            slot = cv.wait(slot).expect("mailbox condvar poisoned");
        }
        let mut msg = slot.q.pop_front().expect("queue non-empty");
        msg.truncate(self.want_len.min(msg.len()));
        Some(msg)
    }
}

impl PollWait for LocalRecvHandle {
    fn poll(&mut self) -> bool {
        let (lock, _) = &*self.cell;
        !lock.lock().expect("mailbox slot poisoned").q.is_empty()
    }
}

impl Communicator for LocalComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> LocalSendHandle {
        let entry = self.universe.entry((self.rank, peer, tag));
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("mailbox slot poisoned");
            slot.q.push_back(buf.to_vec());
        }
        cv.notify_all();
        LocalSendHandle
    }

    fn irecv(&self, peer: usize, tag: u16, len: usize) -> LocalRecvHandle {
        LocalRecvHandle {
            cell: self.universe.entry((peer, self.rank, tag)),
            want_len: len,
        }
    }

    fn iprobe(&self, tag: u16) -> Option<(usize, usize)> {
        let g = self.universe.mailboxes.lock().expect("mailbox map poisoned");
        // Smallest source wins so probing order is deterministic.
        let mut found: Option<(usize, usize)> = None;
        for (&(src, dst, t), cell) in g.iter() {
            if dst != self.rank || t != tag {
                continue;
            }
            let slot = cell.0.lock().expect("mailbox slot poisoned");
            if let Some(front) = slot.q.front() {
                if found.map_or(true, |(s, _)| src < s) {
                    found = Some((src, front.len()));
                }
            }
        }
        found
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.universe.size
    }

    fn barrier(&self) {
        let (lock, cv) = &self.universe.barrier;
        let mut b = lock.lock().expect("barrier poisoned");
        let epoch = b.epoch;
        b.arrived += 1;
        if b.arrived == self.universe.size {
            b.arrived = 0;
            b.epoch += 1;
            cv.notify_all();
        } else {
            while b.epoch == epoch {
                b = cv.wait(b).expect("barrier condvar poisoned");
            }
        }
    }
}

// --- MPI backend ---

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use core::ptr::NonNull;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    /// World communicator backed by rsmpi. One instance per process.
    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let uni = mpi::initialize().expect("MPI initialization failed");
            let world = uni.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: uni,
                world,
                rank,
                size,
            }
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
    }

    unsafe impl Send for MpiSendHandle {}

    impl MpiSendHandle {
        fn release(&mut self) {
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            self.release();
            None
        }
    }

    impl PollWait for MpiSendHandle {
        fn poll(&mut self) -> bool {
            match self.req.take() {
                None => true,
                Some(r) => match r.test() {
                    Ok(_) => true,
                    Err(r) => {
                        self.req = Some(r);
                        false
                    }
                },
            }
        }
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            self.release();
        }
    }

    pub struct MpiRecvHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
        len: usize,
    }

    unsafe impl Send for MpiRecvHandle {}

    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            let ptr = self.buf.take()?;
            let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
            let mut v = Vec::from(boxed);
            v.truncate(self.len);
            Some(v)
        }
    }

    impl PollWait for MpiRecvHandle {
        fn poll(&mut self) -> bool {
            match self.req.take() {
                None => true,
                Some(r) => match r.test() {
                    Ok(_) => true,
                    Err(r) => {
                        self.req = Some(r);
                        false
                    }
                },
            }
        }
    }

    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }

    impl MpiComm {
        fn leak_copy(buf: &[u8]) -> (NonNull<[u8]>, &'static [u8]) {
            let boxed = buf.to_vec().into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            (unsafe { NonNull::new_unchecked(raw) }, unsafe { &*raw })
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            use mpi::request::StaticScope;
            let (raw, slice) = Self::leak_copy(buf);
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: Some(raw),
            }
        }

        fn issend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            use mpi::request::StaticScope;
            let (raw, slice) = Self::leak_copy(buf);
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_synchronous_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: Some(raw),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, len: usize) -> MpiRecvHandle {
            use mpi::request::StaticScope;
            let boxed = vec![0u8; len].into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice_mut: &mut [u8] = unsafe { &mut *raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice_mut, tag as i32);
            MpiRecvHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
                len,
            }
        }

        fn iprobe(&self, tag: u16) -> Option<(usize, usize)> {
            use mpi::datatype::Equivalence;
            let status = self
                .world
                .any_process()
                .immediate_probe_with_tag(tag as i32)?;
            let len = status.count(u8::equivalent_datatype()) as usize;
            Some((status.source_rank() as usize, len))
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_round_trip() {
        let tag = CommTag::new(0x10);
        let comms = LocalUniverse::comms(2);
        let msg = b"hello";
        let _s = comms[0].isend(1, tag.get(), msg);
        let h = comms[1].irecv(0, tag.get(), 5);
        assert_eq!(h.wait().unwrap(), msg);
    }

    #[test]
    fn local_fifo_order() {
        let tag = CommTag::new(0x10).offset(1);
        let comms = LocalUniverse::comms(2);
        for i in 0..10u8 {
            let _ = comms[0].isend(1, tag.get(), &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            out.push(comms[1].irecv(0, tag.get(), 1).wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn truncation_is_ok() {
        let comms = LocalUniverse::comms(2);
        let _ = comms[0].isend(1, 0x12, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(comms[1].irecv(0, 0x12, 4).wait().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn probe_reports_smallest_source() {
        let comms = LocalUniverse::comms(3);
        let _ = comms[2].isend(0, 0x13, &[9, 9]);
        let _ = comms[1].isend(0, 0x13, &[7]);
        assert_eq!(comms[0].iprobe(0x13), Some((1, 1)));
        let _ = comms[0].irecv(1, 0x13, 1).wait();
        assert_eq!(comms[0].iprobe(0x13), Some((2, 2)));
    }

    #[test]
    fn all_gather_collects_in_rank_order() {
        let comms = LocalUniverse::comms(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                std::thread::spawn(move || {
                    let mine = vec![c.rank() as u8; c.rank() + 1];
                    c.all_gather(&mine)
                })
            })
            .collect();
        for h in handles {
            let got = h.join().unwrap();
            assert_eq!(got, vec![vec![0u8], vec![1, 1], vec![2, 2, 2]]);
        }
    }
}
