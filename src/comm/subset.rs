//! A communicator view restricted to a sorted subset of the parent's ranks.
//!
//! Grids and connectivity pairs live on subsets of the domain communicator.
//! Rather than splitting real communicators, collectives over a subset are
//! built point-to-point on the parent: an all-gather over the members and a
//! chain barrier through the lowest member. Every member must enter the
//! same subset operation in the same order.

use super::{Communicator, Wait, TAG_GATHER_DATA, TAG_GATHER_LEN, TAG_SUBSET_BARRIER};

/// View of `parent` restricted to `members` (sorted parent ranks).
pub struct SubsetComm<'a, C: Communicator> {
    parent: &'a C,
    members: &'a [usize],
    my_index: usize,
}

impl<'a, C: Communicator> SubsetComm<'a, C> {
    /// Returns `None` when the calling rank is not a member.
    pub fn new(parent: &'a C, members: &'a [usize]) -> Option<Self> {
        debug_assert!(members.windows(2).all(|w| w[0] < w[1]), "members must be sorted");
        let my_index = members.binary_search(&parent.rank()).ok()?;
        Some(Self {
            parent,
            members,
            my_index,
        })
    }

    #[inline]
    pub fn parent(&self) -> &'a C {
        self.parent
    }

    /// Rank within the subset.
    #[inline]
    pub fn rank(&self) -> usize {
        self.my_index
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Parent rank of a member index.
    #[inline]
    pub fn world_rank(&self, member: usize) -> usize {
        self.members[member]
    }

    /// Chain barrier: members report to the lowest member, which releases
    /// everyone. This is the all-to-one-to-all fallback pattern used where
    /// a native sub-communicator barrier is unavailable.
    pub fn barrier(&self) {
        let root = self.members[0];
        if self.my_index == 0 {
            for &m in &self.members[1..] {
                let _ = self.parent.irecv(m, TAG_SUBSET_BARRIER, 0).wait();
            }
            let mut sends = Vec::with_capacity(self.members.len() - 1);
            for &m in &self.members[1..] {
                sends.push(self.parent.isend(m, TAG_SUBSET_BARRIER, &[]));
            }
            for s in sends {
                let _ = s.wait();
            }
        } else {
            let s = self.parent.isend(root, TAG_SUBSET_BARRIER, &[]);
            let _ = self.parent.irecv(root, TAG_SUBSET_BARRIER, 0).wait();
            let _ = s.wait();
        }
    }

    /// Gather every member's payload on every member, indexed by member.
    pub fn all_gather(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let me = self.my_index;
        let n = self.members.len();
        let my_len = (bytes.len() as u64).to_le_bytes();
        let mut len_recvs = Vec::with_capacity(n);
        let mut sends = Vec::new();
        for i in 0..n {
            if i != me {
                len_recvs.push((i, self.parent.irecv(self.members[i], TAG_GATHER_LEN, 8)));
            }
        }
        for i in 0..n {
            if i != me {
                sends.push(self.parent.isend(self.members[i], TAG_GATHER_LEN, &my_len));
            }
        }
        let mut lens = vec![0usize; n];
        lens[me] = bytes.len();
        for (i, h) in len_recvs {
            let raw = h.wait().expect("subset all_gather length phase failed");
            lens[i] = u64::from_le_bytes(raw.try_into().expect("length record")) as usize;
        }
        let mut data_recvs = Vec::with_capacity(n);
        for i in 0..n {
            if i != me {
                data_recvs.push((i, self.parent.irecv(self.members[i], TAG_GATHER_DATA, lens[i])));
            }
        }
        for i in 0..n {
            if i != me {
                sends.push(self.parent.isend(self.members[i], TAG_GATHER_DATA, bytes));
            }
        }
        let mut out: Vec<Vec<u8>> = (0..n).map(|_| Vec::new()).collect();
        out[me] = bytes.to_vec();
        for (i, h) in data_recvs {
            out[i] = h.wait().expect("subset all_gather payload phase failed");
        }
        for s in sends {
            let _ = s.wait();
        }
        out
    }
}
