//! Peer discovery without global reductions.
//!
//! [`dynamic_handshake`] answers: given the set of ranks this rank will
//! send to, which ranks will send to *me*? The NBX-style protocol posts a
//! synchronous-mode zero-byte send to every known peer, then drains probes
//! until a [`Signal`] (a poll-checked barrier replacement) reports that all
//! ranks have finished sending. Synchronous-mode completion implies the
//! message was matched, so once the signal fires a final drain cannot miss
//! a source.

use super::{Communicator, PollWait, Wait, TAG_HANDSHAKE, TAG_SIGNAL_DOWN, TAG_SIGNAL_UP};
use std::collections::BTreeSet;

/// A global flag that becomes set only after every rank has called
/// [`Signal::start`]. Implemented as the all-to-one-to-all chain: members
/// report to rank 0, rank 0 releases everyone. `check` never blocks.
pub struct Signal<'a, C: Communicator> {
    comm: &'a C,
    state: SignalState<C>,
}

enum SignalState<C: Communicator> {
    /// Rank 0 collecting arrival messages.
    Collecting {
        pending: Vec<C::RecvHandle>,
        arrived: usize,
    },
    /// Non-root waiting for the release message.
    Waiting(C::RecvHandle),
    Done,
}

impl<'a, C: Communicator> Signal<'a, C> {
    /// Start this rank's participation. Call once per rank.
    pub fn start(comm: &'a C) -> Self {
        let state = if comm.rank() == 0 {
            let pending = (1..comm.size())
                .map(|peer| comm.irecv(peer, TAG_SIGNAL_UP, 0))
                .collect();
            SignalState::Collecting { pending, arrived: 0 }
        } else {
            let s = comm.isend(0, TAG_SIGNAL_UP, &[]);
            let _ = s.wait();
            SignalState::Waiting(comm.irecv(0, TAG_SIGNAL_DOWN, 0))
        };
        Self { comm, state }
    }

    /// Poll for completion; returns true once all ranks have started.
    pub fn check(&mut self) -> bool {
        let ready = match &mut self.state {
            SignalState::Done => return true,
            SignalState::Collecting { pending, arrived } => {
                while *arrived < pending.len() && pending[*arrived].poll() {
                    *arrived += 1;
                }
                *arrived == pending.len()
            }
            SignalState::Waiting(h) => h.poll(),
        };
        if !ready {
            return false;
        }
        match std::mem::replace(&mut self.state, SignalState::Done) {
            SignalState::Collecting { pending, .. } => {
                for h in pending {
                    let _ = h.wait();
                }
                // Release everyone.
                let mut sends = Vec::with_capacity(self.comm.size().saturating_sub(1));
                for peer in 1..self.comm.size() {
                    sends.push(self.comm.isend(peer, TAG_SIGNAL_DOWN, &[]));
                }
                for s in sends {
                    let _ = s.wait();
                }
            }
            SignalState::Waiting(h) => {
                let _ = h.wait();
            }
            SignalState::Done => {}
        }
        true
    }
}

/// Given the ranks this rank sends to, discover the ranks that send to it.
///
/// Collective over `comm`. Returns the sorted set of source ranks.
pub fn dynamic_handshake<C: Communicator>(comm: &C, peers: &[usize]) -> Vec<usize> {
    let mut sends = Vec::with_capacity(peers.len());
    for &peer in peers {
        sends.push(comm.issend(peer, TAG_HANDSHAKE, &[]));
    }
    // Synchronous-mode completion: every message is matched before this
    // rank enters the signal.
    let mut drain = |sources: &mut BTreeSet<usize>| {
        while let Some((src, _len)) = comm.iprobe(TAG_HANDSHAKE) {
            let _ = comm.irecv(src, TAG_HANDSHAKE, 0).wait();
            sources.insert(src);
        }
    };
    let mut sources = BTreeSet::new();
    // Matching our own sends requires receiving while waiting, so poll the
    // sends and the probe queue together.
    let mut pending = sends;
    while !pending.is_empty() {
        drain(&mut sources);
        pending.retain_mut(|s| !s.poll());
        if !pending.is_empty() {
            std::thread::yield_now();
        }
    }
    let mut signal = Signal::start(comm);
    while !signal.check() {
        drain(&mut sources);
        std::thread::yield_now();
    }
    drain(&mut sources);
    sources.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalUniverse;

    #[test]
    fn handshake_discovers_exact_sources() {
        // rank 0 -> {1, 2}, rank 1 -> {2}, rank 2 -> {} ;
        // expected incoming: 0: {}, 1: {0}, 2: {0, 1}.
        let sends = vec![vec![1usize, 2], vec![2], vec![]];
        let comms = LocalUniverse::comms(3);
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, c)| {
                let peers = sends[rank].clone();
                std::thread::spawn(move || dynamic_handshake(&c, &peers))
            })
            .collect();
        let got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(got[0], Vec::<usize>::new());
        assert_eq!(got[1], vec![0]);
        assert_eq!(got[2], vec![0, 1]);
    }
}
