//! Request handles for in-flight exchange transfers.
//!
//! A [`Request`] owns the non-blocking operations posted by one `send` or
//! `receive` call plus the deferred completion work (the receive-side
//! scatter into the caller's buffer). It is consumed by `wait`; dropping a
//! request without waiting completes the transfers but skips the scatter.

use super::{Communicator, PollWait, Wait};
use crate::error::OvergridError;

type Finish<'buf> = Box<dyn FnOnce(Vec<Vec<u8>>) -> Result<(), OvergridError> + Send + 'buf>;

/// Tracks one or more outstanding non-blocking transfers.
pub struct Request<'buf, C: Communicator> {
    sends: Vec<C::SendHandle>,
    recvs: Vec<C::RecvHandle>,
    recv_peers: Vec<usize>,
    finish: Option<Finish<'buf>>,
}

impl<'buf, C: Communicator> Request<'buf, C> {
    /// A request with nothing outstanding.
    pub fn ready() -> Self {
        Self {
            sends: Vec::new(),
            recvs: Vec::new(),
            recv_peers: Vec::new(),
            finish: None,
        }
    }

    pub(crate) fn from_sends(sends: Vec<C::SendHandle>) -> Self {
        Self {
            sends,
            recvs: Vec::new(),
            recv_peers: Vec::new(),
            finish: None,
        }
    }

    pub(crate) fn from_recvs(
        recvs: Vec<C::RecvHandle>,
        recv_peers: Vec<usize>,
        finish: Finish<'buf>,
    ) -> Self {
        debug_assert_eq!(recvs.len(), recv_peers.len());
        Self {
            sends: Vec::new(),
            recvs,
            recv_peers,
            finish: Some(finish),
        }
    }

    /// True once every transfer has completed; `wait` will not block.
    pub fn poll(&mut self) -> bool {
        self.sends.iter_mut().all(|s| s.poll()) && self.recvs.iter_mut().all(|r| r.poll())
    }

    /// Complete all transfers, run the deferred scatter, release buffers.
    pub fn wait(mut self) -> Result<(), OvergridError> {
        let mut payloads = Vec::with_capacity(self.recvs.len());
        for (handle, peer) in self.recvs.drain(..).zip(self.recv_peers.drain(..)) {
            let bytes = handle.wait().ok_or(OvergridError::CommError {
                neighbor: peer,
                detail: "receive completed without data".into(),
            })?;
            payloads.push(bytes);
        }
        if let Some(finish) = self.finish.take() {
            finish(payloads)?;
        }
        for s in self.sends.drain(..) {
            let _ = s.wait();
        }
        Ok(())
    }
}

/// Complete every request, scatters included, in order.
pub fn wait_all<C: Communicator>(requests: Vec<Request<'_, C>>) -> Result<(), OvergridError> {
    for r in requests {
        r.wait()?;
    }
    Ok(())
}

/// Block until some request is complete; finish it and return its index
/// within the (shrunk) vector's original ordering. Returns `None` when the
/// vector is empty.
pub fn wait_any<C: Communicator>(
    requests: &mut Vec<Request<'_, C>>,
) -> Result<Option<usize>, OvergridError> {
    if requests.is_empty() {
        return Ok(None);
    }
    loop {
        for i in 0..requests.len() {
            if requests[i].poll() {
                let r = requests.remove(i);
                r.wait()?;
                return Ok(Some(i));
            }
        }
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Communicator as _, LocalUniverse};

    #[test]
    fn request_scatter_runs_on_wait() {
        let comms = LocalUniverse::comms(2);
        let c0 = comms[0].clone();
        let _ = c0.isend(1, 0x20, &[5u8, 6]);
        let c1 = &comms[1];
        let mut out = [0u8; 2];
        {
            let recvs = vec![c1.irecv(0, 0x20, 2)];
            let req = Request::<'_, crate::comm::LocalComm>::from_recvs(
                recvs,
                vec![0],
                Box::new(|payloads| {
                    out.copy_from_slice(&payloads[0]);
                    Ok(())
                }),
            );
            req.wait().unwrap();
        }
        assert_eq!(out, [5, 6]);
    }

    #[test]
    fn wait_any_returns_a_completed_request() {
        let comms = LocalUniverse::comms(2);
        let c0 = comms[0].clone();
        let _ = c0.isend(1, 0x21, &[1u8]);
        let c1 = &comms[1];
        let done = std::sync::Mutex::new(0u8);
        {
            let req = Request::<'_, crate::comm::LocalComm>::from_recvs(
                vec![c1.irecv(0, 0x21, 1)],
                vec![0],
                Box::new(|payloads| {
                    *done.lock().unwrap() = payloads[0][0];
                    Ok(())
                }),
            );
            let mut reqs = vec![req];
            assert_eq!(wait_any(&mut reqs).unwrap(), Some(0));
            assert!(reqs.is_empty());
            assert_eq!(wait_any(&mut reqs).unwrap(), None);
        }
        assert_eq!(*done.lock().unwrap(), 1);
    }
}
