//! Send and receive plans: non-blocking point-to-point transfer of donor
//! values to receiver buffers, one message per peer.

use super::maps::{RecvMap, SendMap};
use super::value::ExchangeValue;
use crate::comm::request::Request;
use crate::comm::Communicator;
use crate::error::OvergridError;

/// Precomputed send plan for one `(m, n, id)` slot.
///
/// `values` passed to [`SendPlan::send`] hold `count` components per donor
/// row, component-major: `values[c * num_donors + row]`.
#[derive(Clone, Debug)]
pub struct SendPlan<T: ExchangeValue> {
    map: SendMap,
    num_rows: usize,
    count: usize,
    tag: u16,
    _marker: std::marker::PhantomData<T>,
}

impl<T: ExchangeValue> SendPlan<T> {
    pub(crate) fn new(map: SendMap, num_rows: usize, count: usize, tag: u16) -> Self {
        Self {
            map,
            num_rows,
            count,
            tag,
            _marker: std::marker::PhantomData,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Post one `isend` per peer, packing donor values in map order.
    pub fn send<'buf, C: Communicator>(
        &self,
        comm: &C,
        values: &[T],
    ) -> Result<Request<'buf, C>, OvergridError> {
        let expected = self.count * self.num_rows;
        if values.len() != expected {
            return Err(OvergridError::ValueCountMismatch {
                expected,
                got: values.len(),
            });
        }
        let mut handles = Vec::with_capacity(self.map.sends().len());
        let mut offset = 0usize;
        for &(peer, rows) in self.map.sends() {
            let block = &self.map.order()[offset..offset + rows];
            let mut packed = Vec::with_capacity(self.count * rows);
            for c in 0..self.count {
                packed.extend(block.iter().map(|&row| values[c * self.num_rows + row]));
            }
            handles.push(comm.isend(peer, self.tag, bytemuck::cast_slice(&packed)));
            offset += rows;
        }
        Ok(Request::from_sends(handles))
    }
}

/// Precomputed receive plan for one `(m, n, id)` slot.
#[derive(Clone, Debug)]
pub struct RecvPlan<T: ExchangeValue> {
    map: RecvMap,
    num_rows: usize,
    count: usize,
    tag: u16,
    _marker: std::marker::PhantomData<T>,
}

impl<T: ExchangeValue> RecvPlan<T> {
    pub(crate) fn new(map: RecvMap, num_rows: usize, count: usize, tag: u16) -> Self {
        Self {
            map,
            num_rows,
            count,
            tag,
            _marker: std::marker::PhantomData,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Post one `irecv` per peer. The returned request's `wait` scatters
    /// received values into `out` (component-major like the send side).
    pub fn receive<'buf, C: Communicator>(
        &'buf self,
        comm: &C,
        out: &'buf mut [T],
    ) -> Result<Request<'buf, C>, OvergridError> {
        let expected = self.count * self.num_rows;
        if out.len() != expected {
            return Err(OvergridError::ValueCountMismatch {
                expected,
                got: out.len(),
            });
        }
        let mut handles = Vec::with_capacity(self.map.recvs().len());
        let mut peers = Vec::with_capacity(self.map.recvs().len());
        for &(peer, rows) in self.map.recvs() {
            let bytes = self.count * rows * std::mem::size_of::<T>();
            handles.push(comm.irecv(peer, self.tag, bytes));
            peers.push(peer);
        }
        let map = &self.map;
        let count = self.count;
        let num_rows = self.num_rows;
        let finish = move |payloads: Vec<Vec<u8>>| -> Result<(), OvergridError> {
            let mut offset = 0usize;
            for (&(peer, rows), bytes) in map.recvs().iter().zip(&payloads) {
                let expected = count * rows * std::mem::size_of::<T>();
                if bytes.len() != expected {
                    return Err(OvergridError::BufferSizeMismatch {
                        neighbor: peer,
                        expected,
                        got: bytes.len(),
                    });
                }
                let values: Vec<T> = bytemuck::pod_collect_to_vec(bytes);
                let block = &map.order()[offset..offset + rows];
                for c in 0..count {
                    for (j, &row) in block.iter().enumerate() {
                        out[c * num_rows + row] = values[c * rows + j];
                    }
                }
                offset += rows;
            }
            Ok(())
        };
        Ok(Request::from_recvs(handles, peers, Box::new(finish)))
    }
}
