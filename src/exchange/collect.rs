//! Collect: halo-aware gather of per-donor stencil values from an m-grid
//! field, reduced along the point-in-cell axis.

use super::value::ExchangeValue;
use crate::comm::Communicator;
use crate::connectivity::ConnectivityM;
use crate::core::{Field, IntTuple, Layout, Range, RangeIndexer, MAX_DIMS};
use crate::error::OvergridError;
use crate::partition::Partition;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reduction applied along the donor stencil's point-in-cell axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectOp {
    /// True where no stencil vertex is set.
    None,
    /// True where any stencil vertex is set.
    Any,
    /// True where at least one stencil vertex is unset.
    NotAll,
    /// True where every stencil vertex is set.
    All,
    /// Tensor-product interpolation with the stored coefficients.
    Interpolate,
    Min,
    Max,
    Sum,
}

/// A collect handle for one `(m, n, id)` slot. Snapshots the donor
/// stencils at creation; executions are serialized per handle.
pub struct CollectPlan<T: ExchangeValue> {
    op: CollectOp,
    count: usize,
    tag: u16,
    field_indexer: RangeIndexer,
    partition: Arc<Partition>,
    num_donors: usize,
    max_donor_size: usize,
    extents_begin: Vec<IntTuple>,
    extents_end: Vec<IntTuple>,
    /// `coef[axis][point][donor]` snapshot; trailing axes carry 1.
    interp_coefs: Vec<f64>,
    scratch: Field<T>,
}

impl<T: ExchangeValue> CollectPlan<T> {
    pub(crate) fn new(
        connectivity: &ConnectivityM,
        partition: Arc<Partition>,
        op: CollectOp,
        count: usize,
        field_range: Range,
        layout: Layout,
        tag: u16,
    ) -> Result<Self, OvergridError> {
        if !field_range.includes(partition.extended_range()) {
            return Err(OvergridError::FieldSizeMismatch {
                expected: partition.extended_range().count(),
                got: field_range.count(),
            });
        }
        let scratch = Field::new(*partition.extended_range(), T::zero());
        Ok(Self {
            op,
            count,
            tag,
            field_indexer: RangeIndexer::with_layout(field_range, layout),
            partition,
            num_donors: connectivity.count(),
            max_donor_size: connectivity.max_donor_size(),
            extents_begin: connectivity.extents_begin().to_vec(),
            extents_end: connectivity.extents_end().to_vec(),
            interp_coefs: connectivity.interp_coefs().to_vec(),
            scratch,
        })
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn num_donors(&self) -> usize {
        self.num_donors
    }

    #[inline]
    fn coef(&self, axis: usize, point: usize, donor: usize) -> f64 {
        self.interp_coefs[(axis * self.max_donor_size + point) * self.num_donors + donor]
    }

    /// Gather donor values: refresh the halo of each input component into
    /// the internal scratch field, then reduce every donor's stencil.
    /// `fields` holds `count` slices shaped by the handle's field range;
    /// `donors` receives `count * num_donors` values, component-major.
    /// Collective over the m grid's member ranks.
    pub fn collect<C: Communicator>(
        &mut self,
        comm: &C,
        fields: &[&[T]],
        donors: &mut [T],
    ) -> Result<(), OvergridError> {
        if fields.len() != self.count {
            return Err(OvergridError::ValueCountMismatch {
                expected: self.count,
                got: fields.len(),
            });
        }
        if donors.len() != self.count * self.num_donors {
            return Err(OvergridError::ValueCountMismatch {
                expected: self.count * self.num_donors,
                got: donors.len(),
            });
        }
        let field_count = self.field_indexer.range().count();
        for component in 0..self.count {
            let field = fields[component];
            if field.len() != field_count {
                return Err(OvergridError::FieldSizeMismatch {
                    expected: field_count,
                    got: field.len(),
                });
            }
            for p in self.partition.extended_range().iter() {
                self.scratch[p] = field[self.field_indexer.index_of(p)];
            }
            self.partition.exchange(comm, self.tag, &mut self.scratch);
            for donor in 0..self.num_donors {
                donors[component * self.num_donors + donor] = self.reduce_donor(donor);
            }
        }
        Ok(())
    }

    fn reduce_donor(&self, donor: usize) -> T {
        let stencil = Range::new(self.extents_begin[donor], self.extents_end[donor]);
        match self.op {
            CollectOp::Interpolate => {
                let mut acc = 0.0f64;
                for v in stencil.iter() {
                    let mut weight = 1.0f64;
                    for d in 0..MAX_DIMS {
                        let point = (v[d] - self.extents_begin[donor][d]) as usize;
                        weight *= self.coef(d, point, donor);
                    }
                    acc += weight * self.vertex(v).to_f64();
                }
                T::from_f64(acc)
            }
            CollectOp::Sum => {
                let mut acc = T::zero();
                for v in stencil.iter() {
                    acc = acc.add(self.vertex(v));
                }
                acc
            }
            CollectOp::Min => {
                let mut it = stencil.iter();
                let first = it.next().map_or(T::zero(), |v| self.vertex(v));
                it.fold(first, |acc, v| acc.min_value(self.vertex(v)))
            }
            CollectOp::Max => {
                let mut it = stencil.iter();
                let first = it.next().map_or(T::zero(), |v| self.vertex(v));
                it.fold(first, |acc, v| acc.max_value(self.vertex(v)))
            }
            CollectOp::None => {
                T::from_bool(stencil.iter().all(|v| !self.vertex(v).as_bool()))
            }
            CollectOp::Any => T::from_bool(stencil.iter().any(|v| self.vertex(v).as_bool())),
            CollectOp::NotAll => {
                T::from_bool(!stencil.iter().all(|v| self.vertex(v).as_bool()))
            }
            CollectOp::All => T::from_bool(stencil.iter().all(|v| self.vertex(v).as_bool())),
        }
    }

    #[inline]
    fn vertex(&self, v: IntTuple) -> T {
        debug_assert!(
            self.partition.extended_range().contains(v),
            "stencil vertex {v:?} outside the extended range"
        );
        self.scratch[v]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::subset::SubsetComm;
    use crate::comm::NoComm;
    use crate::core::Cart;

    fn single_rank_plan(op: CollectOp) -> CollectPlan<f64> {
        let comm = NoComm;
        let members = [0usize];
        let sub = SubsetComm::new(&comm, &members).unwrap();
        let cart = Cart::new(1, Range::from_extents(1, &[0], &[5]), [false; 3]);
        let local = Range::from_extents(1, &[0], &[5]);
        let partition = Arc::new(Partition::from_decomp(cart, local, 0, vec![(0, local)]));
        let mut conn = ConnectivityM::default();
        conn.resize(&sub, 2, 2);
        {
            let (mut begin, end) = conn.edit_extents();
            begin[0] = [1, 0, 0];
            end[0] = [3, 0, 1];
            begin[1] = [3, 0, 0];
            end[1] = [5, 0, 1];
        }
        {
            let mut coefs = conn.edit_interp_coefs();
            // Donor 0 at u = 0.25, donor 1 at u = 0.5; trailing axes 1.
            let n = 2;
            let max = 2;
            let set = |coefs: &mut [f64], axis: usize, point: usize, donor: usize, v: f64| {
                coefs[(axis * max + point) * n + donor] = v;
            };
            set(&mut coefs, 0, 0, 0, 0.75);
            set(&mut coefs, 0, 1, 0, 0.25);
            set(&mut coefs, 0, 0, 1, 0.5);
            set(&mut coefs, 0, 1, 1, 0.5);
            for donor in 0..2 {
                for axis in 1..3 {
                    set(&mut coefs, axis, 0, donor, 1.0);
                }
            }
        }
        CollectPlan::new(
            &conn,
            partition,
            op,
            1,
            Range::from_extents(1, &[0], &[5]),
            Layout::RowMajor,
            0x30,
        )
        .unwrap()
    }

    #[test]
    fn interpolate_is_linear_along_the_stencil() {
        let mut plan = single_rank_plan(CollectOp::Interpolate);
        let comm = NoComm;
        let field: Vec<f64> = (0..5).map(|i| 10.0 + i as f64).collect();
        let mut donors = [0.0f64; 2];
        plan.collect(&comm, &[&field], &mut donors).unwrap();
        assert!((donors[0] - 11.25).abs() < 1e-12);
        assert!((donors[1] - 13.5).abs() < 1e-12);
    }

    #[test]
    fn reductions_cover_the_stencil() {
        let comm = NoComm;
        let field = vec![1.0f64, 2.0, 3.0, 4.0, 5.0];
        let mut donors = [0.0f64; 2];
        single_rank_plan(CollectOp::Sum)
            .collect(&comm, &[&field], &mut donors)
            .unwrap();
        assert_eq!(donors, [5.0, 9.0]);
        single_rank_plan(CollectOp::Min)
            .collect(&comm, &[&field], &mut donors)
            .unwrap();
        assert_eq!(donors, [2.0, 4.0]);
        single_rank_plan(CollectOp::Max)
            .collect(&comm, &[&field], &mut donors)
            .unwrap();
        assert_eq!(donors, [3.0, 5.0]);
    }

    #[test]
    fn boolean_ops_read_nonzero_as_set() {
        let comm = NoComm;
        let field = vec![0.0f64, 1.0, 0.0, 1.0, 1.0];
        let mut donors = [0.0f64; 2];
        single_rank_plan(CollectOp::Any)
            .collect(&comm, &[&field], &mut donors)
            .unwrap();
        assert_eq!(donors, [1.0, 1.0]);
        single_rank_plan(CollectOp::All)
            .collect(&comm, &[&field], &mut donors)
            .unwrap();
        assert_eq!(donors, [0.0, 1.0]);
        single_rank_plan(CollectOp::None)
            .collect(&comm, &[&field], &mut donors)
            .unwrap();
        assert_eq!(donors, [0.0, 0.0]);
        single_rank_plan(CollectOp::NotAll)
            .collect(&comm, &[&field], &mut donors)
            .unwrap();
        assert_eq!(donors, [1.0, 0.0]);
    }
}
