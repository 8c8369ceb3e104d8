//! Disperse: local scatter of received values into an n-grid field.

use super::value::ExchangeValue;
use crate::connectivity::ConnectivityN;
use crate::core::{IntTuple, Layout, Range, RangeIndexer};
use crate::error::OvergridError;
use serde::{Deserialize, Serialize};

/// How receiver values land in the field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisperseOp {
    /// Store each receiver value.
    Overwrite,
    /// Accumulate into the existing value (multiple donors per point sum).
    Append,
}

/// A disperse handle for one `(m, n, id)` slot. Purely local.
#[derive(Clone, Debug)]
pub struct DispersePlan<T: ExchangeValue> {
    op: DisperseOp,
    count: usize,
    field_indexer: RangeIndexer,
    points: Vec<IntTuple>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: ExchangeValue> DispersePlan<T> {
    pub(crate) fn new(
        connectivity: &ConnectivityN,
        op: DisperseOp,
        count: usize,
        field_range: Range,
        layout: Layout,
    ) -> Result<Self, OvergridError> {
        let indexer = RangeIndexer::with_layout(field_range, layout);
        for p in connectivity.points() {
            if !field_range.contains(*p) {
                return Err(OvergridError::FieldSizeMismatch {
                    expected: field_range.count(),
                    got: 0,
                });
            }
        }
        Ok(Self {
            op,
            count,
            field_indexer: indexer,
            points: connectivity.points().to_vec(),
            _marker: std::marker::PhantomData,
        })
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn num_receivers(&self) -> usize {
        self.points.len()
    }

    /// Scatter `values` (`count * num_receivers`, component-major) into
    /// `field` shaped by the handle's field range and layout.
    pub fn disperse(&self, values: &[T], field: &mut [T]) -> Result<(), OvergridError> {
        let num = self.points.len();
        if values.len() != self.count * num {
            return Err(OvergridError::ValueCountMismatch {
                expected: self.count * num,
                got: values.len(),
            });
        }
        let field_count = self.field_indexer.range().count();
        if field.len() != self.count * field_count {
            return Err(OvergridError::FieldSizeMismatch {
                expected: self.count * field_count,
                got: field.len(),
            });
        }
        for component in 0..self.count {
            let base = component * field_count;
            for (row, p) in self.points.iter().enumerate() {
                let dst = base + self.field_indexer.index_of(*p);
                let v = values[component * num + row];
                field[dst] = match self.op {
                    DisperseOp::Overwrite => v,
                    DisperseOp::Append => field[dst].add(v),
                };
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::subset::SubsetComm;
    use crate::comm::NoComm;

    fn plan(op: DisperseOp) -> DispersePlan<f64> {
        let comm = NoComm;
        let members = [0usize];
        let sub = SubsetComm::new(&comm, &members).unwrap();
        let mut conn = ConnectivityN::default();
        conn.resize(&sub, 2);
        {
            let mut points = conn.edit_points();
            points[0] = [1, 0, 0];
            points[1] = [3, 0, 0];
        }
        {
            let (_, ranks) = conn.edit_sources();
            ranks.fill(0);
        }
        DispersePlan::new(
            &conn,
            op,
            1,
            Range::from_extents(1, &[0], &[5]),
            Layout::RowMajor,
        )
        .unwrap()
    }

    #[test]
    fn overwrite_stores_and_append_accumulates() {
        let mut field = vec![1.0f64; 5];
        plan(DisperseOp::Overwrite)
            .disperse(&[7.0, 8.0], &mut field)
            .unwrap();
        assert_eq!(field, vec![1.0, 7.0, 1.0, 8.0, 1.0]);
        plan(DisperseOp::Append)
            .disperse(&[1.5, 0.5], &mut field)
            .unwrap();
        assert_eq!(field, vec![1.0, 8.5, 1.0, 8.5, 1.0]);
    }

    #[test]
    fn column_major_fields_scatter_through_their_strides() {
        let comm = NoComm;
        let members = [0usize];
        let sub = SubsetComm::new(&comm, &members).unwrap();
        let mut conn = ConnectivityN::default();
        conn.resize(&sub, 1);
        {
            let mut points = conn.edit_points();
            points[0] = [1, 2, 0];
        }
        {
            let (_, ranks) = conn.edit_sources();
            ranks.fill(0);
        }
        let range = Range::from_extents(2, &[0, 0], &[3, 3]);
        let plan = DispersePlan::<f64>::new(&conn, DisperseOp::Overwrite, 1, range, Layout::ColumnMajor)
            .unwrap();
        let mut field = vec![0.0f64; 9];
        plan.disperse(&[4.0], &mut field).unwrap();
        // Column-major: index = i + 3 * j = 1 + 6.
        assert_eq!(field[7], 4.0);
        assert_eq!(field.iter().filter(|&&v| v != 0.0).count(), 1);
    }
}
