//! Grid geometry: coordinate fields over the extended range, a shape-class
//! enum driving the inverse mapping, and a periodic length vector.

pub mod ops;

use crate::core::{Field, RealTuple, MAX_DIMS};
use crate::grid::Grid;
use serde::{Deserialize, Serialize};

/// Shape class of a grid's cells; selects the point-in-cell and
/// coordinate-inversion algorithm.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GeometryType {
    /// Axis-aligned, constant spacing.
    Uniform = 0,
    /// Constant spacing, rotated frame.
    OrientedUniform = 1,
    /// Axis-aligned, per-axis spacing.
    Rectilinear = 2,
    /// Per-axis spacing, rotated frame.
    OrientedRectilinear = 3,
    /// Fully general point-wise coordinates.
    Curvilinear = 4,
}

impl GeometryType {
    /// Closed-form per-axis inversion applies; otherwise Newton iteration.
    #[inline]
    pub fn is_axis_aligned(self) -> bool {
        matches!(self, GeometryType::Uniform | GeometryType::Rectilinear)
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Uniform),
            1 => Some(Self::OrientedUniform),
            2 => Some(Self::Rectilinear),
            3 => Some(Self::OrientedRectilinear),
            4 => Some(Self::Curvilinear),
            _ => None,
        }
    }
}

/// Geometry creation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeometryParams {
    pub geometry_type: GeometryType,
    pub periodic_length: RealTuple,
}

impl Default for GeometryParams {
    fn default() -> Self {
        Self {
            geometry_type: GeometryType::Curvilinear,
            periodic_length: [0.; MAX_DIMS],
        }
    }
}

impl GeometryParams {
    pub fn uniform() -> Self {
        Self {
            geometry_type: GeometryType::Uniform,
            ..Self::default()
        }
    }

    pub fn with_periodic_length(mut self, length: RealTuple) -> Self {
        self.periodic_length = length;
        self
    }
}

/// Per-grid geometry data. Coordinates default to the index tuple so a
/// freshly created geometry is a valid unit-spaced uniform grid.
#[derive(Clone, Debug)]
pub struct Geometry {
    geometry_type: GeometryType,
    periodic_length: RealTuple,
    coords: [Field<f64>; MAX_DIMS],
}

impl Geometry {
    pub(crate) fn create(grid: &Grid, params: GeometryParams) -> Self {
        debug_assert!(
            (grid.dim()..MAX_DIMS).all(|d| params.periodic_length[d] == 0.),
            "periodic length set on an inactive axis"
        );
        let ext = *grid.extended_range();
        let mut coords = [
            Field::new(ext, 0.0),
            Field::new(ext, 0.0),
            Field::new(ext, 0.0),
        ];
        for p in ext.iter() {
            for d in 0..MAX_DIMS {
                coords[d][p] = p[d] as f64;
            }
        }
        Self {
            geometry_type: params.geometry_type,
            periodic_length: params.periodic_length,
            coords,
        }
    }

    #[inline]
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    #[inline]
    pub fn periodic_length(&self) -> RealTuple {
        self.periodic_length
    }

    #[inline]
    pub fn coords(&self) -> &[Field<f64>; MAX_DIMS] {
        &self.coords
    }

    pub(crate) fn coords_mut(&mut self) -> &mut [Field<f64>; MAX_DIMS] {
        &mut self.coords
    }
}
