//! Point-in-cell tests and iso-parametric coordinate inversion.
//!
//! Axis-aligned geometry types invert in closed form per axis; oriented and
//! curvilinear types run Newton iteration on the multilinear cell mapping.
//! A point is inside a cell when every local coordinate lies in
//! `[-tolerance, 1 + tolerance]`.

use super::GeometryType;
use crate::core::{Field, IntTuple, RealTuple, MAX_DIMS};

const NEWTON_MAX_ITERATIONS: usize = 25;
const NEWTON_RELATIVE_TOLERANCE: f64 = 1.0e-12;

/// Linear interpolation basis along one axis.
#[inline]
pub fn interp_basis_linear(u: f64) -> [f64; 2] {
    [1.0 - u, u]
}

/// Does `cell` of the given geometry spatially contain `point`?
pub fn overlaps_cell(
    dim: usize,
    coords: &[Field<f64>; MAX_DIMS],
    geometry_type: GeometryType,
    tolerance: f64,
    cell: IntTuple,
    point: RealTuple,
) -> bool {
    match coords_in_cell(dim, coords, geometry_type, cell, point) {
        Some(local) => (0..dim).all(|d| local[d] >= -tolerance && local[d] <= 1.0 + tolerance),
        None => false,
    }
}

/// Iso-parametric local coordinates of `point` within `cell`, in `[0, 1]^d`
/// when the point is inside. `None` when Newton iteration fails to
/// converge (degenerate cell or point far outside).
pub fn coords_in_cell(
    dim: usize,
    coords: &[Field<f64>; MAX_DIMS],
    geometry_type: GeometryType,
    cell: IntTuple,
    point: RealTuple,
) -> Option<RealTuple> {
    if geometry_type.is_axis_aligned() {
        coords_in_cell_axis_aligned(dim, coords, cell, point)
    } else {
        coords_in_cell_newton(dim, coords, cell, point)
    }
}

fn coords_in_cell_axis_aligned(
    dim: usize,
    coords: &[Field<f64>; MAX_DIMS],
    cell: IntTuple,
    point: RealTuple,
) -> Option<RealTuple> {
    let mut local = [0.0; MAX_DIMS];
    for d in 0..dim {
        let mut upper = cell;
        upper[d] += 1;
        let x0 = coords[d][cell];
        let x1 = coords[d][upper];
        let width = x1 - x0;
        if width == 0.0 {
            return None;
        }
        local[d] = (point[d] - x0) / width;
    }
    Some(local)
}

/// Corner offsets of a cell in row-major order for `dim` active axes.
fn corner_offsets(dim: usize) -> impl Iterator<Item = IntTuple> {
    let n = 1usize << dim;
    (0..n).map(move |bits| {
        let mut o = [0i64; MAX_DIMS];
        for d in 0..dim {
            o[d] = ((bits >> (dim - 1 - d)) & 1) as i64;
        }
        o
    })
}

fn coords_in_cell_newton(
    dim: usize,
    coords: &[Field<f64>; MAX_DIMS],
    cell: IntTuple,
    point: RealTuple,
) -> Option<RealTuple> {
    // Gather the corner coordinates once.
    let mut corners: Vec<RealTuple> = Vec::with_capacity(1 << dim);
    let mut scale = 0.0f64;
    for o in corner_offsets(dim) {
        let vertex = [cell[0] + o[0], cell[1] + o[1], cell[2] + o[2]];
        let mut x = [0.0; MAX_DIMS];
        for d in 0..dim {
            x[d] = coords[d][vertex];
        }
        corners.push(x);
    }
    for d in 0..dim {
        let lo = corners.iter().map(|c| c[d]).fold(f64::INFINITY, f64::min);
        let hi = corners.iter().map(|c| c[d]).fold(f64::NEG_INFINITY, f64::max);
        scale = scale.max(hi - lo);
    }
    if scale == 0.0 {
        return None;
    }
    let target = NEWTON_RELATIVE_TOLERANCE * scale;

    let mut u = [0.5; MAX_DIMS];
    for _ in 0..NEWTON_MAX_ITERATIONS {
        // Residual and Jacobian of the multilinear mapping.
        let mut residual = [0.0; MAX_DIMS];
        for d in 0..dim {
            residual[d] = -point[d];
        }
        let mut jac = [[0.0; MAX_DIMS]; MAX_DIMS];
        for (bits, corner) in corner_offsets(dim).zip(&corners) {
            let mut w = 1.0;
            for d in 0..dim {
                w *= if bits[d] == 1 { u[d] } else { 1.0 - u[d] };
            }
            let mut dw = [0.0; MAX_DIMS];
            for d in 0..dim {
                let mut v = 1.0;
                for e in 0..dim {
                    if e == d {
                        v *= if bits[e] == 1 { 1.0 } else { -1.0 };
                    } else {
                        v *= if bits[e] == 1 { u[e] } else { 1.0 - u[e] };
                    }
                }
                dw[d] = v;
            }
            for a in 0..dim {
                residual[a] += w * corner[a];
                for d in 0..dim {
                    jac[a][d] += dw[d] * corner[a];
                }
            }
        }
        let norm = (0..dim).map(|d| residual[d].abs()).fold(0.0, f64::max);
        if norm <= target {
            return Some(u);
        }
        let step = solve_linear(dim, &jac, &residual)?;
        for d in 0..dim {
            u[d] -= step[d];
        }
    }
    None
}

/// Solve `J x = b` for dim in {1, 2, 3} by cofactor expansion.
fn solve_linear(
    dim: usize,
    jac: &[[f64; MAX_DIMS]; MAX_DIMS],
    b: &RealTuple,
) -> Option<RealTuple> {
    match dim {
        1 => {
            if jac[0][0] == 0.0 {
                return None;
            }
            Some([b[0] / jac[0][0], 0.0, 0.0])
        }
        2 => {
            let det = jac[0][0] * jac[1][1] - jac[0][1] * jac[1][0];
            if det == 0.0 {
                return None;
            }
            Some([
                (b[0] * jac[1][1] - b[1] * jac[0][1]) / det,
                (jac[0][0] * b[1] - jac[1][0] * b[0]) / det,
                0.0,
            ])
        }
        3 => {
            let m = jac;
            let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
                - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
                + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
            if det == 0.0 {
                return None;
            }
            let inv = 1.0 / det;
            let x0 = inv
                * (b[0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
                    - m[0][1] * (b[1] * m[2][2] - m[1][2] * b[2])
                    + m[0][2] * (b[1] * m[2][1] - m[1][1] * b[2]));
            let x1 = inv
                * (m[0][0] * (b[1] * m[2][2] - m[1][2] * b[2])
                    - b[0] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
                    + m[0][2] * (m[1][0] * b[2] - b[1] * m[2][0]));
            let x2 = inv
                * (m[0][0] * (m[1][1] * b[2] - b[1] * m[2][1])
                    - m[0][1] * (m[1][0] * b[2] - b[1] * m[2][0])
                    + b[0] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]));
            Some([x0, x1, x2])
        }
        _ => None,
    }
}
