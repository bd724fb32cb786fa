//! Shape-function evaluation, enum-dispatched per [`Shape`].
//!
//! One table of evaluators replaces per-shape template specialisation. Line
//! shapes (beams) additionally expose first and second parametric
//! derivatives for the closest-point Newton; volume shapes expose the
//! reference-to-physical Jacobian and a local-coordinate search used by the
//! semi-Lagrangean element location.

use crate::mesh::{Discretization, ElemId, Shape};
use crate::{Error, Matrix3, Vector3};

/// Shape-function values at reference coordinates `xi`.
///
/// Line shapes read `xi.x`, surface shapes `xi.xy`, volume shapes all three.
pub fn values(shape: Shape, xi: &Vector3) -> Vec<f64> {
    let (r, s, t) = (xi.x, xi.y, xi.z);
    match shape {
        Shape::Sphere1 => vec![1.0],
        Shape::BeamLine2 => vec![0.5 * (1.0 - r), 0.5 * (1.0 + r)],
        Shape::BeamLine3 => vec![0.5 * r * (r - 1.0), 0.5 * r * (r + 1.0), 1.0 - r * r],
        Shape::Tri3 => vec![1.0 - r - s, r, s],
        Shape::Quad4 => vec![
            0.25 * (1.0 - r) * (1.0 - s),
            0.25 * (1.0 + r) * (1.0 - s),
            0.25 * (1.0 + r) * (1.0 + s),
            0.25 * (1.0 - r) * (1.0 + s),
        ],
        Shape::Hex8 => HEX8_NODES
            .iter()
            .map(|&[a, b, c]| 0.125 * (1.0 + a * r) * (1.0 + b * s) * (1.0 + c * t))
            .collect(),
        Shape::Hex20 => hex20_values(r, s, t),
    }
}

/// Derivatives of the shape functions with respect to the reference
/// coordinates, one gradient per node.
pub fn derivs(shape: Shape, xi: &Vector3) -> Vec<Vector3> {
    let (r, s, t) = (xi.x, xi.y, xi.z);
    match shape {
        Shape::Sphere1 => vec![Vector3::zeros()],
        Shape::BeamLine2 => vec![
            Vector3::new(-0.5, 0.0, 0.0),
            Vector3::new(0.5, 0.0, 0.0),
        ],
        Shape::BeamLine3 => vec![
            Vector3::new(r - 0.5, 0.0, 0.0),
            Vector3::new(r + 0.5, 0.0, 0.0),
            Vector3::new(-2.0 * r, 0.0, 0.0),
        ],
        Shape::Tri3 => vec![
            Vector3::new(-1.0, -1.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ],
        Shape::Quad4 => vec![
            Vector3::new(-0.25 * (1.0 - s), -0.25 * (1.0 - r), 0.0),
            Vector3::new(0.25 * (1.0 - s), -0.25 * (1.0 + r), 0.0),
            Vector3::new(0.25 * (1.0 + s), 0.25 * (1.0 + r), 0.0),
            Vector3::new(-0.25 * (1.0 + s), 0.25 * (1.0 - r), 0.0),
        ],
        Shape::Hex8 => HEX8_NODES
            .iter()
            .map(|&[a, b, c]| {
                Vector3::new(
                    0.125 * a * (1.0 + b * s) * (1.0 + c * t),
                    0.125 * b * (1.0 + a * r) * (1.0 + c * t),
                    0.125 * c * (1.0 + a * r) * (1.0 + b * s),
                )
            })
            .collect(),
        Shape::Hex20 => hex20_derivs(r, s, t),
    }
}

/// Values of a line shape at parametric coordinate `xi`.
pub fn line_values(shape: Shape, xi: f64) -> Vec<f64> {
    values(shape, &Vector3::new(xi, 0.0, 0.0))
}

/// First parametric derivatives of a line shape.
pub fn line_derivs(shape: Shape, xi: f64) -> Vec<f64> {
    derivs(shape, &Vector3::new(xi, 0.0, 0.0))
        .iter()
        .map(|g| g.x)
        .collect()
}

/// Second parametric derivatives of a line shape (constant for the
/// quadratic beam, zero for the linear one).
pub fn line_derivs2(shape: Shape, _xi: f64) -> Vec<f64> {
    match shape {
        Shape::BeamLine2 => vec![0.0, 0.0],
        Shape::BeamLine3 => vec![1.0, 1.0, -2.0],
        _ => vec![0.0; shape.num_nodes()],
    }
}

/// Reference node coordinates of the trilinear hexahedron.
const HEX8_NODES: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

/// Reference node coordinates of the 20-node serendipity hexahedron:
/// 8 corners followed by 12 mid-edge nodes.
const HEX20_NODES: [[f64; 3]; 20] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
    [0.0, -1.0, -1.0],
    [1.0, 0.0, -1.0],
    [0.0, 1.0, -1.0],
    [-1.0, 0.0, -1.0],
    [-1.0, -1.0, 0.0],
    [1.0, -1.0, 0.0],
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [0.0, -1.0, 1.0],
    [1.0, 0.0, 1.0],
    [0.0, 1.0, 1.0],
    [-1.0, 0.0, 1.0],
];

fn hex20_values(r: f64, s: f64, t: f64) -> Vec<f64> {
    HEX20_NODES
        .iter()
        .map(|&[a, b, c]| {
            if a == 0.0 {
                0.25 * (1.0 - r * r) * (1.0 + b * s) * (1.0 + c * t)
            } else if b == 0.0 {
                0.25 * (1.0 + a * r) * (1.0 - s * s) * (1.0 + c * t)
            } else if c == 0.0 {
                0.25 * (1.0 + a * r) * (1.0 + b * s) * (1.0 - t * t)
            } else {
                0.125
                    * (1.0 + a * r)
                    * (1.0 + b * s)
                    * (1.0 + c * t)
                    * (a * r + b * s + c * t - 2.0)
            }
        })
        .collect()
}

fn hex20_derivs(r: f64, s: f64, t: f64) -> Vec<Vector3> {
    HEX20_NODES
        .iter()
        .map(|&[a, b, c]| {
            if a == 0.0 {
                Vector3::new(
                    -0.5 * r * (1.0 + b * s) * (1.0 + c * t),
                    0.25 * (1.0 - r * r) * b * (1.0 + c * t),
                    0.25 * (1.0 - r * r) * (1.0 + b * s) * c,
                )
            } else if b == 0.0 {
                Vector3::new(
                    0.25 * a * (1.0 - s * s) * (1.0 + c * t),
                    -0.5 * s * (1.0 + a * r) * (1.0 + c * t),
                    0.25 * (1.0 + a * r) * (1.0 - s * s) * c,
                )
            } else if c == 0.0 {
                Vector3::new(
                    0.25 * a * (1.0 + b * s) * (1.0 - t * t),
                    0.25 * (1.0 + a * r) * b * (1.0 - t * t),
                    -0.5 * t * (1.0 + a * r) * (1.0 + b * s),
                )
            } else {
                Vector3::new(
                    0.125 * a * (1.0 + b * s) * (1.0 + c * t) * (2.0 * a * r + b * s + c * t - 1.0),
                    0.125 * b * (1.0 + a * r) * (1.0 + c * t) * (a * r + 2.0 * b * s + c * t - 1.0),
                    0.125 * c * (1.0 + a * r) * (1.0 + b * s) * (a * r + b * s + 2.0 * c * t - 1.0),
                )
            }
        })
        .collect()
}

/// Interpolate nodal vector values at reference coordinates `xi`.
pub fn interpolate(shape: Shape, xi: &Vector3, nodal: &[Vector3]) -> Vector3 {
    let n = values(shape, xi);
    debug_assert_eq!(n.len(), nodal.len());
    n.iter()
        .zip(nodal)
        .fold(Vector3::zeros(), |acc, (w, v)| acc + *w * v)
}

/// Interpolate nodal scalar values at reference coordinates `xi`.
pub fn interpolate_scalar(shape: Shape, xi: &Vector3, nodal: &[f64]) -> f64 {
    let n = values(shape, xi);
    debug_assert_eq!(n.len(), nodal.len());
    n.iter().zip(nodal).map(|(w, v)| w * v).sum()
}

/// Reference-to-physical Jacobian `dx/dxi` at `xi`.
pub fn jacobian(shape: Shape, xi: &Vector3, nodal_x: &[Vector3]) -> Matrix3 {
    let dn = derivs(shape, xi);
    let mut j = Matrix3::zeros();
    for (g, x) in dn.iter().zip(nodal_x) {
        j += x * g.transpose();
    }
    j
}

/// Physical gradient `dv/dx` of a nodal vector field at `xi`.
///
/// Returns an error when the Jacobian is singular (degenerate element).
pub fn physical_gradient(
    shape: Shape,
    xi: &Vector3,
    nodal_x: &[Vector3],
    nodal_v: &[Vector3],
) -> Result<Matrix3, Error> {
    let j = jacobian(shape, xi, nodal_x);
    let j_inv = j
        .try_inverse()
        .ok_or_else(|| Error::Geometry("singular element Jacobian".to_string()))?;
    let dn = derivs(shape, xi);
    let mut dv_dxi = Matrix3::zeros();
    for (g, v) in dn.iter().zip(nodal_v) {
        dv_dxi += v * g.transpose();
    }
    Ok(dv_dxi * j_inv)
}

/// Newton search for the reference coordinates of physical point `x` inside
/// a volume element. Returns `None` if the iteration diverges or the result
/// lies outside the reference cube (with tolerance `tol`).
pub fn local_coordinates(
    shape: Shape,
    nodal_x: &[Vector3],
    x: &Vector3,
    tol: f64,
) -> Option<Vector3> {
    debug_assert!(shape.is_volume());
    let mut xi = Vector3::zeros();
    for _ in 0..20 {
        let r = interpolate(shape, &xi, nodal_x) - x;
        if r.norm() < 1e-12 {
            break;
        }
        let j = jacobian(shape, &xi, nodal_x);
        let dxi = j.try_inverse()? * (-r);
        xi += dxi;
        if dxi.norm() < 1e-13 {
            break;
        }
        if xi.amax() > 10.0 {
            return None;
        }
    }
    let inside = xi.iter().all(|&c| c.abs() <= 1.0 + tol);
    if inside {
        Some(xi)
    } else {
        None
    }
}

/// Find the volume element containing physical point `x`, together with the
/// local coordinates. Linear scan over the (fully ghosted) element table.
pub fn element_containing(
    disc: &Discretization,
    positions: &[Vector3],
    x: &Vector3,
) -> Option<(ElemId, Vector3)> {
    for e in disc.elements() {
        if !e.shape.is_volume() {
            continue;
        }
        let nodal_x: Vec<Vector3> = e.nodes.iter().map(|n| positions[n.index()]).collect();
        if let Some(xi) = local_coordinates(e.shape, &nodal_x, x, 1e-9) {
            return Some((e.id, xi));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn partition_of_unity(shape: Shape, xi: Vector3) {
        let sum: f64 = values(shape, &xi).iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-14);
        let grad_sum = derivs(shape, &xi)
            .iter()
            .fold(Vector3::zeros(), |a, g| a + g);
        assert_relative_eq!(grad_sum.norm(), 0.0, epsilon = 1e-13);
    }

    #[test]
    fn all_shapes_partition_unity() {
        for shape in [
            Shape::BeamLine2,
            Shape::BeamLine3,
            Shape::Tri3,
            Shape::Quad4,
            Shape::Hex8,
            Shape::Hex20,
        ] {
            partition_of_unity(shape, Vector3::new(0.3, -0.2, 0.7));
            partition_of_unity(shape, Vector3::zeros());
        }
    }

    #[test]
    fn hex20_nodal_kronecker() {
        for (i, &[a, b, c]) in HEX20_NODES.iter().enumerate() {
            let n = hex20_values(a, b, c);
            for (j, &v) in n.iter().enumerate() {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(v, expect, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn local_coordinate_roundtrip() {
        // Unit cube scaled by 2 and shifted.
        let nodal_x: Vec<Vector3> = HEX8_NODES
            .iter()
            .map(|&[a, b, c]| Vector3::new(2.0 * a + 1.0, 2.0 * b, 2.0 * c - 3.0))
            .collect();
        let xi_in = Vector3::new(0.25, -0.5, 0.75);
        let x = interpolate(Shape::Hex8, &xi_in, &nodal_x);
        let xi = local_coordinates(Shape::Hex8, &nodal_x, &x, 1e-9).unwrap();
        assert_relative_eq!((xi - xi_in).norm(), 0.0, epsilon = 1e-10);
        assert!(local_coordinates(
            Shape::Hex8,
            &nodal_x,
            &Vector3::new(100.0, 0.0, 0.0),
            1e-9
        )
        .is_none());
    }

    #[test]
    fn linear_field_gradient_exact() {
        let nodal_x: Vec<Vector3> = HEX8_NODES
            .iter()
            .map(|&[a, b, c]| Vector3::new(a, b, c))
            .collect();
        // v = (y, 0, 0) has gradient with a single entry dvx/dy = 1.
        let nodal_v: Vec<Vector3> = nodal_x.iter().map(|x| Vector3::new(x.y, 0.0, 0.0)).collect();
        let g = physical_gradient(Shape::Hex8, &Vector3::new(0.1, 0.2, -0.3), &nodal_x, &nodal_v)
            .unwrap();
        assert_relative_eq!(g[(0, 1)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(g.norm() - 1.0, 0.0, epsilon = 1e-12);
    }
}
