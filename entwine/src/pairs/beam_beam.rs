//! Beam-to-beam contact pair.
//!
//! The closest-point projection is a nested Newton in the two arc-length
//! parameters. Crossing beams give one interior solution; nearly parallel
//! beams make the projection singular, in which case the pair falls back to
//! endpoint projections and may carry several contact points (line-contact
//! regime).

use super::{assemble_contact_point, ContactPoint, EvalContext};
use crate::assembly::{FeMatrix, FeVector};
use crate::config::{BeamContactParams, Damping, Smoothing};
use crate::mesh::{Discretization, ElemId, NodeId, Shape};
use crate::penalty::PenaltyModel;
use crate::Vector3;

/// Coincident contact points below this distance raise the shift flag.
const SHIFT_TOL: f64 = 1e-12;

/// Evaluated beam centerline with parametric derivatives.
pub(crate) struct BeamCurve {
    shape: Shape,
    nodes: Vec<NodeId>,
    x: Vec<Vector3>,
    /// Smoothed end tangents (scaled by the chord length) for the Hermite
    /// representation of tangent-smoothed Reissner beams.
    hermite: Option<(Vector3, Vector3)>,
}

impl BeamCurve {
    pub(crate) fn from_element(
        disc: &Discretization,
        positions: &[Vector3],
        elem: ElemId,
        smoothing: Smoothing,
    ) -> Self {
        let e = disc.element(elem);
        debug_assert!(e.is_beam());
        let x: Vec<Vector3> = e.nodes.iter().map(|n| positions[n.index()]).collect();
        let hermite = if smoothing == Smoothing::Tangent && e.shape == Shape::BeamLine2 {
            let chord = (x[1] - x[0]).norm();
            let t0 = smoothed_tangent(disc, positions, e.nodes[0]) * chord;
            let t1 = smoothed_tangent(disc, positions, e.nodes[1]) * chord;
            Some((t0, t1))
        } else {
            None
        };
        BeamCurve {
            shape: e.shape,
            nodes: e.nodes.clone(),
            x,
            hermite,
        }
    }

    pub(crate) fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Shape-function weights of the centerline at `xi`, aligned with
    /// `nodes()`. The Hermite tangent contribution is folded into the
    /// assembly weights of the end nodes.
    pub(crate) fn weights(&self, xi: f64) -> Vec<f64> {
        match self.hermite {
            // Tangent dofs are not part of the translational system here;
            // forces are carried by the positional weights of the cubic.
            Some(_) => {
                let s = 0.5 * (xi + 1.0);
                vec![
                    2.0 * s * s * s - 3.0 * s * s + 1.0,
                    -2.0 * s * s * s + 3.0 * s * s,
                ]
            }
            None => crate::shape_fn::line_values(self.shape, xi),
        }
    }

    /// Position and first/second parametric derivatives at `xi`.
    pub(crate) fn eval(&self, xi: f64) -> (Vector3, Vector3, Vector3) {
        if let Some((t0, t1)) = self.hermite {
            // Cubic Hermite on s in [0, 1], chain factor 1/2 per derivative.
            let s = 0.5 * (xi + 1.0);
            let (x0, x1) = (self.x[0], self.x[1]);
            let h00 = 2.0 * s * s * s - 3.0 * s * s + 1.0;
            let h10 = s * s * s - 2.0 * s * s + s;
            let h01 = -2.0 * s * s * s + 3.0 * s * s;
            let h11 = s * s * s - s * s;
            let r = x0 * h00 + t0 * h10 + x1 * h01 + t1 * h11;
            let d00 = 6.0 * s * s - 6.0 * s;
            let d10 = 3.0 * s * s - 4.0 * s + 1.0;
            let d01 = -6.0 * s * s + 6.0 * s;
            let d11 = 3.0 * s * s - 2.0 * s;
            let dr = (x0 * d00 + t0 * d10 + x1 * d01 + t1 * d11) * 0.5;
            let k00 = 12.0 * s - 6.0;
            let k10 = 6.0 * s - 4.0;
            let k01 = -12.0 * s + 6.0;
            let k11 = 6.0 * s - 2.0;
            let ddr = (x0 * k00 + t0 * k10 + x1 * k01 + t1 * k11) * 0.25;
            (r, dr, ddr)
        } else {
            let n = crate::shape_fn::line_values(self.shape, xi);
            let dn = crate::shape_fn::line_derivs(self.shape, xi);
            let ddn = crate::shape_fn::line_derivs2(self.shape, xi);
            let mut r = Vector3::zeros();
            let mut dr = Vector3::zeros();
            let mut ddr = Vector3::zeros();
            for (i, x) in self.x.iter().enumerate() {
                r += x * n[i];
                dr += x * dn[i];
                ddr += x * ddn[i];
            }
            (r, dr, ddr)
        }
    }
}

/// Unit tangent at a node averaged over its adjacent beam elements.
fn smoothed_tangent(disc: &Discretization, positions: &[Vector3], node: NodeId) -> Vector3 {
    let mut t = Vector3::zeros();
    for &eid in disc.node_elements(node) {
        let e = disc.element(eid);
        if !e.is_beam() {
            continue;
        }
        let a = positions[e.nodes[0].index()];
        let b = positions[e.nodes[1].index()];
        let dir = b - a;
        let norm = dir.norm();
        if norm > 0.0 {
            t += dir / norm;
        }
    }
    let norm = t.norm();
    if norm > 0.0 {
        t / norm
    } else {
        t
    }
}

/// Newton for the orthogonality conditions `t1.d = 0`, `t2.d = 0` with
/// `d = r1(xi) - r2(eta)`. Returns `None` on divergence, a singular
/// projection (parallel beams) or a solution outside both elements.
pub(crate) fn cpp_newton(
    c1: &BeamCurve,
    c2: &BeamCurve,
    mut xi: f64,
    mut eta: f64,
) -> Option<(f64, f64)> {
    for _ in 0..50 {
        let (r1, t1, k1) = c1.eval(xi);
        let (r2, t2, k2) = c2.eval(eta);
        let d = r1 - r2;
        let f1 = t1.dot(&d);
        let f2 = t2.dot(&d);
        let scale = 1.0 + t1.norm() * d.norm() + t2.norm() * d.norm();
        if f1.abs() < 1e-12 * scale && f2.abs() < 1e-12 * scale {
            let inside = xi.abs() <= 1.0 + 1e-9 && eta.abs() <= 1.0 + 1e-9;
            return inside.then_some((xi.clamp(-1.0, 1.0), eta.clamp(-1.0, 1.0)));
        }
        let j11 = k1.dot(&d) + t1.dot(&t1);
        let j12 = -t1.dot(&t2);
        let j21 = t2.dot(&t1);
        let j22 = k2.dot(&d) - t2.dot(&t2);
        let det = j11 * j22 - j12 * j21;
        if det.abs() < 1e-12 * (j11.abs() * j22.abs() + j12.abs() * j21.abs() + 1e-30) {
            // Singular: (anti)parallel tangents, no isolated closest point.
            return None;
        }
        let dxi = (-f1 * j22 + f2 * j12) / det;
        let deta = (f1 * j21 - f2 * j11) / det;
        xi += dxi;
        eta += deta;
        if xi.abs() > 2.0 || eta.abs() > 2.0 {
            return None;
        }
    }
    None
}

/// Interior closest-point pairs from a small grid of Newton starts,
/// deduplicated. Crossing beams give one solution; S-shaped ones can give
/// several.
pub(crate) fn closest_point_projections(c1: &BeamCurve, c2: &BeamCurve) -> Vec<(f64, f64)> {
    const STARTS: [f64; 3] = [-0.6, 0.0, 0.6];
    let mut sols: Vec<(f64, f64)> = Vec::new();
    for &a in &STARTS {
        for &b in &STARTS {
            if let Some((xi, eta)) = cpp_newton(c1, c2, a, b) {
                if sols
                    .iter()
                    .all(|&(x, e)| (x - xi).abs() > 1e-6 || (e - eta).abs() > 1e-6)
                {
                    sols.push((xi, eta));
                }
            }
        }
    }
    sols
}

/// Project `p` onto a beam curve; `None` if the projection diverges or
/// leaves the element.
pub(crate) fn project_point_on_beam(curve: &BeamCurve, p: &Vector3, start: f64) -> Option<f64> {
    let mut xi = start;
    for _ in 0..50 {
        let (r, t, k) = curve.eval(xi);
        let d = r - p;
        let f = t.dot(&d);
        let scale = 1.0 + t.norm() * d.norm();
        if f.abs() < 1e-12 * scale {
            let inside = xi.abs() <= 1.0 + 1e-9;
            return inside.then_some(xi.clamp(-1.0, 1.0));
        }
        let df = k.dot(&d) + t.dot(&t);
        if df.abs() < 1e-30 {
            return None;
        }
        xi -= f / df;
        if xi.abs() > 2.0 {
            return None;
        }
    }
    None
}

/// Endpoint projections for the near-parallel regime: project each beam's
/// end points onto the other beam. Up to two distinct parameter pairs.
fn endpoint_projections(c1: &BeamCurve, c2: &BeamCurve) -> Vec<(f64, f64)> {
    let mut sols: Vec<(f64, f64)> = Vec::new();
    let mut push = |xi: f64, eta: f64| {
        if sols
            .iter()
            .all(|&(x, e)| (x - xi).abs() > 1e-6 || (e - eta).abs() > 1e-6)
        {
            sols.push((xi, eta));
        }
    };
    for &end in &[-1.0, 1.0] {
        let (p1, _, _) = c1.eval(end);
        if let Some(eta) = project_point_on_beam(c2, &p1, 0.0) {
            push(end, eta);
        }
        let (p2, _, _) = c2.eval(end);
        if let Some(xi) = project_point_on_beam(c1, &p2, 0.0) {
            push(xi, end);
        }
    }
    sols.truncate(2);
    sols
}

pub struct BeamBeamPair {
    pub elem1: ElemId,
    pub elem2: ElemId,
    pub contact_points: Vec<ContactPoint>,
    /// Normal at step end of the previous step, used by the sign-consistent
    /// gap.
    pub prev_normal: Option<Vector3>,
    pub prev_active: bool,
    pub prev_parameters: Vec<(f64, f64)>,
    pub active: bool,
    /// Contact points coincided during this iteration; the driver perturbs
    /// and re-iterates. An error if still set at convergence.
    pub shift: bool,
    pub should_invert_normal: bool,
    /// Uzawa multiplier (non-positive; `lambda <- lambda + pp*g` under
    /// penetration).
    pub lambda: f64,
    energy: f64,
}

impl BeamBeamPair {
    pub fn new(elem1: ElemId, elem2: ElemId) -> Self {
        BeamBeamPair {
            elem1,
            elem2,
            contact_points: Vec::new(),
            prev_normal: None,
            prev_active: false,
            prev_parameters: Vec::new(),
            active: false,
            shift: false,
            should_invert_normal: false,
            lambda: 0.0,
            energy: 0.0,
        }
    }

    /// Evaluate contact forces and tangent stiffness, writing into the
    /// assemblers. Returns the active flag.
    pub fn evaluate(
        &mut self,
        ctx: &EvalContext,
        params: &BeamContactParams,
        model: &PenaltyModel,
        pp: f64,
        stiff: &mut FeMatrix,
        fc: &mut FeVector,
    ) -> bool {
        let c1 = BeamCurve::from_element(ctx.disc, ctx.positions, self.elem1, params.smoothing);
        let c2 = BeamCurve::from_element(ctx.disc, ctx.positions, self.elem2, params.smoothing);
        let r1 = ctx.disc.element(self.elem1).radius();
        let r2 = ctx.disc.element(self.elem2).radius();

        let mut parameter_pairs = closest_point_projections(&c1, &c2);
        if parameter_pairs.is_empty() {
            parameter_pairs = endpoint_projections(&c1, &c2);
        }

        self.contact_points.clear();
        self.shift = false;
        self.active = false;
        self.energy = 0.0;

        for (xi, eta) in parameter_pairs {
            let (p1, t1, _) = c1.eval(xi);
            let (p2, t2, _) = c2.eval(eta);
            let d = p1 - p2;
            let dist = d.norm();
            if dist < SHIFT_TOL {
                self.shift = true;
                continue;
            }
            let mut normal = d / dist;
            let mut sgn = 1.0;
            if params.newgap {
                if let Some(n_old) = self.prev_normal {
                    if normal.dot(&n_old) < 0.0 {
                        sgn = -1.0;
                        self.should_invert_normal = true;
                    }
                }
            }
            let gap = sgn * dist - r1 - r2;
            if sgn < 0.0 {
                normal = -normal;
            }
            let mut force = model.force(gap, pp);
            let dforce = model.stiffness(gap, pp);
            if params.strategy == crate::config::Strategy::AugmentedLagrange {
                force -= self.lambda;
            }
            if let Damping::Enabled { param, reg1, reg2 } = params.damping {
                if let Some(vel) = ctx.velocities {
                    let (v1, v2) = point_velocities(&c1, &c2, xi, eta, vel);
                    let gap_rate = normal.dot(&(v1 - v2));
                    let ramp = damping_ramp(gap, reg1, reg2);
                    if gap_rate < 0.0 && ramp > 0.0 {
                        force += param * (-gap_rate) * ramp;
                    }
                }
            }
            if force <= 0.0 {
                continue;
            }
            self.active = true;
            self.energy += model.energy(gap, pp);

            let angle = {
                let c = t1.dot(&t2).abs() / (t1.norm() * t2.norm());
                c.clamp(0.0, 1.0).acos()
            };
            self.contact_points.push(ContactPoint {
                xi1: xi,
                xi2: eta,
                gap,
                normal,
                force,
                angle,
            });

            // Signed assembly weights: +N on beam 1, -N on beam 2.
            let mut weights: Vec<(NodeId, f64)> = Vec::new();
            for (n, w) in c1.nodes().iter().zip(c1.weights(xi)) {
                weights.push((*n, w));
            }
            for (n, w) in c2.nodes().iter().zip(c2.weights(eta)) {
                weights.push((*n, -w));
            }
            assemble_contact_point(ctx.disc, stiff, fc, &weights, &normal, dist, force, dforce);
        }

        self.active
    }

    /// Step-end promotion of history fields.
    pub fn update_class_variables_step(&mut self) {
        self.prev_active = self.active;
        self.prev_parameters = self
            .contact_points
            .iter()
            .map(|cp| (cp.xi1, cp.xi2))
            .collect();
        if let Some(cp) = self.contact_points.first() {
            let n = cp.normal;
            self.prev_normal = Some(if self.should_invert_normal { -n } else { n });
        }
        self.should_invert_normal = false;
    }

    /// Smallest gap over the current contact points.
    pub fn gap(&self) -> Option<f64> {
        self.contact_points
            .iter()
            .map(|cp| cp.gap)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Largest contact force scalar over the current contact points.
    pub fn contact_force(&self) -> Option<f64> {
        self.contact_points
            .iter()
            .map(|cp| cp.force)
            .max_by(|a, b| a.total_cmp(b))
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }
}

fn damping_ramp(gap: f64, reg1: f64, reg2: f64) -> f64 {
    if gap >= reg1 {
        0.0
    } else if gap <= reg2 {
        1.0
    } else {
        (reg1 - gap) / (reg1 - reg2)
    }
}

/// Interpolated velocities at the two contact points.
fn point_velocities(
    c1: &BeamCurve,
    c2: &BeamCurve,
    xi: f64,
    eta: f64,
    vel: &[Vector3],
) -> (Vector3, Vector3) {
    let interp = |c: &BeamCurve, s: f64| {
        c.nodes()
            .iter()
            .zip(c.weights(s))
            .fold(Vector3::zeros(), |acc, (n, w)| acc + vel[n.index()] * w)
    };
    (interp(c1, xi), interp(c2, eta))
}
