//! Beam-to-solid-surface contact pair.
//!
//! Node-to-surface: each beam node is projected onto the surface facet
//! (tri3/quad4) along its normal; penetration of the beam cross-section
//! yields a contact point per beam node.

use super::{assemble_contact_point, ContactPoint, EvalContext};
use crate::assembly::{FeMatrix, FeVector};
use crate::config::BeamContactParams;
use crate::mesh::{Discretization, ElemId, NodeId, Shape};
use crate::penalty::PenaltyModel;
use crate::{shape_fn, Vector3};

pub struct BeamSolidPair {
    pub beam: ElemId,
    pub surface: ElemId,
    pub contact_points: Vec<ContactPoint>,
    pub prev_active: bool,
    pub active: bool,
    pub lambda: f64,
    energy: f64,
}

/// Surface point, unit normal and shape weights at local coordinates.
fn surface_eval(
    disc: &Discretization,
    surface: ElemId,
    positions: &[Vector3],
    rs: &Vector3,
) -> (Vector3, Vector3, Vec<f64>) {
    let e = disc.element(surface);
    let nodal: Vec<Vector3> = e.nodes.iter().map(|n| positions[n.index()]).collect();
    let n = shape_fn::values(e.shape, rs);
    let dn = shape_fn::derivs(e.shape, rs);
    let mut p = Vector3::zeros();
    let mut du = Vector3::zeros();
    let mut dv = Vector3::zeros();
    for (i, x) in nodal.iter().enumerate() {
        p += x * n[i];
        du += x * dn[i].x;
        dv += x * dn[i].y;
    }
    let mut normal = du.cross(&dv);
    let norm = normal.norm();
    if norm > 0.0 {
        normal /= norm;
    }
    (p, normal, n)
}

/// Newton for the surface coordinates minimising the distance to `x`.
fn project_point_on_surface(
    disc: &Discretization,
    surface: ElemId,
    positions: &[Vector3],
    x: &Vector3,
) -> Option<Vector3> {
    let e = disc.element(surface);
    let nodal: Vec<Vector3> = e.nodes.iter().map(|n| positions[n.index()]).collect();
    let start = if e.shape == Shape::Tri3 {
        Vector3::new(1.0 / 3.0, 1.0 / 3.0, 0.0)
    } else {
        Vector3::zeros()
    };
    let mut rs = start;
    for _ in 0..30 {
        let dn = shape_fn::derivs(e.shape, &rs);
        let n = shape_fn::values(e.shape, &rs);
        let mut p = Vector3::zeros();
        let mut du = Vector3::zeros();
        let mut dv = Vector3::zeros();
        for (i, xa) in nodal.iter().enumerate() {
            p += xa * n[i];
            du += xa * dn[i].x;
            dv += xa * dn[i].y;
        }
        let d = p - x;
        let f1 = du.dot(&d);
        let f2 = dv.dot(&d);
        let scale = 1.0 + d.norm() * (du.norm() + dv.norm());
        if f1.abs() < 1e-12 * scale && f2.abs() < 1e-12 * scale {
            let inside = match e.shape {
                Shape::Tri3 => {
                    rs.x >= -1e-9 && rs.y >= -1e-9 && rs.x + rs.y <= 1.0 + 1e-9
                }
                _ => rs.x.abs() <= 1.0 + 1e-9 && rs.y.abs() <= 1.0 + 1e-9,
            };
            return inside.then_some(rs);
        }
        // Curvature of the bilinear patch is mild; the Gauss-Newton
        // approximation of the Hessian is enough here.
        let j11 = du.dot(&du);
        let j12 = du.dot(&dv);
        let j22 = dv.dot(&dv);
        let det = j11 * j22 - j12 * j12;
        if det.abs() < 1e-30 {
            return None;
        }
        rs.x += (-f1 * j22 + f2 * j12) / det;
        rs.y += (f1 * j12 - f2 * j11) / det;
        if rs.x.abs() > 3.0 || rs.y.abs() > 3.0 {
            return None;
        }
    }
    None
}

impl BeamSolidPair {
    pub fn new(beam: ElemId, surface: ElemId) -> Self {
        BeamSolidPair {
            beam,
            surface,
            contact_points: Vec::new(),
            prev_active: false,
            active: false,
            lambda: 0.0,
            energy: 0.0,
        }
    }

    pub fn evaluate(
        &mut self,
        ctx: &EvalContext,
        params: &BeamContactParams,
        model: &PenaltyModel,
        pp: f64,
        stiff: &mut FeMatrix,
        fc: &mut FeVector,
    ) -> bool {
        self.contact_points.clear();
        self.active = false;
        self.energy = 0.0;

        let beam_elem = ctx.disc.element(self.beam);
        let r_beam = beam_elem.radius();

        for (slot, &bn) in beam_elem.nodes.iter().enumerate() {
            let xb = ctx.positions[bn.index()];
            let rs = match project_point_on_surface(ctx.disc, self.surface, ctx.positions, &xb) {
                Some(rs) => rs,
                None => continue,
            };
            let (p, mut normal, surf_weights) = surface_eval(ctx.disc, self.surface, ctx.positions, &rs);
            let d = xb - p;
            let dist = d.norm();
            if dist == 0.0 {
                continue;
            }
            // Orient the facet normal towards the beam node.
            if normal.dot(&d) < 0.0 {
                normal = -normal;
            }
            let gap = normal.dot(&d) - r_beam;

            let mut force = model.force(gap, pp);
            let dforce = model.stiffness(gap, pp);
            if params.strategy == crate::config::Strategy::AugmentedLagrange {
                force -= self.lambda;
            }
            if force <= 0.0 {
                continue;
            }
            self.active = true;
            self.energy += model.energy(gap, pp);
            self.contact_points.push(ContactPoint {
                xi1: if slot == 0 { -1.0 } else { 1.0 },
                xi2: rs.x,
                gap,
                normal,
                force,
                angle: 0.0,
            });

            let mut weights: Vec<(NodeId, f64)> = vec![(bn, 1.0)];
            let surf = ctx.disc.element(self.surface);
            for (n, w) in surf.nodes.iter().zip(&surf_weights) {
                weights.push((*n, -w));
            }
            assemble_contact_point(ctx.disc, stiff, fc, &weights, &normal, dist, force, dforce);
        }
        self.active
    }

    pub fn update_class_variables_step(&mut self) {
        self.prev_active = self.active;
    }

    pub fn gap(&self) -> Option<f64> {
        self.contact_points
            .iter()
            .map(|cp| cp.gap)
            .min_by(|a, b| a.total_cmp(b))
    }

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
