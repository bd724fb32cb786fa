//! Power-law potential interaction pairs (beam-beam and beam-sphere).
//!
//! The potential `k / r^m` acts between the closest centerline points; the
//! pair is skipped entirely beyond the cutoff radius. Positive prefactors
//! are repulsive.

use super::{assemble_contact_point, EvalContext};
use crate::assembly::{FeMatrix, FeVector};
use crate::config::BeamPotentialParams;
use crate::mesh::{ElemId, NodeId};
use crate::pairs::beam_beam::{closest_point_projections, project_point_on_beam, BeamCurve};
use crate::Vector3;

pub struct PotentialPair {
    /// The beam element.
    pub elem1: ElemId,
    /// Beam or sphere partner.
    pub elem2: ElemId,
    pub active: bool,
    separation: Option<f64>,
    energy: f64,
    force: f64,
}

impl PotentialPair {
    pub fn new(elem1: ElemId, elem2: ElemId) -> Self {
        PotentialPair {
            elem1,
            elem2,
            active: false,
            separation: None,
            energy: 0.0,
            force: 0.0,
        }
    }

    pub fn evaluate(
        &mut self,
        ctx: &EvalContext,
        params: &BeamPotentialParams,
        stiff: &mut FeMatrix,
        fc: &mut FeVector,
    ) -> bool {
        self.active = false;
        self.separation = None;
        self.energy = 0.0;
        self.force = 0.0;

        let c1 = BeamCurve::from_element(
            ctx.disc,
            ctx.positions,
            self.elem1,
            crate::config::Smoothing::None,
        );
        let partner = ctx.disc.element(self.elem2);

        // Interaction point pair on the two elements.
        let (xi, other_weights, d): (f64, Vec<(NodeId, f64)>, Vector3);
        if partner.is_sphere() {
            let center_node = partner.nodes[0];
            let center = ctx.positions[center_node.index()];
            let s = match project_point_on_beam(&c1, &center, 0.0) {
                Some(s) => s,
                None => return false,
            };
            let (p, _, _) = c1.eval(s);
            xi = s;
            other_weights = vec![(center_node, -1.0)];
            d = p - center;
        } else {
            let c2 = BeamCurve::from_element(
                ctx.disc,
                ctx.positions,
                self.elem2,
                crate::config::Smoothing::None,
            );
            let sols = closest_point_projections(&c1, &c2);
            let (s, t) = match sols.first() {
                Some(&st) => st,
                None => return false,
            };
            let (p, _, _) = c1.eval(s);
            let (q, _, _) = c2.eval(t);
            xi = s;
            other_weights = c2
                .nodes()
                .iter()
                .zip(c2.weights(t))
                .map(|(n, w)| (*n, -w))
                .collect();
            d = p - q;
        }

        let r = d.norm();
        if r == 0.0 || r > params.cutoff_radius {
            return false;
        }
        let normal = d / r;
        let m = params.exponent;
        let k = params.prefactor;
        // Phi = k / r^m, f = -dPhi/dr = m k / r^(m+1).
        let force = m * k / r.powf(m + 1.0);
        let dforce = -m * (m + 1.0) * k / r.powf(m + 2.0);

        self.active = true;
        self.separation = Some(r);
        self.energy = k / r.powf(m);
        self.force = force;

        let mut weights: Vec<(NodeId, f64)> = c1
            .nodes()
            .iter()
            .zip(c1.weights(xi))
            .map(|(n, w)| (*n, w))
            .collect();
        weights.extend(other_weights);
        assemble_contact_point(ctx.disc, stiff, fc, &weights, &normal, r, force, dforce);
        true
    }

    pub fn update_class_variables_step(&mut self) {}

    pub fn separation(&self) -> Option<f64> {
        self.separation
    }

    pub fn force(&self) -> f64 {
        self.force
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Discretization, Element, ElementKind, Node, Shape};

    #[test]
    fn crossing_beams_repel_inside_cutoff() {
        let nodes = vec![
            Node {
                id: NodeId(0),
                x_ref: Vector3::new(-0.5, 0.0, 0.0),
                owner: 0,
            },
            Node {
                id: NodeId(1),
                x_ref: Vector3::new(0.5, 0.0, 0.0),
                owner: 0,
            },
            Node {
                id: NodeId(2),
                x_ref: Vector3::new(0.0, -0.5, 0.2),
                owner: 0,
            },
            Node {
                id: NodeId(3),
                x_ref: Vector3::new(0.0, 0.5, 0.2),
                owner: 0,
            },
        ];
        let mk = |id, n0, n1| Element {
            id: ElemId(id),
            shape: Shape::BeamLine2,
            nodes: vec![NodeId(n0), NodeId(n1)],
            kind: ElementKind::Beam {
                radius: 0.05,
                ref_tangents: None,
            },
            owner: 0,
        };
        let disc = Discretization::new(nodes, vec![mk(0, 0, 1), mk(1, 2, 3)], 3);
        let pos: Vec<Vector3> = disc.nodes().iter().map(|n| n.x_ref).collect();
        let params = BeamPotentialParams {
            cutoff_radius: 0.5,
            exponent: 2.0,
            prefactor: 1.0,
        }
        .validated()
        .unwrap();
        let owner = vec![0; disc.dof_row_map().len()];
        let mut stiff = FeMatrix::new(owner.len(), owner.len(), owner.clone(), 0);
        let mut fc = FeVector::new(owner.len(), owner, 0);
        let ctx = EvalContext {
            disc: &disc,
            positions: &pos,
            velocities: None,
        };
        let mut pair = PotentialPair::new(ElemId(0), ElemId(1));
        assert!(pair.evaluate(&ctx, &params, &mut stiff, &mut fc));
        approx::assert_relative_eq!(pair.separation().unwrap(), 0.2, epsilon = 1e-10);
        // f = m k / r^(m+1) = 2 / 0.2^3 = 250.
        approx::assert_relative_eq!(pair.force(), 250.0, epsilon = 1e-6);
        approx::assert_relative_eq!(pair.energy(), 25.0, epsilon = 1e-8);

        // Outside the cutoff nothing happens.
        let far = BeamPotentialParams {
            cutoff_radius: 0.1,
            ..params
        };
        let mut pair2 = PotentialPair::new(ElemId(0), ElemId(1));
        assert!(!pair2.evaluate(&ctx, &far, &mut stiff, &mut fc));
    }
}
