//! Beam-to-rigid-sphere contact pair.
//!
//! A single-parameter projection of the sphere center onto the beam
//! centerline; the gap subtracts both the beam and the sphere radius.

use super::{assemble_contact_point, ContactPoint, EvalContext};
use crate::assembly::{FeMatrix, FeVector};
use crate::config::BeamContactParams;
use crate::mesh::{ElemId, NodeId};
use crate::pairs::beam_beam::{project_point_on_beam, BeamCurve};
use crate::penalty::PenaltyModel;
use crate::Vector3;

pub struct BeamSpherePair {
    pub beam: ElemId,
    pub sphere: ElemId,
    pub contact_point: Option<ContactPoint>,
    pub prev_active: bool,
    pub active: bool,
    pub lambda: f64,
    energy: f64,
}

impl BeamSpherePair {
    pub fn new(beam: ElemId, sphere: ElemId) -> Self {
        BeamSpherePair {
            beam,
            sphere,
            contact_point: None,
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
        self.contact_point = None;
        self.active = false;
        self.energy = 0.0;

        let curve = BeamCurve::from_element(ctx.disc, ctx.positions, self.beam, params.smoothing);
        let sphere_elem = ctx.disc.element(self.sphere);
        let center_node = sphere_elem.nodes[0];
        let center = ctx.positions[center_node.index()];
        let r_beam = ctx.disc.element(self.beam).radius();
        let r_sphere = sphere_elem.radius();

        // Endpoint contact matters for spheres rolling off a beam end, so
        // try the interior projection first and fall back to the ends.
        let xi = project_point_on_beam(&curve, &center, 0.0)
            .or_else(|| {
                let (a, _, _) = curve.eval(-1.0);
                let (b, _, _) = curve.eval(1.0);
                if (a - center).norm() < (b - center).norm() {
                    Some(-1.0)
                } else {
                    Some(1.0)
                }
            });
        let xi = match xi {
            Some(xi) => xi,
            None => return false,
        };

        let (p, _, _) = curve.eval(xi);
        let d = p - center;
        let dist = d.norm();
        if dist == 0.0 {
            return false;
        }
        let normal = d / dist;
        let gap = dist - r_beam - r_sphere;

        let mut force = model.force(gap, pp);
        let dforce = model.stiffness(gap, pp);
        if params.strategy == crate::config::Strategy::AugmentedLagrange {
            force -= self.lambda;
        }
        if force <= 0.0 {
            return false;
        }

        self.active = true;
        self.energy = model.energy(gap, pp);
        self.contact_point = Some(ContactPoint {
            xi1: xi,
            xi2: 0.0,
            gap,
            normal,
            force,
            angle: 0.0,
        });

        let mut weights: Vec<(NodeId, f64)> = curve
            .nodes()
            .iter()
            .zip(curve.weights(xi))
            .map(|(n, w)| (*n, w))
            .collect();
        weights.push((center_node, -1.0));
        assemble_contact_point(ctx.disc, stiff, fc, &weights, &normal, dist, force, dforce);
        true
    }

    pub fn update_class_variables_step(&mut self) {
        self.prev_active = self.active;
    }

    pub fn gap(&self) -> Option<f64> {
        self.contact_point.as_ref().map(|cp| cp.gap)
    }

    pub fn contact_force(&self) -> Option<f64> {
        self.contact_point.as_ref().map(|cp| cp.force)
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PenaltyLaw;
    use crate::mesh::{Discretization, Element, ElementKind, Node, Shape};

    #[test]
    fn sphere_touching_beam_midpoint() {
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
                x_ref: Vector3::new(0.1, 0.12, 0.0),
                owner: 0,
            },
        ];
        let elements = vec![
            Element {
                id: ElemId(0),
                shape: Shape::BeamLine2,
                nodes: vec![NodeId(0), NodeId(1)],
                kind: ElementKind::Beam {
                    radius: 0.05,
                    ref_tangents: None,
                },
                owner: 0,
            },
            Element {
                id: ElemId(1),
                shape: Shape::Sphere1,
                nodes: vec![NodeId(2)],
                kind: ElementKind::Sphere { radius: 0.1 },
                owner: 0,
            },
        ];
        let disc = Discretization::new(nodes, elements, 3);
        let pos: Vec<Vector3> = disc.nodes().iter().map(|n| n.x_ref).collect();
        let params = BeamContactParams {
            btsph_penalty: 1.0e3,
            btsph: true,
            ext: 0.1,
            ..Default::default()
        }
        .validated()
        .unwrap();
        let model = PenaltyModel::new(PenaltyLaw::Linear, params.g0, params.f0, params.c0);
        let owner = vec![0; disc.dof_row_map().len()];
        let mut stiff = FeMatrix::new(owner.len(), owner.len(), owner.clone(), 0);
        let mut fc = FeVector::new(owner.len(), owner, 0);
        let ctx = EvalContext {
            disc: &disc,
            positions: &pos,
            velocities: None,
        };
        let mut pair = BeamSpherePair::new(ElemId(0), ElemId(1));
        let active = pair.evaluate(&ctx, &params, &model, params.btsph_penalty, &mut stiff, &mut fc);
        assert!(active);
        // Center at distance 0.12, radii 0.05 + 0.1: penetration 0.03.
        approx::assert_relative_eq!(pair.gap().unwrap(), -0.03, epsilon = 1e-10);
        approx::assert_relative_eq!(pair.contact_force().unwrap(), 30.0, epsilon = 1e-8);
        // Projection lands below the center.
        approx::assert_relative_eq!(pair.contact_point.as_ref().unwrap().xi1, 0.2, epsilon = 1e-9);
    }
}
