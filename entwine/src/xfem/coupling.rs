//! Nitsche-type weak coupling of the cut background field to an embedded
//! discretization.
//!
//! The four coupling blocks land in one merged system ordered
//! `[background | embedded]`: C_uu into the background diagonal block,
//! C_uG and C_Gu into the off-diagonal blocks and C_GG into the embedded
//! diagonal block. Integration runs over the boundary-cell Gauss points of
//! the cut; velocity components only, the pressure rows stay untouched.

use super::cut::CutState;
use crate::assembly::{FeMatrix, FeVector};
use crate::comm::Comm;
use crate::mesh::{Discretization, DofId};
use crate::{shape_fn, Error, Vector3};
use log::debug;
use sprs::CsMat;

/// Merged coupled system over background and embedded rows.
pub struct MergedSystem {
    pub matrix: CsMat<f64>,
    pub rhs: Vec<f64>,
    pub background_rows: usize,
    pub embedded_rows: usize,
}

impl MergedSystem {
    /// Matrix-vector product, owned rows only.
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.matrix.rows()];
        for (row, vec) in self.matrix.outer_iterator().enumerate() {
            let mut acc = 0.0;
            for (col, v) in vec.iter() {
                acc += v * x[col];
            }
            y[row] = acc;
        }
        y
    }
}

/// One shape-function evaluation on either side of the interface:
/// per-node weights paired with the velocity dofs they scale.
struct SideEval {
    weighted_dofs: Vec<(DofId, f64)>,
}

fn background_eval(
    disc: &Discretization,
    positions: &[Vector3],
    cut: &CutState,
    cell: usize,
    x: &Vector3,
    comp: usize,
) -> Option<SideEval> {
    let vc = &cut.cells[cell];
    let e = disc.element(vc.element);
    let nodal_x: Vec<Vector3> = e.nodes.iter().map(|n| positions[n.index()]).collect();
    let xi = shape_fn::local_coordinates(e.shape, &nodal_x, x, 1e-6)?;
    let n = shape_fn::values(e.shape, &xi);
    let weighted_dofs = e
        .nodes
        .iter()
        .enumerate()
        .map(|(slot, &node)| {
            let dofs = disc.dof(node, vc.nodal_dofset[slot]);
            (dofs[comp], n[slot])
        })
        .collect();
    Some(SideEval { weighted_dofs })
}

fn embedded_eval(
    disc: &Discretization,
    positions: &[Vector3],
    x: &Vector3,
    comp: usize,
    offset: usize,
) -> Option<SideEval> {
    let (elem, xi) = shape_fn::element_containing(disc, positions, x)?;
    let e = disc.element(elem);
    let n = shape_fn::values(e.shape, &xi);
    let weighted_dofs = e
        .nodes
        .iter()
        .enumerate()
        .map(|(slot, &node)| {
            let dofs = disc.dof(node, 0);
            (DofId(dofs[comp].index() + offset), n[slot])
        })
        .collect();
    Some(SideEval { weighted_dofs })
}

/// Assemble the Nitsche coupling blocks and right-hand side over all
/// boundary cells of the cut. `stab` is the dimensionally scaled
/// stabilization parameter gamma / h; `jump` prescribes the velocity jump
/// `u_background - u_embedded` enforced weakly at each interface point.
/// Collective over `comm`.
#[allow(clippy::too_many_arguments)]
pub fn assemble_nitsche(
    background: &Discretization,
    positions_bg: &[Vector3],
    embedded: &Discretization,
    positions_emb: &[Vector3],
    cut: &CutState,
    stab: f64,
    jump: &dyn Fn(&Vector3) -> Vector3,
    comm: &dyn Comm,
) -> Result<MergedSystem, Error> {
    if stab <= 0.0 {
        return Err(Error::Config(
            "Nitsche stabilization parameter must be positive".to_string(),
        ));
    }
    let rank = comm.rank();
    let nb = background.dof_row_map().len();
    let ne = embedded.dof_row_map().len();
    let n = nb + ne;
    let mut row_owner = Vec::with_capacity(n);
    for i in 0..nb {
        row_owner.push(background.dof_owner(DofId(i)));
    }
    for i in 0..ne {
        row_owner.push(embedded.dof_owner(DofId(i)));
    }
    let mut matrix = FeMatrix::new(n, n, row_owner.clone(), rank);
    let mut rhs = FeVector::new(n, row_owner, rank);

    let ncomp = background
        .ndof_per_block()
        .min(embedded.ndof_per_block())
        .min(3);
    let mut skipped = 0usize;

    for bc in &cut.boundary_cells {
        if !background.is_row_element(bc.element, rank) {
            continue;
        }
        for (x, w, _normal) in &bc.gauss {
            let g = jump(x);
            for comp in 0..ncomp {
                let bg = match background_eval(background, positions_bg, cut, bc.cell, x, comp) {
                    Some(eval) => eval,
                    None => {
                        skipped += 1;
                        continue;
                    }
                };
                let emb = match embedded_eval(embedded, positions_emb, x, comp, nb) {
                    Some(eval) => eval,
                    None => {
                        skipped += 1;
                        continue;
                    }
                };
                let s = stab * w;
                // C_uu and C_uG rows.
                for &(ra, na) in &bg.weighted_dofs {
                    for &(cb, nc) in &bg.weighted_dofs {
                        matrix.add(ra, cb, s * na * nc);
                    }
                    for &(cb, nc) in &emb.weighted_dofs {
                        matrix.add(ra, cb, -s * na * nc);
                    }
                    rhs.add(ra, s * na * g[comp]);
                }
                // C_Gu and C_GG rows.
                for &(ra, na) in &emb.weighted_dofs {
                    for &(cb, nc) in &bg.weighted_dofs {
                        matrix.add(ra, cb, -s * na * nc);
                    }
                    for &(cb, nc) in &emb.weighted_dofs {
                        matrix.add(ra, cb, s * na * nc);
                    }
                    rhs.add(ra, -s * na * g[comp]);
                }
            }
        }
    }
    if skipped > 0 {
        debug!("Nitsche assembly skipped {} interface points", skipped);
    }

    let matrix = matrix.complete(comm)?;
    rhs.complete(comm)?;
    Ok(MergedSystem {
        matrix,
        rhs: rhs.as_slice().to_vec(),
        background_rows: nb,
        embedded_rows: ne,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::mesh::{Element, ElemId, ElementKind, Node, NodeId, Shape};
    use crate::xfem::cut::PlaneInterface;

    fn hex_row(n: usize, ndof: usize) -> Discretization {
        let mut nodes = Vec::new();
        let mut id = 0;
        for i in 0..=n {
            for j in 0..2 {
                for k in 0..2 {
                    nodes.push(Node {
                        id: NodeId(id),
                        x_ref: Vector3::new(i as f64, j as f64, k as f64),
                        owner: 0,
                    });
                    id += 1;
                }
            }
        }
        let elements = (0..n)
            .map(|i| Element {
                id: ElemId(i),
                shape: Shape::Hex8,
                nodes: vec![
                    NodeId(4 * i),
                    NodeId(4 * (i + 1)),
                    NodeId(4 * (i + 1) + 2),
                    NodeId(4 * i + 2),
                    NodeId(4 * i + 1),
                    NodeId(4 * (i + 1) + 1),
                    NodeId(4 * (i + 1) + 3),
                    NodeId(4 * i + 3),
                ],
                kind: ElementKind::Solid,
                owner: 0,
            })
            .collect();
        Discretization::new(nodes, elements, ndof)
    }

    /// One hex covering the interface region, slightly larger than the cut
    /// element so every projected Gauss point lies inside.
    fn embedded_hex() -> Discretization {
        let corners = [
            (1.0, -0.5, -0.5),
            (2.5, -0.5, -0.5),
            (2.5, 1.5, -0.5),
            (1.0, 1.5, -0.5),
            (1.0, -0.5, 1.5),
            (2.5, -0.5, 1.5),
            (2.5, 1.5, 1.5),
            (1.0, 1.5, 1.5),
        ];
        let nodes = corners
            .iter()
            .enumerate()
            .map(|(i, &(x, y, z))| Node {
                id: NodeId(i),
                x_ref: Vector3::new(x, y, z),
                owner: 0,
            })
            .collect();
        let element = Element {
            id: ElemId(0),
            shape: Shape::Hex8,
            nodes: (0..8).map(NodeId).collect(),
            kind: ElementKind::Solid,
            owner: 0,
        };
        Discretization::new(nodes, vec![element], 3)
    }

    fn setup() -> (Discretization, Vec<Vector3>, Discretization, Vec<Vector3>, CutState) {
        let bg = hex_row(2, 4);
        let pos_bg: Vec<Vector3> = bg.nodes().iter().map(|n| n.x_ref).collect();
        let geom = PlaneInterface {
            point: Vector3::new(1.5, 0.0, 0.0),
            point_old: Vector3::new(1.5, 0.0, 0.0),
            normal: Vector3::new(-1.0, 0.0, 0.0),
        };
        let cut = CutState::from_cut(&bg, &pos_bg, &geom);
        let emb = embedded_hex();
        let pos_emb: Vec<Vector3> = emb.nodes().iter().map(|n| n.x_ref).collect();
        (bg, pos_bg, emb, pos_emb, cut)
    }

    #[test]
    fn constant_field_jump_is_annihilated() {
        let (bg, pos_bg, emb, pos_emb, cut) = setup();
        let sys = assemble_nitsche(
            &bg,
            &pos_bg,
            &emb,
            &pos_emb,
            &cut,
            50.0,
            &|_| Vector3::zeros(),
            &SerialComm,
        )
        .unwrap();
        assert!(sys.matrix.nnz() > 0);
        // Identical constant velocity on both sides has zero jump, so the
        // coupled operator must annihilate it.
        let ones = vec![1.0; sys.background_rows + sys.embedded_rows];
        let y = sys.apply(&ones);
        let max = y.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(max < 1e-9, "constant field leaks through: {}", max);
    }

    #[test]
    fn all_four_blocks_are_populated() {
        let (bg, pos_bg, emb, pos_emb, cut) = setup();
        let sys = assemble_nitsche(
            &bg,
            &pos_bg,
            &emb,
            &pos_emb,
            &cut,
            50.0,
            &|_| Vector3::zeros(),
            &SerialComm,
        )
        .unwrap();
        let nb = sys.background_rows;
        let mut seen = [false; 4];
        for (row, vec) in sys.matrix.outer_iterator().enumerate() {
            for (col, v) in vec.iter() {
                if *v == 0.0 {
                    continue;
                }
                let quadrant = (row >= nb) as usize * 2 + (col >= nb) as usize;
                seen[quadrant] = true;
            }
        }
        assert_eq!(seen, [true; 4]);
    }

    #[test]
    fn prescribed_jump_matches_rhs() {
        let (bg, pos_bg, emb, pos_emb, cut) = setup();
        let g = Vector3::new(2.0, 0.0, 0.0);
        let sys = assemble_nitsche(
            &bg,
            &pos_bg,
            &emb,
            &pos_emb,
            &cut,
            50.0,
            &|_| g,
            &SerialComm,
        )
        .unwrap();
        // u_background = g on the x-velocity dofs, u_embedded = 0: the jump
        // equals the prescribed one, so K u = rhs exactly.
        let mut u = vec![0.0; sys.background_rows + sys.embedded_rows];
        for i in (0..sys.background_rows).step_by(4) {
            u[i] = g.x;
        }
        let y = sys.apply(&u);
        for (a, b) in y.iter().zip(&sys.rhs) {
            approx::assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn rejects_nonpositive_stabilization() {
        let (bg, pos_bg, emb, pos_emb, cut) = setup();
        let res = assemble_nitsche(
            &bg,
            &pos_bg,
            &emb,
            &pos_emb,
            &cut,
            0.0,
            &|_| Vector3::zeros(),
            &SerialComm,
        );
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
