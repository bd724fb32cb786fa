//! Volume and boundary cells of the interface cut.
//!
//! The heavy tessellation lives outside the core; this module consumes an
//! [`InterfaceGeometry`] (a signed level set with an old and a new position)
//! and produces the cell tables the dof-set rebuild and the coupling
//! integrals work from. A cut background element yields one outside and one
//! inside volume cell with sub-sampled Gauss rules; uncut outside elements
//! keep the standard rule.

use crate::mesh::{Discretization, ElemId, NodeId};
use crate::{shape_fn, Vector3};

/// Which side of the interface a cell lies on. `Outside` is the fluid side
/// (positive level set).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    Outside,
    Inside,
}

/// A connected one-sided piece of a cut background element.
#[derive(Clone, Debug)]
pub struct VolumeCell {
    pub id: usize,
    pub element: ElemId,
    pub side: Side,
    /// Dof block to bind per element node, aligned with the element's node
    /// list. Filled by the dof-set rebuild.
    pub nodal_dofset: Vec<usize>,
    /// Gauss rule of this cell: reference coordinates and weight.
    pub gauss: Vec<(Vector3, f64)>,
}

/// Interface facet of an outside volume cell, carrying the Gauss points of
/// the coupling integrals.
#[derive(Clone, Debug)]
pub struct BoundaryCell {
    pub cell: usize,
    pub element: ElemId,
    /// Physical Gauss point, weight and unit interface normal.
    pub gauss: Vec<(Vector3, f64, Vector3)>,
}

/// Signed-distance description of the moving interface. Positive values are
/// on the fluid (outside) side.
pub trait InterfaceGeometry {
    /// Level set at the new interface position.
    fn level_set(&self, x: &Vector3) -> f64;
    /// Level set at the previous step's interface position.
    fn level_set_old(&self, x: &Vector3) -> f64;
    /// Closest point on the new interface.
    fn project_to_interface(&self, x: &Vector3) -> Vector3;
    /// Outward (fluid-side) unit normal at the new interface near `x`.
    fn normal(&self, x: &Vector3) -> Vector3;

    /// True when the straight segment from `a` to `b` dips into the
    /// structure at the new interface position. Sampled along the segment;
    /// points exactly on the interface do not count as crossed.
    fn segment_crosses(&self, a: &Vector3, b: &Vector3) -> bool {
        (0..=SEGMENT_SAMPLES).any(|i| {
            let t = i as f64 / SEGMENT_SAMPLES as f64;
            self.level_set(&(a + (b - a) * t)) < 0.0
        })
    }

    /// Same as [`segment_crosses`](Self::segment_crosses) against the old
    /// interface position.
    fn segment_crosses_old(&self, a: &Vector3, b: &Vector3) -> bool {
        (0..=SEGMENT_SAMPLES).any(|i| {
            let t = i as f64 / SEGMENT_SAMPLES as f64;
            self.level_set_old(&(a + (b - a) * t)) < 0.0
        })
    }
}

/// Subdivisions of the crossing test; interface features thinner than a
/// sample spacing along the segment can be missed.
const SEGMENT_SAMPLES: usize = 16;

/// Spherical interface, fluid outside the sphere.
#[derive(Copy, Clone, Debug)]
pub struct SphereInterface {
    pub center: Vector3,
    pub center_old: Vector3,
    pub radius: f64,
}

impl InterfaceGeometry for SphereInterface {
    fn level_set(&self, x: &Vector3) -> f64 {
        (x - self.center).norm() - self.radius
    }

    fn level_set_old(&self, x: &Vector3) -> f64 {
        (x - self.center_old).norm() - self.radius
    }

    fn project_to_interface(&self, x: &Vector3) -> Vector3 {
        let d = x - self.center;
        let norm = d.norm();
        if norm == 0.0 {
            self.center + Vector3::new(self.radius, 0.0, 0.0)
        } else {
            self.center + d * (self.radius / norm)
        }
    }

    fn normal(&self, x: &Vector3) -> Vector3 {
        let d = x - self.center;
        let norm = d.norm();
        if norm == 0.0 {
            Vector3::new(1.0, 0.0, 0.0)
        } else {
            d / norm
        }
    }
}

/// Planar interface, fluid on the normal side.
#[derive(Copy, Clone, Debug)]
pub struct PlaneInterface {
    pub point: Vector3,
    pub point_old: Vector3,
    pub normal: Vector3,
}

impl InterfaceGeometry for PlaneInterface {
    fn level_set(&self, x: &Vector3) -> f64 {
        (x - self.point).dot(&self.normal)
    }

    fn level_set_old(&self, x: &Vector3) -> f64 {
        (x - self.point_old).dot(&self.normal)
    }

    fn project_to_interface(&self, x: &Vector3) -> Vector3 {
        x - self.normal * self.level_set(x)
    }

    fn normal(&self, _x: &Vector3) -> Vector3 {
        self.normal
    }
}

/// A slab of structure between two parallel planes; fluid on both sides.
/// Useful to split the fluid region of an element in two (enriched nodes).
#[derive(Copy, Clone, Debug)]
pub struct SlabInterface {
    pub point: Vector3,
    pub point_old: Vector3,
    pub normal: Vector3,
    pub half_width: f64,
}

impl InterfaceGeometry for SlabInterface {
    fn level_set(&self, x: &Vector3) -> f64 {
        (x - self.point).dot(&self.normal).abs() - self.half_width
    }

    fn level_set_old(&self, x: &Vector3) -> f64 {
        (x - self.point_old).dot(&self.normal).abs() - self.half_width
    }

    fn project_to_interface(&self, x: &Vector3) -> Vector3 {
        let s = (x - self.point).dot(&self.normal);
        let target = if s >= 0.0 {
            self.half_width
        } else {
            -self.half_width
        };
        x - self.normal * (s - target)
    }

    fn normal(&self, x: &Vector3) -> Vector3 {
        if (x - self.point).dot(&self.normal) >= 0.0 {
            self.normal
        } else {
            -self.normal
        }
    }
}

/// Standard 2x2x2 Gauss rule on the reference hexahedron.
fn hex_gauss() -> Vec<(Vector3, f64)> {
    let g = 1.0 / 3.0f64.sqrt();
    let mut pts = Vec::with_capacity(8);
    for &a in &[-g, g] {
        for &b in &[-g, g] {
            for &c in &[-g, g] {
                pts.push((Vector3::new(a, b, c), 1.0));
            }
        }
    }
    pts
}

/// Sub-sampled rule for cut elements: centers of a regular reference-cube
/// subdivision, each carrying its sub-cell volume as weight.
fn subdivided_gauss(n: usize) -> Vec<(Vector3, f64)> {
    let h = 2.0 / n as f64;
    let w = h * h * h;
    let mut pts = Vec::with_capacity(n * n * n);
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let c = |m: usize| -1.0 + (m as f64 + 0.5) * h;
                pts.push((Vector3::new(c(i), c(j), c(k)), w));
            }
        }
    }
    pts
}

/// Per-step cut result over the background discretization.
pub struct CutState {
    pub cells: Vec<VolumeCell>,
    pub boundary_cells: Vec<BoundaryCell>,
    /// Outside volume cells referencing each node.
    node_outside_cells: Vec<Vec<usize>>,
}

impl CutState {
    /// Cut the background volume elements against the interface.
    pub fn from_cut(
        disc: &Discretization,
        positions: &[Vector3],
        geom: &dyn InterfaceGeometry,
    ) -> CutState {
        let mut cells: Vec<VolumeCell> = Vec::new();
        let mut boundary_cells: Vec<BoundaryCell> = Vec::new();

        for e in disc.elements() {
            if !e.shape.is_volume() {
                continue;
            }
            let nodal_x: Vec<Vector3> = e.nodes.iter().map(|n| positions[n.index()]).collect();
            let ls: Vec<f64> = nodal_x.iter().map(|x| geom.level_set(x)).collect();
            let any_out = ls.iter().any(|&v| v > 0.0);
            let any_in = ls.iter().any(|&v| v <= 0.0);

            if any_out && !any_in {
                cells.push(VolumeCell {
                    id: cells.len(),
                    element: e.id,
                    side: Side::Outside,
                    nodal_dofset: vec![0; e.nodes.len()],
                    gauss: hex_gauss(),
                });
            } else if any_in && !any_out {
                cells.push(VolumeCell {
                    id: cells.len(),
                    element: e.id,
                    side: Side::Inside,
                    nodal_dofset: vec![0; e.nodes.len()],
                    gauss: hex_gauss(),
                });
            } else {
                // Cut element: split the sub-sampled rule by the side of
                // each physical Gauss point.
                let mut out_gauss = Vec::new();
                let mut in_gauss = Vec::new();
                for (xi, w) in subdivided_gauss(4) {
                    let x = shape_fn::interpolate(e.shape, &xi, &nodal_x);
                    if geom.level_set(&x) > 0.0 {
                        out_gauss.push((xi, w));
                    } else {
                        in_gauss.push((xi, w));
                    }
                }
                let out_id = cells.len();
                if !out_gauss.is_empty() {
                    cells.push(VolumeCell {
                        id: out_id,
                        element: e.id,
                        side: Side::Outside,
                        nodal_dofset: vec![0; e.nodes.len()],
                        gauss: out_gauss,
                    });
                    boundary_cells.push(Self::boundary_cell(e.id, out_id, &nodal_x, e.shape, geom));
                }
                if !in_gauss.is_empty() {
                    cells.push(VolumeCell {
                        id: cells.len(),
                        element: e.id,
                        side: Side::Inside,
                        nodal_dofset: vec![0; e.nodes.len()],
                        gauss: in_gauss,
                    });
                }
            }
        }

        let mut node_outside_cells = vec![Vec::new(); disc.num_nodes()];
        for cell in &cells {
            if cell.side != Side::Outside {
                continue;
            }
            for &n in &disc.element(cell.element).nodes {
                node_outside_cells[n.index()].push(cell.id);
            }
        }

        CutState {
            cells,
            boundary_cells,
            node_outside_cells,
        }
    }

    /// Interface facet quadrature inside one cut element: sub-grid points
    /// projected onto the interface, weights from an area estimate.
    fn boundary_cell(
        element: ElemId,
        cell: usize,
        nodal_x: &[Vector3],
        shape: crate::mesh::Shape,
        geom: &dyn InterfaceGeometry,
    ) -> BoundaryCell {
        let mut gauss = Vec::new();
        for (xi, _) in subdivided_gauss(2) {
            let x = shape_fn::interpolate(shape, &xi, nodal_x);
            let p = geom.project_to_interface(&x);
            // Keep only projections that land inside this element.
            if shape_fn::local_coordinates(shape, nodal_x, &p, 1e-6).is_some() {
                gauss.push(p);
            }
        }
        // Area estimate: square of the element diameter scaled to the
        // retained fraction of projections.
        let diam = nodal_x
            .iter()
            .flat_map(|a| nodal_x.iter().map(move |b| (a - b).norm()))
            .fold(0.0f64, f64::max);
        let count = gauss.len().max(1);
        let w = diam * diam / (2.0 * count as f64);
        BoundaryCell {
            cell,
            element,
            gauss: gauss
                .into_iter()
                .map(|p| (p, w, geom.normal(&p)))
                .collect(),
        }
    }

    /// Outside volume cells referencing `node`.
    pub fn outside_cells_of(&self, node: NodeId) -> &[usize] {
        &self.node_outside_cells[node.index()]
    }

    pub fn num_outside_cells(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| c.side == Side::Outside)
            .count()
    }
}
