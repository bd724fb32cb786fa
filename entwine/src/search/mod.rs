//! Geometric proximity engine.
//!
//! Returns, per step, an over-approximating set of candidate interacting
//! element pairs: unordered, deduplicated, self-free. False positives are
//! fine (the pair evaluator rejects them), false negatives below the search
//! envelope are not.
//!
//! Two strategies: a brute-force node-graph search and an axis-aligned
//! bounding-box octree. The envelope is shared: with
//! `L = max(max element length, max element radius)` reduced over all ranks,
//! the nodal search radius is `3 * (2*ext + L)` and the spherical
//! midpoint-distance post-filter uses `2*ext + L`. The factor 3 covers the
//! worst-case deformation of one element per step (half-circle bound).

pub mod octree;

use crate::comm::Comm;
use crate::config::SearchStrategy;
use crate::mesh::{Discretization, ElemId};
use crate::Vector3;
use ahash::AHashSet;
use rayon::prelude::*;

pub use octree::Octree;

/// Axis-aligned bounding box.
#[derive(Copy, Clone, Debug)]
pub struct Aabb {
    pub min: Vector3,
    pub max: Vector3,
}

impl Aabb {
    pub fn empty() -> Self {
        Aabb {
            min: Vector3::repeat(f64::INFINITY),
            max: Vector3::repeat(f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vector3>) -> Self {
        let mut b = Aabb::empty();
        for p in points {
            b.min = b.min.inf(p);
            b.max = b.max.sup(p);
        }
        b
    }

    /// Grow by `margin` in every direction.
    pub fn extruded(mut self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        self.min -= m;
        self.max += m;
        self
    }

    pub fn union(self, other: Aabb) -> Self {
        Aabb {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        (0..3).all(|i| self.min[i] <= other.max[i] && self.max[i] >= other.min[i])
    }

    pub fn center(&self) -> Vector3 {
        (self.min + self.max) * 0.5
    }
}

/// True for element shapes that take part in the proximity search.
pub fn is_contact_element(disc: &Discretization, e: ElemId) -> bool {
    let shape = disc.element(e).shape;
    shape.is_beam() || shape == crate::mesh::Shape::Sphere1 || shape.is_surface()
}

/// Bounding box of a contact element, extruded by the search margin plus
/// the cross-section radius.
pub fn element_aabb(disc: &Discretization, e: ElemId, positions: &[Vector3], ext: f64) -> Aabb {
    let elem = disc.element(e);
    Aabb::from_points(elem.nodes.iter().map(|n| &positions[n.index()])).extruded(ext + elem.radius())
}

/// The shared search envelope: `(nodal radius, spherical radius)`.
///
/// `L` is the globally largest of element length and element radius, reduced
/// with `max_all` so all ranks search with the same envelope.
pub fn search_radii(
    disc: &Discretization,
    positions: &[Vector3],
    ext: f64,
    comm: &dyn Comm,
) -> (f64, f64) {
    let mut l_local: f64 = 0.0;
    for e in disc.elements() {
        if !is_contact_element(disc, e.id) {
            continue;
        }
        l_local = l_local
            .max(disc.element_length(e.id, positions))
            .max(e.radius());
    }
    let l = comm.max_all(l_local);
    let spherical = 2.0 * ext + l;
    (3.0 * spherical, spherical)
}

/// Candidate-pair search over the fully ghosted discretization.
pub struct ProximitySearch {
    strategy: SearchStrategy,
    octree: Option<Octree>,
}

impl ProximitySearch {
    pub fn new(strategy: SearchStrategy) -> Self {
        ProximitySearch {
            strategy,
            octree: None,
        }
    }

    /// Run the configured search; the result is canonically ordered
    /// (`id1 < id2`) and deduplicated.
    pub fn search(
        &mut self,
        disc: &Discretization,
        positions: &[Vector3],
        ext: f64,
        comm: &dyn Comm,
    ) -> Vec<(ElemId, ElemId)> {
        match self.strategy {
            SearchStrategy::BruteForce => brute_force_search(disc, positions, ext, comm),
            SearchStrategy::Octree => {
                let octree = self
                    .octree
                    .get_or_insert_with(|| Octree::build(disc, positions, ext));
                octree.refresh(disc, positions, ext);
                octree.candidate_pairs(disc)
            }
        }
    }
}

/// Two-stage brute-force search.
///
/// Stage one builds node pairs within the nodal radius, rejecting nodes that
/// already share an element; the node pairs are promoted to all element
/// pairs adjacent to them. Stage two filters by midpoint distance against
/// the spherical radius.
pub fn brute_force_search(
    disc: &Discretization,
    positions: &[Vector3],
    ext: f64,
    comm: &dyn Comm,
) -> Vec<(ElemId, ElemId)> {
    let (nodal_radius, spherical_radius) = search_radii(disc, positions, ext, comm);
    let nodal_sq = nodal_radius * nodal_radius;

    // Every rank sees every node, so partitioning the outer loop over ranks
    // would only redistribute work; each rank searches its row nodes and the
    // registry unions results implicitly through the fully ghosted pair set.
    let candidate_sets: Vec<AHashSet<(ElemId, ElemId)>> = disc
        .nodes()
        .par_iter()
        .map(|node| {
            let mut local = AHashSet::new();
            let xi = positions[node.id.index()];
            let elems_i = disc.node_elements(node.id);
            if elems_i.iter().all(|&e| !is_contact_element(disc, e)) {
                return local;
            }
            for other in disc.nodes() {
                if other.id <= node.id {
                    continue;
                }
                if (positions[other.id.index()] - xi).norm_squared() > nodal_sq {
                    continue;
                }
                // Nodes that share an element are immediate neighbours.
                let elems_j = disc.node_elements(other.id);
                if elems_i.iter().any(|e| elems_j.contains(e)) {
                    continue;
                }
                for &ei in elems_i {
                    if !is_contact_element(disc, ei) {
                        continue;
                    }
                    for &ej in elems_j {
                        if ei == ej || !is_contact_element(disc, ej) {
                            continue;
                        }
                        let pair = if ei < ej { (ei, ej) } else { (ej, ei) };
                        local.insert(pair);
                    }
                }
            }
            local
        })
        .collect();

    let mut seen = AHashSet::new();
    let mut pairs = Vec::new();
    for set in candidate_sets {
        for pair in set {
            if !seen.insert(pair) {
                continue;
            }
            if disc.elements_adjacent(pair.0, pair.1) {
                continue;
            }
            if close_midpoint_distance(disc, positions, pair.0, pair.1, spherical_radius) {
                pairs.push(pair);
            }
        }
    }
    pairs.sort_unstable();
    pairs
}

/// Spherical post-filter: keep the pair when the deformed midpoints are
/// within the spherical search radius.
pub fn close_midpoint_distance(
    disc: &Discretization,
    positions: &[Vector3],
    e1: ElemId,
    e2: ElemId,
    spherical_radius: f64,
) -> bool {
    let d = disc.midpoint(e1, positions) - disc.midpoint(e2, positions);
    d.norm() <= spherical_radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::mesh::{Element, ElementKind, Node, NodeId, Shape};

    fn beam(id: usize, n0: usize, n1: usize, radius: f64) -> Element {
        Element {
            id: ElemId(id),
            shape: Shape::BeamLine2,
            nodes: vec![NodeId(n0), NodeId(n1)],
            kind: ElementKind::Beam {
                radius,
                ref_tangents: None,
            },
            owner: 0,
        }
    }

    fn node(id: usize, x: f64, y: f64, z: f64) -> Node {
        Node {
            id: NodeId(id),
            x_ref: Vector3::new(x, y, z),
            owner: 0,
        }
    }

    fn parallel_beams(gap: f64) -> Discretization {
        let nodes = vec![
            node(0, 0.0, 0.0, 0.0),
            node(1, 1.0, 0.0, 0.0),
            node(2, 0.0, gap, 0.0),
            node(3, 1.0, gap, 0.0),
        ];
        let elements = vec![beam(0, 0, 1, 0.05), beam(1, 2, 3, 0.05)];
        Discretization::new(nodes, elements, 3)
    }

    #[test]
    fn close_parallel_beams_found() {
        let disc = parallel_beams(0.2);
        let pos: Vec<Vector3> = disc.nodes().iter().map(|n| n.x_ref).collect();
        let pairs = brute_force_search(&disc, &pos, 0.1, &SerialComm);
        assert_eq!(pairs, vec![(ElemId(0), ElemId(1))]);
    }

    #[test]
    fn distant_beams_rejected_by_spherical_filter() {
        let disc = parallel_beams(50.0);
        let pos: Vec<Vector3> = disc.nodes().iter().map(|n| n.x_ref).collect();
        let pairs = brute_force_search(&disc, &pos, 0.1, &SerialComm);
        assert!(pairs.is_empty());
    }

    #[test]
    fn adjacent_elements_never_paired() {
        // Two beams sharing node 1.
        let nodes = vec![
            node(0, 0.0, 0.0, 0.0),
            node(1, 1.0, 0.0, 0.0),
            node(2, 2.0, 0.0, 0.0),
        ];
        let elements = vec![beam(0, 0, 1, 0.05), beam(1, 1, 2, 0.05)];
        let disc = Discretization::new(nodes, elements, 3);
        let pos: Vec<Vector3> = disc.nodes().iter().map(|n| n.x_ref).collect();
        let pairs = brute_force_search(&disc, &pos, 0.1, &SerialComm);
        assert!(pairs.is_empty());
    }

    #[test]
    fn envelope_radii() {
        let disc = parallel_beams(0.2);
        let pos: Vec<Vector3> = disc.nodes().iter().map(|n| n.x_ref).collect();
        let (nodal, spherical) = search_radii(&disc, &pos, 0.1, &SerialComm);
        // L = max(length 1.0, radius 0.05) = 1.0
        assert_eq!(spherical, 2.0 * 0.1 + 1.0);
        assert_eq!(nodal, 3.0 * spherical);
    }
}
