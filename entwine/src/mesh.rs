//! Arena-backed discretization: nodes, elements and dof maps.
//!
//! Nodes, elements and dofs are integer ids into flat tables. Pairs, volume
//! cells and reconstruction records store ids, never references, which keeps
//! the element/node/cell graph acyclic and cheaply shareable across threads.
//!
//! The contact search requires a fully overlapping ghosting: every rank holds
//! every node and element, and row ownership is a per-entity rank tag. This
//! trades O(N) memory per rank for a search that needs no halo exchange.

use crate::Vector3;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub usize);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_id!(
    /// Global node id.
    NodeId
);
arena_id!(
    /// Global element id.
    ElemId
);
arena_id!(
    /// Global degree-of-freedom id.
    DofId
);

/// Element shape tag. Shape-function evaluation dispatches on this.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Hex8,
    Hex20,
    Tri3,
    Quad4,
    BeamLine2,
    BeamLine3,
    Sphere1,
}

impl Shape {
    pub fn num_nodes(self) -> usize {
        match self {
            Shape::Hex8 => 8,
            Shape::Hex20 => 20,
            Shape::Tri3 => 3,
            Shape::Quad4 => 4,
            Shape::BeamLine2 => 2,
            Shape::BeamLine3 => 3,
            Shape::Sphere1 => 1,
        }
    }

    pub fn is_beam(self) -> bool {
        matches!(self, Shape::BeamLine2 | Shape::BeamLine3)
    }

    pub fn is_surface(self) -> bool {
        matches!(self, Shape::Tri3 | Shape::Quad4)
    }

    pub fn is_volume(self) -> bool {
        matches!(self, Shape::Hex8 | Shape::Hex20)
    }
}

/// Extra per-element data beyond the node list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ElementKind {
    /// Volume or surface element; no payload.
    Solid,
    /// Slender beam with a circular cross-section. Kirchhoff types carry
    /// reference tangents at each node.
    Beam {
        radius: f64,
        ref_tangents: Option<Vec<[f64; 3]>>,
    },
    /// Rigid sphere.
    Sphere { radius: f64 },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// Reference (undeformed) coordinates.
    pub x_ref: Vector3,
    /// Rank that owns the row entries of this node.
    pub owner: usize,
}

#[derive(Clone, Debug)]
pub struct Element {
    pub id: ElemId,
    pub shape: Shape,
    pub nodes: Vec<NodeId>,
    pub kind: ElementKind,
    pub owner: usize,
}

impl Element {
    /// Cross-section radius for beams and spheres, zero otherwise.
    pub fn radius(&self) -> f64 {
        match self.kind {
            ElementKind::Beam { radius, .. } | ElementKind::Sphere { radius } => radius,
            ElementKind::Solid => 0.0,
        }
    }

    pub fn is_beam(&self) -> bool {
        self.shape.is_beam()
    }

    pub fn is_sphere(&self) -> bool {
        self.shape == Shape::Sphere1
    }
}

/// The set of nodes and elements visible on this rank, with dof maps.
///
/// Dof numbering is blockwise per node: a node carries one or more dof
/// blocks (usually one; several for enriched interface nodes, none for void
/// nodes), each of `ndof_per_block` consecutive global ids. The block layout
/// is rebuilt by [`Discretization::rebuild_dofs`] when the interface cut
/// changes a node's classification.
#[derive(Clone, Debug)]
pub struct Discretization {
    nodes: Vec<Node>,
    elements: Vec<Element>,
    /// Elements adjacent to each node, indexed by node id.
    node_elements: Vec<Vec<ElemId>>,
    /// Dof blocks per node: `dofs[node][block]` is a contiguous id range.
    dofs: Vec<Vec<Vec<DofId>>>,
    ndof_per_block: usize,
    dof_row_map: Vec<DofId>,
    /// Owning rank per dof, aligned with global dof numbering.
    dof_owner: Vec<usize>,
}

impl Discretization {
    /// Build a discretization with one dof block per node.
    pub fn new(nodes: Vec<Node>, elements: Vec<Element>, ndof_per_block: usize) -> Self {
        let mut disc = Discretization {
            node_elements: vec![Vec::new(); nodes.len()],
            dofs: Vec::new(),
            ndof_per_block,
            dof_row_map: Vec::new(),
            dof_owner: Vec::new(),
            nodes,
            elements,
        };
        for e in &disc.elements {
            for &n in &e.nodes {
                disc.node_elements[n.index()].push(e.id);
            }
        }
        let blocks = vec![1usize; disc.nodes.len()];
        disc.assign_dofs(&blocks, 0);
        disc
    }

    /// Reassign dof blocks (`blocks_per_node[i]` blocks for node `i`),
    /// numbering sequentially by node. Used after an interface cut. Returns
    /// the new row map size.
    pub fn rebuild_dofs(&mut self, blocks_per_node: &[usize], rank: usize) -> usize {
        debug_assert_eq!(blocks_per_node.len(), self.nodes.len());
        self.assign_dofs(blocks_per_node, rank);
        self.dof_row_map.len()
    }

    fn assign_dofs(&mut self, blocks_per_node: &[usize], _rank: usize) {
        self.dofs.clear();
        self.dof_row_map.clear();
        self.dof_owner.clear();
        let mut next = 0usize;
        for (i, &nblocks) in blocks_per_node.iter().enumerate() {
            let mut node_blocks = Vec::with_capacity(nblocks);
            for _ in 0..nblocks {
                let block: Vec<DofId> = (next..next + self.ndof_per_block).map(DofId).collect();
                next += self.ndof_per_block;
                for &d in &block {
                    self.dof_row_map.push(d);
                    self.dof_owner.push(self.nodes[i].owner);
                }
                node_blocks.push(block);
            }
            self.dofs.push(node_blocks);
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn element(&self, id: ElemId) -> &Element {
        &self.elements[id.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Elements adjacent to `node`.
    pub fn node_elements(&self, node: NodeId) -> &[ElemId] {
        &self.node_elements[node.index()]
    }

    /// Globally numbered dofs of `node` in dof block `dofset`.
    pub fn dof(&self, node: NodeId, dofset: usize) -> &[DofId] {
        &self.dofs[node.index()][dofset]
    }

    /// Number of dof blocks currently bound to `node`.
    pub fn num_dofsets(&self, node: NodeId) -> usize {
        self.dofs[node.index()].len()
    }

    pub fn ndof_per_block(&self) -> usize {
        self.ndof_per_block
    }

    pub fn dof_row_map(&self) -> &[DofId] {
        &self.dof_row_map
    }

    pub fn dof_owner(&self, dof: DofId) -> usize {
        self.dof_owner[dof.index()]
    }

    /// True if `node`'s row entries live on `rank`.
    pub fn is_row_node(&self, node: NodeId, rank: usize) -> bool {
        self.nodes[node.index()].owner == rank
    }

    pub fn is_row_element(&self, elem: ElemId, rank: usize) -> bool {
        self.elements[elem.index()].owner == rank
    }

    /// True if the two elements share at least one node.
    pub fn elements_adjacent(&self, a: ElemId, b: ElemId) -> bool {
        let ea = &self.elements[a.index()];
        let eb = &self.elements[b.index()];
        ea.nodes.iter().any(|n| eb.nodes.contains(n))
    }

    /// Deformed midpoint of an element.
    pub fn midpoint(&self, elem: ElemId, positions: &[Vector3]) -> Vector3 {
        let e = &self.elements[elem.index()];
        let mut mid = Vector3::zeros();
        for &n in &e.nodes {
            mid += positions[n.index()];
        }
        mid / e.nodes.len() as f64
    }

    /// Deformed length of a line element (end-node distance); zero for
    /// point and volume shapes.
    pub fn element_length(&self, elem: ElemId, positions: &[Vector3]) -> f64 {
        let e = &self.elements[elem.index()];
        if e.nodes.len() < 2 {
            return 0.0;
        }
        // For 3-node beams the end nodes are the first two in the
        // connectivity; the middle node comes last.
        let end = if e.shape.is_beam() {
            e.nodes[1]
        } else {
            e.nodes[e.nodes.len() - 1]
        };
        let a = positions[e.nodes[0].index()];
        (positions[end.index()] - a).norm()
    }

    /// Deformed positions from reference coordinates plus a displacement
    /// table indexed by node.
    pub fn deformed_positions(&self, displacements: &[Vector3]) -> Vec<Vector3> {
        debug_assert_eq!(displacements.len(), self.nodes.len());
        self.nodes
            .iter()
            .map(|n| n.x_ref + displacements[n.id.index()])
            .collect()
    }

    /// Smallest beam cross-section radius over all beam elements, `None` if
    /// there are no beams.
    pub fn min_beam_radius(&self) -> Option<f64> {
        self.elements
            .iter()
            .filter(|e| e.is_beam())
            .map(|e| e.radius())
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Map from node id to its position in a caller-chosen ordering. Handy for
/// drivers that renumber.
pub type NodeIndexMap = AHashMap<NodeId, usize>;
