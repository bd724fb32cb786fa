//! Nodal dof-set classification after an interface cut.
//!
//! Each node binds one dof block per connected fluid region touching it:
//! exactly one for standard nodes, several for enriched nodes next to a thin
//! structure that splits their fluid support, none for void nodes buried in
//! the structure. The block total times the block width must equal the row
//! map size, which [`rebuild`] checks after renumbering.

use super::cut::{CutState, InterfaceGeometry, Side};
use crate::mesh::{Discretization, NodeId};
use crate::{Error, Vector3};
use log::debug;

/// Classification counts and the per-node block table of one rebuild.
#[derive(Clone, Debug)]
pub struct DofSetSummary {
    pub std_nodes: usize,
    pub enriched_nodes: usize,
    pub void_nodes: usize,
    pub blocks_per_node: Vec<usize>,
}

impl DofSetSummary {
    pub fn total_blocks(&self) -> usize {
        self.blocks_per_node.iter().sum()
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower root wins to keep component order deterministic.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Fluid components of the outside cells around `node`. Two cells connect
/// when their elements share nodes whose centroid lies on the fluid side,
/// i.e. the fluid passes through the shared face. Components are listed in
/// ascending order of their smallest cell id.
fn node_components(
    disc: &Discretization,
    cut: &CutState,
    geom: &dyn InterfaceGeometry,
    positions: &[Vector3],
    node: NodeId,
) -> Vec<Vec<usize>> {
    let cells = cut.outside_cells_of(node);
    if cells.is_empty() {
        return Vec::new();
    }
    let mut uf = UnionFind::new(cells.len());
    for (i, &ci) in cells.iter().enumerate() {
        for (j, &cj) in cells.iter().enumerate().skip(i + 1) {
            let ei = &disc.element(cut.cells[ci].element).nodes;
            let ej = &disc.element(cut.cells[cj].element).nodes;
            let shared: Vec<NodeId> = ei.iter().copied().filter(|n| ej.contains(n)).collect();
            if shared.is_empty() {
                continue;
            }
            let centroid = shared
                .iter()
                .fold(Vector3::zeros(), |acc, n| acc + positions[n.index()])
                / shared.len() as f64;
            if geom.level_set(&centroid) > 0.0 {
                uf.union(i, j);
            }
        }
    }
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut roots: Vec<usize> = Vec::new();
    for (i, &cell) in cells.iter().enumerate() {
        let root = uf.find(i);
        match roots.iter().position(|&r| r == root) {
            Some(k) => components[k].push(cell),
            None => {
                roots.push(root);
                components.push(vec![cell]);
            }
        }
    }
    components.sort_by_key(|c| c.iter().copied().min());
    components
}

/// Classify every node of the background mesh against the current cut.
pub fn classify_nodes(
    disc: &Discretization,
    cut: &CutState,
    geom: &dyn InterfaceGeometry,
    positions: &[Vector3],
) -> DofSetSummary {
    let mut blocks_per_node = Vec::with_capacity(disc.num_nodes());
    let mut std_nodes = 0;
    let mut enriched_nodes = 0;
    let mut void_nodes = 0;
    for n in disc.nodes() {
        let k = node_components(disc, cut, geom, positions, n.id).len();
        match k {
            0 => void_nodes += 1,
            1 => std_nodes += 1,
            _ => enriched_nodes += 1,
        }
        blocks_per_node.push(k);
    }
    DofSetSummary {
        std_nodes,
        enriched_nodes,
        void_nodes,
        blocks_per_node,
    }
}

/// Renumber the dof layout to the new classification and bind each outside
/// volume cell to the block of its fluid component at every node.
pub fn rebuild(
    disc: &mut Discretization,
    cut: &mut CutState,
    geom: &dyn InterfaceGeometry,
    positions: &[Vector3],
    rank: usize,
) -> Result<DofSetSummary, Error> {
    let summary = classify_nodes(disc, cut, geom, positions);
    let nrows = disc.rebuild_dofs(&summary.blocks_per_node, rank);
    if summary.total_blocks() * disc.ndof_per_block() != nrows {
        return Err(Error::Geometry(format!(
            "dof block total {} x {} does not match row map size {}",
            summary.total_blocks(),
            disc.ndof_per_block(),
            nrows
        )));
    }

    // Bind block indices into the cells.
    let components: Vec<Vec<Vec<usize>>> = disc
        .nodes()
        .iter()
        .map(|n| node_components(disc, cut, geom, positions, n.id))
        .collect();
    for cell_id in 0..cut.cells.len() {
        if cut.cells[cell_id].side != Side::Outside {
            continue;
        }
        let elem_nodes = disc.element(cut.cells[cell_id].element).nodes.clone();
        for (slot, n) in elem_nodes.iter().enumerate() {
            let block = components[n.index()]
                .iter()
                .position(|c| c.contains(&cell_id))
                .unwrap_or(0);
            cut.cells[cell_id].nodal_dofset[slot] = block;
        }
    }

    debug!(
        "dof rebuild: {} std, {} enriched, {} void nodes, {} rows",
        summary.std_nodes,
        summary.enriched_nodes,
        summary.void_nodes,
        nrows
    );
    Ok(summary)
}
