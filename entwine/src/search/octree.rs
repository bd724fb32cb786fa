//! Axis-aligned bounding-box octree for the candidate-pair search.
//!
//! The octant topology is built top-down once and kept across steps; only
//! the bounding volumes are refreshed bottom-up from the deformed element
//! boxes each step. Identical inputs yield identical candidate sets.

use super::{element_aabb, is_contact_element, Aabb};
use crate::mesh::{Discretization, ElemId};
use crate::Vector3;
use ahash::AHashSet;

const MAX_DEPTH: usize = 8;
const LEAF_CAPACITY: usize = 8;

struct Octant {
    bounds: Aabb,
    /// Arena indices of the eight children, `None` for leaves.
    children: Option<[usize; 8]>,
    /// Member slots (indices into `elems`), leaves only.
    members: Vec<usize>,
}

/// Persistent octree over the contact elements.
pub struct Octree {
    octants: Vec<Octant>,
    /// Contact elements in slot order.
    elems: Vec<ElemId>,
    /// Deformed, extruded box per slot; refreshed each step.
    aabbs: Vec<Aabb>,
}

impl Octree {
    /// Build topology and initial bounds from the current positions.
    pub fn build(disc: &Discretization, positions: &[Vector3], ext: f64) -> Self {
        let elems: Vec<ElemId> = disc
            .elements()
            .iter()
            .map(|e| e.id)
            .filter(|&e| is_contact_element(disc, e))
            .collect();
        let aabbs: Vec<Aabb> = elems
            .iter()
            .map(|&e| element_aabb(disc, e, positions, ext))
            .collect();
        let root_bounds = aabbs
            .iter()
            .copied()
            .fold(Aabb::empty(), |acc, b| acc.union(b));
        let mut tree = Octree {
            octants: vec![Octant {
                bounds: root_bounds,
                children: None,
                members: (0..elems.len()).collect(),
            }],
            elems,
            aabbs,
        };
        tree.split(0, 0);
        tree
    }

    /// Recursively split an octant whose member list exceeds the leaf
    /// capacity. Members go to every child octant their box overlaps.
    fn split(&mut self, octant: usize, depth: usize) {
        if depth >= MAX_DEPTH || self.octants[octant].members.len() <= LEAF_CAPACITY {
            return;
        }
        let bounds = self.octants[octant].bounds;
        let mid = bounds.center();
        let members = std::mem::take(&mut self.octants[octant].members);
        let mut child_ids = [0usize; 8];
        for (k, id) in child_ids.iter_mut().enumerate() {
            let mut lo = bounds.min;
            let mut hi = mid;
            for axis in 0..3 {
                if k & (1 << axis) != 0 {
                    lo[axis] = mid[axis];
                    hi[axis] = bounds.max[axis];
                }
            }
            let child_bounds = Aabb { min: lo, max: hi };
            let child_members: Vec<usize> = members
                .iter()
                .copied()
                .filter(|&m| self.aabbs[m].overlaps(&child_bounds))
                .collect();
            *id = self.octants.len();
            self.octants.push(Octant {
                bounds: child_bounds,
                children: None,
                members: child_members,
            });
        }
        // Degenerate case: every member overlaps every child. Splitting
        // further cannot separate them, keep this octant a leaf.
        if child_ids
            .iter()
            .all(|&c| self.octants[c].members.len() == members.len())
        {
            self.octants.truncate(self.octants.len() - 8);
            self.octants[octant].members = members;
            return;
        }
        self.octants[octant].children = Some(child_ids);
        for &c in &child_ids {
            self.split(c, depth + 1);
        }
    }

    /// Bottom-up bounds refresh from the deformed element boxes; the octant
    /// topology is unchanged.
    pub fn refresh(&mut self, disc: &Discretization, positions: &[Vector3], ext: f64) {
        for (slot, &e) in self.elems.iter().enumerate() {
            self.aabbs[slot] = element_aabb(disc, e, positions, ext);
        }
        self.refresh_bounds(0);
    }

    fn refresh_bounds(&mut self, octant: usize) -> Aabb {
        let bounds = match self.octants[octant].children {
            Some(children) => children
                .iter()
                .map(|&c| self.refresh_bounds(c))
                .fold(Aabb::empty(), Aabb::union),
            None => self.octants[octant]
                .members
                .iter()
                .map(|&m| self.aabbs[m])
                .fold(Aabb::empty(), Aabb::union),
        };
        self.octants[octant].bounds = bounds;
        bounds
    }

    /// All element pairs whose extruded boxes overlap, canonically ordered
    /// and deduplicated; pairs of elements sharing a node are dropped.
    pub fn candidate_pairs(&self, disc: &Discretization) -> Vec<(ElemId, ElemId)> {
        let mut seen = AHashSet::new();
        let mut pairs = Vec::new();
        let mut stack = vec![0usize];
        while let Some(octant) = stack.pop() {
            let oct = &self.octants[octant];
            match oct.children {
                Some(children) => stack.extend(children),
                None => {
                    for (i, &a) in oct.members.iter().enumerate() {
                        for &b in &oct.members[i + 1..] {
                            if !self.aabbs[a].overlaps(&self.aabbs[b]) {
                                continue;
                            }
                            let (ea, eb) = (self.elems[a], self.elems[b]);
                            let pair = if ea < eb { (ea, eb) } else { (eb, ea) };
                            if !seen.insert(pair) {
                                continue;
                            }
                            if disc.elements_adjacent(pair.0, pair.1) {
                                continue;
                            }
                            pairs.push(pair);
                        }
                    }
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }
}
