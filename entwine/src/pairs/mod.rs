//! Pair registry and evaluator.
//!
//! Candidate pairs from the proximity search are canonicalised (beam in
//! slot 1, smaller id first), deduplicated against the previous step so
//! per-pair history survives, and dispatched to the typed pair variants.
//! The registry also owns the penalty/augmented-Lagrange policy, the
//! contact active set and the generalised-alpha scaled assembly.

pub mod active_set;
pub mod beam_beam;
pub mod beam_sphere;
pub mod beam_solid;
pub mod potential;

use crate::assembly::{FeMatrix, FeVector};
use crate::comm::Comm;
use crate::config::{BeamContactParams, BeamPotentialParams, Strategy, TimeIntParams};
use crate::mesh::{Discretization, ElemId, NodeId};
use crate::penalty::PenaltyModel;
use crate::search::ProximitySearch;
use crate::{Error, Matrix3, Vector3};
use ahash::AHashMap;
use log::{debug, info, warn};

pub use active_set::{ActiveSet, ContactState, FrictionBound};
pub use beam_beam::BeamBeamPair;
pub use beam_sphere::BeamSpherePair;
pub use beam_solid::BeamSolidPair;
pub use potential::PotentialPair;

/// One converged contact point of a pair.
#[derive(Copy, Clone, Debug)]
pub struct ContactPoint {
    pub xi1: f64,
    pub xi2: f64,
    pub gap: f64,
    /// Unit normal pointing from element 2 towards element 1.
    pub normal: Vector3,
    /// Non-negative contact force scalar.
    pub force: f64,
    /// Angle between the element tangents (beam-beam only).
    pub angle: f64,
}

/// Read-only per-evaluation state shared by all pairs.
pub struct EvalContext<'a> {
    pub disc: &'a Discretization,
    pub positions: &'a [Vector3],
    pub velocities: Option<&'a [Vector3]>,
}

/// Typed contact pair. Dispatch is a match, not a vtable.
pub enum Pair {
    BeamBeam(BeamBeamPair),
    BeamSolid(BeamSolidPair),
    BeamSphere(BeamSpherePair),
}

impl Pair {
    pub fn elems(&self) -> (ElemId, ElemId) {
        match self {
            Pair::BeamBeam(p) => (p.elem1, p.elem2),
            Pair::BeamSolid(p) => (p.beam, p.surface),
            Pair::BeamSphere(p) => (p.beam, p.sphere),
        }
    }

    pub fn contact_flag(&self) -> bool {
        match self {
            Pair::BeamBeam(p) => p.active,
            Pair::BeamSolid(p) => p.active,
            Pair::BeamSphere(p) => p.active,
        }
    }

    pub fn gap(&self) -> Option<f64> {
        match self {
            Pair::BeamBeam(p) => p.gap(),
            Pair::BeamSolid(p) => p.gap(),
            Pair::BeamSphere(p) => p.gap(),
        }
    }

    pub fn contact_force(&self) -> Option<f64> {
        match self {
            Pair::BeamBeam(p) => p.contact_force(),
            Pair::BeamSolid(p) => p.contact_force(),
            Pair::BeamSphere(p) => p.contact_force(),
        }
    }

    pub fn energy(&self) -> f64 {
        match self {
            Pair::BeamBeam(p) => p.energy(),
            Pair::BeamSolid(p) => p.energy(),
            Pair::BeamSphere(p) => p.energy(),
        }
    }

    /// Contact points of the last evaluation; parametrized on the first
    /// (beam) element via `xi1`.
    pub fn contact_points(&self) -> &[ContactPoint] {
        match self {
            Pair::BeamBeam(p) => &p.contact_points,
            Pair::BeamSolid(p) => &p.contact_points,
            Pair::BeamSphere(p) => p
                .contact_point
                .as_ref()
                .map(std::slice::from_ref)
                .unwrap_or(&[]),
        }
    }

    fn shift(&self) -> bool {
        match self {
            Pair::BeamBeam(p) => p.shift,
            _ => false,
        }
    }

    fn lambda_mut(&mut self) -> &mut f64 {
        match self {
            Pair::BeamBeam(p) => &mut p.lambda,
            Pair::BeamSolid(p) => &mut p.lambda,
            Pair::BeamSphere(p) => &mut p.lambda,
        }
    }

    fn update_class_variables_step(&mut self) {
        match self {
            Pair::BeamBeam(p) => p.update_class_variables_step(),
            Pair::BeamSolid(p) => p.update_class_variables_step(),
            Pair::BeamSphere(p) => p.update_class_variables_step(),
        }
    }

    fn evaluate(
        &mut self,
        ctx: &EvalContext,
        params: &BeamContactParams,
        model: &PenaltyModel,
        pp: f64,
        stiff: &mut FeMatrix,
        fc: &mut FeVector,
    ) -> bool {
        match self {
            Pair::BeamBeam(p) => p.evaluate(ctx, params, model, pp, stiff, fc),
            Pair::BeamSolid(p) => p.evaluate(ctx, params, model, pp, stiff, fc),
            Pair::BeamSphere(p) => p.evaluate(ctx, params, model, pp, stiff, fc),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PairKind {
    BeamBeam,
    BeamSolid,
    BeamSphere,
}

/// Summary counters of one evaluation, for the driver and the log.
#[derive(Copy, Clone, Debug, Default)]
pub struct EvalSummary {
    pub num_pairs: usize,
    pub num_active: usize,
    pub min_gap: f64,
    pub energy: f64,
    /// A pair reported coincident contact points; the driver should perturb
    /// and re-iterate.
    pub shift_pending: bool,
}

pub struct PairRegistry {
    params: BeamContactParams,
    pot_params: Option<BeamPotentialParams>,
    time: TimeIntParams,
    model: PenaltyModel,
    search: ProximitySearch,
    pairs: AHashMap<(ElemId, ElemId), Pair>,
    pot_pairs: AHashMap<(ElemId, ElemId), PotentialPair>,
    active_set: ActiveSet,
    /// Current beam-beam penalty parameter; grown by the Uzawa schedule.
    current_pp: f64,
    uzawa_iter: usize,
    constraint_norm: f64,
    prev_constraint_norm: f64,
    /// Completed contact force of the current/previous step for the
    /// generalised-alpha combination.
    fc_current: Vec<f64>,
    fc_old: Vec<f64>,
    prev_positions: Option<Vec<Vector3>>,
}

impl PairRegistry {
    pub fn new(
        params: BeamContactParams,
        pot_params: Option<BeamPotentialParams>,
        time: TimeIntParams,
    ) -> Result<Self, Error> {
        let params = params.validated()?;
        let pot_params = pot_params.map(|p| p.validated()).transpose()?;
        let time = time.validated()?;
        let model = PenaltyModel::new(params.penalty_law, params.g0, params.f0, params.c0);
        let current_pp = params.btb_penalty;
        let search = ProximitySearch::new(params.search);
        Ok(PairRegistry {
            params,
            pot_params,
            time,
            model,
            search,
            pairs: AHashMap::new(),
            pot_pairs: AHashMap::new(),
            active_set: ActiveSet::new(),
            current_pp,
            uzawa_iter: 0,
            constraint_norm: f64::INFINITY,
            prev_constraint_norm: f64::INFINITY,
            fc_current: Vec::new(),
            fc_old: Vec::new(),
            prev_positions: None,
        })
    }

    /// Canonical slot order and pair type for a candidate, or `None` when
    /// the combination is not handled (no beam, or a gated cross type).
    fn canonicalize(
        &self,
        disc: &Discretization,
        a: ElemId,
        b: ElemId,
    ) -> Option<(ElemId, ElemId, PairKind)> {
        let ea = disc.element(a);
        let eb = disc.element(b);
        match (ea.is_beam(), eb.is_beam()) {
            (true, true) => {
                let (e1, e2) = if a < b { (a, b) } else { (b, a) };
                Some((e1, e2, PairKind::BeamBeam))
            }
            (true, false) => self.cross_kind(disc, a, b).map(|k| (a, b, k)),
            (false, true) => self.cross_kind(disc, b, a).map(|k| (b, a, k)),
            (false, false) => None,
        }
    }

    fn cross_kind(&self, disc: &Discretization, _beam: ElemId, other: ElemId) -> Option<PairKind> {
        let e = disc.element(other);
        if e.is_sphere() && self.params.btsph {
            Some(PairKind::BeamSphere)
        } else if e.shape.is_surface() && self.params.btsol {
            Some(PairKind::BeamSolid)
        } else {
            None
        }
    }

    /// Rebuild the pair map from this step's candidates, moving surviving
    /// pairs over from the previous map so their history is preserved.
    pub fn fill_pairs(&mut self, disc: &Discretization, candidates: &[(ElemId, ElemId)]) {
        let mut old = std::mem::take(&mut self.pairs);
        let mut old_pot = std::mem::take(&mut self.pot_pairs);
        let mut carried = 0usize;
        for &(a, b) in candidates {
            let (e1, e2, kind) = match self.canonicalize(disc, a, b) {
                Some(c) => c,
                None => continue,
            };
            let key = (e1, e2);
            if !self.pairs.contains_key(&key) {
                let pair = match old.remove(&key) {
                    Some(existing) => {
                        carried += 1;
                        existing
                    }
                    None => match kind {
                        PairKind::BeamBeam => Pair::BeamBeam(BeamBeamPair::new(e1, e2)),
                        PairKind::BeamSolid => Pair::BeamSolid(BeamSolidPair::new(e1, e2)),
                        PairKind::BeamSphere => Pair::BeamSphere(BeamSpherePair::new(e1, e2)),
                    },
                };
                self.pairs.insert(key, pair);
            }
            // Potential pairs track beam-beam and beam-sphere candidates
            // through their own map.
            if self.pot_params.is_some() && kind != PairKind::BeamSolid {
                if !self.pot_pairs.contains_key(&key) {
                    let pair = old_pot
                        .remove(&key)
                        .unwrap_or_else(|| PotentialPair::new(e1, e2));
                    self.pot_pairs.insert(key, pair);
                }
            }
        }
        debug!(
            "pair registry: {} contact pairs ({} carried over), {} potential pairs",
            self.pairs.len(),
            carried,
            self.pot_pairs.len()
        );
    }

    /// Search, fill the pair maps and evaluate all pairs into the supplied
    /// assemblers. `stiff` and `residual` receive the generalised-alpha
    /// scaled contributions; `new_sti` additionally scales the matrix by
    /// `1 - alpha_f`. Collective.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        disc: &Discretization,
        positions: &[Vector3],
        velocities: Option<&[Vector3]>,
        stiff: &mut FeMatrix,
        residual: &mut FeVector,
        new_sti: bool,
        comm: &dyn Comm,
    ) -> Result<EvalSummary, Error> {
        let candidates = self
            .search
            .search(disc, positions, self.params.ext, comm);
        self.fill_pairs(disc, &candidates);

        let ctx = EvalContext {
            disc,
            positions,
            velocities,
        };
        let ndof = disc.dof_row_map().len();
        let row_owner: Vec<usize> = (0..ndof)
            .map(|i| disc.dof_owner(crate::mesh::DofId(i)))
            .collect();
        let mut fc = FeVector::new(ndof, row_owner, comm.rank());

        let mut summary = EvalSummary {
            min_gap: f64::INFINITY,
            ..Default::default()
        };

        // Deterministic evaluation order.
        let mut keys: Vec<(ElemId, ElemId)> = self.pairs.keys().copied().collect();
        keys.sort_unstable();
        // (node, gap, force, pp) transitions deferred past the pair borrow.
        let mut transitions: Vec<(NodeId, f64, f64, f64)> = Vec::new();
        for key in &keys {
            let pair = self.pairs.get_mut(key).expect("pair vanished");
            let pp = match pair {
                Pair::BeamBeam(_) => self.current_pp,
                Pair::BeamSolid(_) => self.params.bts_penalty,
                Pair::BeamSphere(_) => self.params.btsph_penalty,
            };
            let active = pair.evaluate(&ctx, &self.params, &self.model, pp, stiff, &mut fc);
            summary.num_pairs += 1;
            summary.shift_pending |= pair.shift();
            if active {
                summary.num_active += 1;
                summary.energy += pair.energy();
                if let Some(g) = pair.gap() {
                    summary.min_gap = summary.min_gap.min(g);
                }
                collect_contact_nodes(disc, pair, pp, &mut transitions);
            }
        }
        let bound = FrictionBound::Coulomb {
            mu: self.params.friction_coeff,
        };
        for (node, gap, force, pp) in transitions {
            // Frictionless setup carries no tangential trial traction.
            self.active_set
                .transition(node, force, gap, 0.0, pp, self.params.kappa, bound);
        }

        if let Some(pot) = self.pot_params.clone() {
            let mut keys: Vec<(ElemId, ElemId)> = self.pot_pairs.keys().copied().collect();
            keys.sort_unstable();
            for key in &keys {
                let pair = self.pot_pairs.get_mut(key).expect("potential pair vanished");
                if pair.evaluate(&ctx, &pot, stiff, &mut fc) {
                    summary.energy += pair.energy();
                }
            }
        }

        fc.complete(comm)?;
        let alpha_f = self.time.alpha_f;
        if new_sti && alpha_f != 0.0 {
            stiff.scale(1.0 - alpha_f);
        }
        residual.axpy(1.0 - alpha_f, fc.as_slice());
        if alpha_f != 0.0 && self.fc_old.len() == ndof {
            residual.axpy(alpha_f, &self.fc_old);
        }
        self.fc_current = fc.as_slice().to_vec();

        if summary.min_gap == f64::INFINITY {
            summary.min_gap = 0.0;
        }
        Ok(summary)
    }

    /// Step-end update: check invariants, promote pair history, store the
    /// old contact force and positions.
    pub fn update(
        &mut self,
        disc: &Discretization,
        positions: &[Vector3],
        step: usize,
    ) -> Result<(), Error> {
        for pair in self.pairs.values() {
            if pair.shift() {
                let (e1, e2) = pair.elems();
                return Err(Error::Geometry(format!(
                    "coincident contact points on pair ({}, {}) in a converged configuration",
                    e1, e2
                )));
            }
        }

        // Under the old gap function the sign of the gap is only reliable
        // when no beam can cross another within one step.
        if !self.params.newgap {
            if let (Some(prev), Some(r_min)) = (&self.prev_positions, disc.min_beam_radius()) {
                let max_incr = positions
                    .iter()
                    .zip(prev)
                    .map(|(a, b)| (a - b).norm())
                    .fold(0.0f64, f64::max);
                if max_incr > r_min {
                    return Err(Error::TimeStepTooLarge { max_incr, r_min });
                }
            }
        }

        for pair in self.pairs.values_mut() {
            pair.update_class_variables_step();
        }
        for pair in self.pot_pairs.values_mut() {
            pair.update_class_variables_step();
        }
        self.fc_old = std::mem::take(&mut self.fc_current);
        self.prev_positions = Some(positions.to_vec());
        self.active_set.clear();
        debug!("pair registry updated at step {}", step);
        Ok(())
    }

    /// Start a fresh Uzawa loop: restore the configured penalty, clear the
    /// iteration counter and all multipliers.
    pub fn initialize_uzawa(&mut self) {
        self.current_pp = self.params.btb_penalty;
        self.uzawa_iter = 0;
        self.constraint_norm = f64::INFINITY;
        self.prev_constraint_norm = f64::INFINITY;
        self.reset_all_multipliers();
    }

    pub fn reset_all_multipliers(&mut self) {
        for pair in self.pairs.values_mut() {
            *pair.lambda_mut() = 0.0;
        }
    }

    /// Uzawa multiplier update `lambda <- lambda + pp * g` over the active
    /// pairs; advances the outer iteration counter.
    pub fn update_all_multipliers(&mut self) {
        for pair in self.pairs.values_mut() {
            if !pair.contact_flag() {
                continue;
            }
            let pp = match pair {
                Pair::BeamBeam(_) => self.current_pp,
                Pair::BeamSolid(_) => self.params.bts_penalty,
                Pair::BeamSphere(_) => self.params.btsph_penalty,
            };
            if let Some(g) = pair.gap() {
                *pair.lambda_mut() += pp * g;
            }
        }
        self.uzawa_iter += 1;
    }

    /// Global constraint norm `|min g|` over the active pairs, optionally
    /// relative to the smaller cross-section radius. Collective.
    pub fn update_constraint_norm(&mut self, disc: &Discretization, comm: &dyn Comm) -> f64 {
        let mut local_min: f64 = 0.0;
        for pair in self.pairs.values() {
            if !pair.contact_flag() {
                continue;
            }
            if let Some(mut g) = pair.gap() {
                if self.params.relative_constraint_norm {
                    let (e1, e2) = pair.elems();
                    let r = disc
                        .element(e1)
                        .radius()
                        .min(disc.element(e2).radius())
                        .max(f64::MIN_POSITIVE);
                    g /= r;
                }
                local_min = local_min.min(g);
            }
        }
        let glob_min = comm.min_all(local_min);
        self.constraint_norm = glob_min.abs();
        self.constraint_norm
    }

    /// Grow the penalty by the 1.6 schedule when the constraint norm has
    /// not contracted to a quarter of the previous outer iteration's norm.
    /// Returns whether the penalty was increased.
    pub fn increase_current_penalty(&mut self, glob_norm: f64) -> bool {
        let increase =
            self.uzawa_iter >= 2 && glob_norm >= 0.25 * self.prev_constraint_norm;
        if increase {
            self.current_pp *= 1.6;
            info!(
                "constraint norm {:.3e} did not contract; penalty raised to {:.3e}",
                glob_norm, self.current_pp
            );
        }
        self.prev_constraint_norm = glob_norm;
        increase
    }

    /// Run the full Uzawa loop around a driver-supplied inner solve.
    ///
    /// `solve` is called once per outer iteration and must bring the
    /// displacement state to equilibrium under the current multipliers
    /// (it re-invokes `evaluate` internally). Returns the number of outer
    /// iterations taken, or `Uzawa` error on exhaustion.
    pub fn uzawa_loop<F>(
        &mut self,
        disc: &Discretization,
        comm: &dyn Comm,
        mut solve: F,
    ) -> Result<usize, Error>
    where
        F: FnMut(&mut PairRegistry) -> Result<(), Error>,
    {
        debug_assert_eq!(self.params.strategy, Strategy::AugmentedLagrange);
        self.initialize_uzawa();
        for it in 0..self.params.max_uzawa_iters {
            solve(self)?;
            let norm = self.update_constraint_norm(disc, comm);
            info!("uzawa iteration {}: constraint norm {:.3e}", it, norm);
            if norm < self.params.uzawa_tol {
                return Ok(it + 1);
            }
            self.increase_current_penalty(norm);
            self.update_all_multipliers();
        }
        Err(Error::Uzawa {
            iters: self.params.max_uzawa_iters,
            norm: self.constraint_norm,
        })
    }

    /// Summary counters over all ranks, through the log. Collective.
    pub fn console_output(&self, disc: &Discretization, comm: &dyn Comm) {
        let rank = comm.rank();
        let local_active = self
            .pairs
            .values()
            .filter(|p| p.contact_flag() && disc.is_row_element(p.elems().0, rank))
            .count();
        let active = comm.sum_all_usize(local_active);
        let local_min = self
            .pairs
            .values()
            .filter(|p| p.contact_flag())
            .filter_map(|p| p.gap())
            .fold(0.0f64, f64::min);
        let min_gap = comm.min_all(local_min);
        if active > 0 {
            info!(
                "{} active contact pairs, minimal gap {:.6e}, active set {} nodes{}",
                active,
                min_gap,
                self.active_set.num_active(),
                if self.active_set.changed() {
                    " (changed)"
                } else {
                    ""
                }
            );
        } else {
            info!("no active contact pairs");
        }
        if self.pairs.values().any(|p| p.shift()) {
            warn!("shift flag pending; contact points coincided this iteration");
        }
    }

    pub fn pairs(&self) -> impl Iterator<Item = &Pair> {
        self.pairs.values()
    }

    pub fn pair(&self, e1: ElemId, e2: ElemId) -> Option<&Pair> {
        self.pairs.get(&(e1, e2))
    }

    pub fn num_pairs(&self) -> usize {
        self.pairs.len()
    }

    pub fn current_penalty(&self) -> f64 {
        self.current_pp
    }

    pub fn constraint_norm(&self) -> f64 {
        self.constraint_norm
    }

    pub fn uzawa_iter(&self) -> usize {
        self.uzawa_iter
    }

    pub fn active_set(&self) -> &ActiveSet {
        &self.active_set
    }

    pub fn energy(&self) -> f64 {
        self.pairs.values().map(|p| p.energy()).sum::<f64>()
            + self.pot_pairs.values().map(|p| p.energy()).sum::<f64>()
    }
}

/// Contact-node transitions for the active set: each contact point is
/// attributed to the beam node nearest to its parameter coordinate.
fn collect_contact_nodes(
    disc: &Discretization,
    pair: &Pair,
    pp: f64,
    out: &mut Vec<(NodeId, f64, f64, f64)>,
) {
    let (e1, _) = pair.elems();
    let beam = disc.element(e1);
    if !beam.is_beam() {
        return;
    }
    let points: Vec<(f64, f64, f64)> = match pair {
        Pair::BeamBeam(p) => p
            .contact_points
            .iter()
            .map(|cp| (cp.xi1, cp.gap, cp.force))
            .collect(),
        Pair::BeamSolid(p) => p
            .contact_points
            .iter()
            .map(|cp| (cp.xi1, cp.gap, cp.force))
            .collect(),
        Pair::BeamSphere(p) => p
            .contact_point
            .iter()
            .map(|cp| (cp.xi1, cp.gap, cp.force))
            .collect(),
    };
    for (xi, gap, force) in points {
        let node = if xi < 0.0 { beam.nodes[0] } else { beam.nodes[1] };
        out.push((node, gap, force, pp));
    }
}

/// Assemble one contact point: force `f * w_a * n` per node and the
/// consistent tangent `-w_a w_b (f' n n^T + f/d (I - n n^T))`, following the
/// driver convention `K du = -R`.
pub(crate) fn assemble_contact_point(
    disc: &Discretization,
    stiff: &mut FeMatrix,
    fc: &mut FeVector,
    weights: &[(NodeId, f64)],
    normal: &Vector3,
    dist: f64,
    force: f64,
    dforce_dgap: f64,
) {
    let nnt = normal * normal.transpose();
    let mat = nnt * (-dforce_dgap) - (Matrix3::identity() - nnt) * (force / dist);
    for &(a, wa) in weights {
        let dofs_a = disc.dof(a, 0);
        for i in 0..3 {
            fc.add(dofs_a[i], force * wa * normal[i]);
        }
        for &(b, wb) in weights {
            let dofs_b = disc.dof(b, 0);
            for i in 0..3 {
                for j in 0..3 {
                    stiff.add(dofs_a[i], dofs_b[j], wa * wb * mat[(i, j)]);
                }
            }
        }
    }
}
