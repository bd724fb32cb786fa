//! Per-contact-node active-set state machine.
//!
//! Transitions run once per outer Newton iteration from the semi-smooth
//! complementarity rule: a node activates when `lambda_n - kappa*pp*g >= 0`;
//! an active node slips when the tangential trial traction exceeds the
//! friction bound, else it sticks. Every transition flips the changed flag
//! so the outer driver knows the active set moved.

use crate::mesh::NodeId;
use ahash::AHashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContactState {
    Inactive,
    Stick,
    Slip,
}

/// Friction bound of the tangential traction.
#[derive(Copy, Clone, Debug)]
pub enum FrictionBound {
    /// `mu * max(0, lambda_n)`.
    Coulomb { mu: f64 },
    /// Constant bound.
    Tresca { bound: f64 },
}

impl FrictionBound {
    fn value(&self, lambda_n: f64) -> f64 {
        match *self {
            FrictionBound::Coulomb { mu } => mu * lambda_n.max(0.0),
            FrictionBound::Tresca { bound } => bound,
        }
    }
}

/// Pure transition rule; exposed for testing.
pub fn next_state(
    lambda_n: f64,
    gap: f64,
    trial_tangential: f64,
    pp: f64,
    kappa: f64,
    bound: FrictionBound,
) -> ContactState {
    if lambda_n - kappa * pp * gap < 0.0 {
        return ContactState::Inactive;
    }
    if trial_tangential > bound.value(lambda_n) {
        ContactState::Slip
    } else {
        ContactState::Stick
    }
}

/// Active-set bookkeeping over the contact nodes of one rank.
#[derive(Debug, Default)]
pub struct ActiveSet {
    states: AHashMap<NodeId, ContactState>,
    changed: bool,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the transition rule to `node`, returning the new state.
    pub fn transition(
        &mut self,
        node: NodeId,
        lambda_n: f64,
        gap: f64,
        trial_tangential: f64,
        pp: f64,
        kappa: f64,
        bound: FrictionBound,
    ) -> ContactState {
        let next = next_state(lambda_n, gap, trial_tangential, pp, kappa, bound);
        let prev = self
            .states
            .insert(node, next)
            .unwrap_or(ContactState::Inactive);
        if prev != next {
            self.changed = true;
        }
        next
    }

    pub fn state(&self, node: NodeId) -> ContactState {
        self.states
            .get(&node)
            .copied()
            .unwrap_or(ContactState::Inactive)
    }

    pub fn num_active(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s != ContactState::Inactive)
            .count()
    }

    /// True if any node changed state since the last `reset_changed`.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Clear the change flag at the start of an outer iteration.
    pub fn reset_changed(&mut self) {
        self.changed = false;
    }

    /// Drop all per-node states (new time step).
    pub fn clear(&mut self) {
        self.states.clear();
        self.changed = false;
    }
}
