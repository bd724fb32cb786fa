//! Immutable configuration structs.
//!
//! Every driver keyword becomes a typed field; construction-time validation
//! turns bad input into [`Error::Config`] instead of a failure deep in the
//! step loop.

use crate::Error;
use serde::{Deserialize, Serialize};

/// Outer constraint-enforcement strategy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Penalty,
    AugmentedLagrange,
}

/// Normal contact force as a function of gap. The regularised variants need
/// the window parameters `g0`, `f0`, `c0` of [`BeamContactParams`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PenaltyLaw {
    Linear,
    Quadratic,
    LinNegQuadratic,
    LinPosQuadratic,
    LinPosCubic,
    LinDoubleQuadratic,
    LinPosExponential,
}

impl PenaltyLaw {
    /// True for the laws with a positive-gap regularisation window `[0, g0]`.
    pub fn needs_g0(self) -> bool {
        matches!(
            self,
            PenaltyLaw::LinNegQuadratic
                | PenaltyLaw::LinPosQuadratic
                | PenaltyLaw::LinPosCubic
                | PenaltyLaw::LinDoubleQuadratic
        )
    }

    pub fn needs_f0(self) -> bool {
        matches!(
            self,
            PenaltyLaw::LinPosCubic | PenaltyLaw::LinDoubleQuadratic | PenaltyLaw::LinPosExponential
        )
    }

    pub fn needs_c0(self) -> bool {
        self == PenaltyLaw::LinDoubleQuadratic
    }
}

/// Pair search strategy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategy {
    BruteForce,
    Octree,
}

/// Gap-rate damping of the contact force.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Damping {
    None,
    Enabled { param: f64, reg1: f64, reg2: f64 },
}

/// Tangent field treatment for Reissner beams.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Smoothing {
    None,
    /// Per-node tangents averaged over adjacent elements.
    Tangent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamContactParams {
    pub strategy: Strategy,
    pub penalty_law: PenaltyLaw,
    /// Beam-to-beam penalty parameter.
    pub btb_penalty: f64,
    /// Beam-to-solid penalty parameter.
    pub bts_penalty: f64,
    /// Beam-to-sphere penalty parameter.
    pub btsph_penalty: f64,
    /// Regularisation window on the positive-gap side.
    pub g0: f64,
    /// Force value at zero gap for the cubic/exponential laws.
    pub f0: f64,
    /// Transition gap of the double-quadratic law.
    pub c0: f64,
    pub damping: Damping,
    /// Search-box extrusion; must be positive.
    pub ext: f64,
    pub search: SearchStrategy,
    pub smoothing: Smoothing,
    /// Sign-consistent gap across crossings.
    pub newgap: bool,
    /// Enable beam-to-solid contact.
    pub btsol: bool,
    /// Enable beam-to-sphere contact.
    pub btsph: bool,
    /// Constraint norm relative to the smaller cross-section radius.
    pub relative_constraint_norm: bool,
    pub max_uzawa_iters: usize,
    pub uzawa_tol: f64,
    /// Coulomb friction coefficient for the stick/slip rule; zero disables
    /// frictional transitions.
    pub friction_coeff: f64,
    /// Complementarity weight in the activation rule.
    pub kappa: f64,
}

impl Default for BeamContactParams {
    fn default() -> Self {
        BeamContactParams {
            strategy: Strategy::Penalty,
            penalty_law: PenaltyLaw::Linear,
            btb_penalty: 0.0,
            bts_penalty: 0.0,
            btsph_penalty: 0.0,
            g0: -1.0,
            f0: -1.0,
            c0: -1.0,
            damping: Damping::None,
            ext: 0.0,
            search: SearchStrategy::BruteForce,
            smoothing: Smoothing::None,
            newgap: false,
            btsol: false,
            btsph: false,
            relative_constraint_norm: false,
            max_uzawa_iters: 10,
            uzawa_tol: 1e-8,
            friction_coeff: 0.0,
            kappa: 1.0,
        }
    }
}

impl BeamContactParams {
    /// Validate and freeze the configuration.
    pub fn validated(self) -> Result<Self, Error> {
        if self.btb_penalty < 0.0 || self.bts_penalty < 0.0 || self.btsph_penalty < 0.0 {
            return Err(Error::Config(
                "penalty parameters must be non-negative".to_string(),
            ));
        }
        if self.ext <= 0.0 {
            return Err(Error::Config(
                "search extrusion must be positive".to_string(),
            ));
        }
        if self.penalty_law.needs_g0() && self.g0 <= 0.0 {
            return Err(Error::Config(format!(
                "{:?} requires a positive regularisation window g0",
                self.penalty_law
            )));
        }
        if self.penalty_law.needs_f0() && self.f0 <= 0.0 {
            return Err(Error::Config(format!(
                "{:?} requires a positive zero-gap force f0",
                self.penalty_law
            )));
        }
        if self.penalty_law.needs_c0() && (self.c0 <= 0.0 || self.c0 >= self.g0) {
            return Err(Error::Config(
                "double-quadratic law requires 0 < c0 < g0".to_string(),
            ));
        }
        if let Damping::Enabled { param, reg1, reg2 } = self.damping {
            if param < 0.0 || reg1 <= reg2 {
                return Err(Error::Config(
                    "damping requires param >= 0 and reg1 > reg2".to_string(),
                ));
            }
        }
        if self.friction_coeff < 0.0 || self.kappa <= 0.0 {
            return Err(Error::Config(
                "friction coefficient must be non-negative and kappa positive".to_string(),
            ));
        }
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamPotentialParams {
    /// Interaction cutoff; pairs beyond this midpoint distance are skipped.
    pub cutoff_radius: f64,
    /// Power-law exponent m of the potential `k / r^m`.
    pub exponent: f64,
    /// Prefactor k of the potential.
    pub prefactor: f64,
}

impl BeamPotentialParams {
    pub fn validated(self) -> Result<Self, Error> {
        if self.exponent <= 0.0 {
            return Err(Error::Config(
                "potential-law exponent must be positive".to_string(),
            ));
        }
        if self.cutoff_radius <= 0.0 {
            return Err(Error::Config(
                "potential cutoff radius must be positive".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Generalised-alpha / one-step-theta time-integration parameters shared by
/// the contact evaluation and the semi-Lagrangean transport.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeIntParams {
    pub dt: f64,
    pub theta: f64,
    pub alpha_f: f64,
    pub alpha_m: f64,
    pub gamma: f64,
    /// Per-rank Newton iteration budget of the Lagrangean-origin search;
    /// the global cap is `max_newton_iter * num_ranks`.
    pub max_newton_iter: usize,
}

impl Default for TimeIntParams {
    fn default() -> Self {
        TimeIntParams {
            dt: 1e-2,
            theta: 1.0,
            alpha_f: 0.0,
            alpha_m: 0.0,
            gamma: 0.5,
            max_newton_iter: 10,
        }
    }
}

impl TimeIntParams {
    pub fn validated(self) -> Result<Self, Error> {
        if self.dt <= 0.0 {
            return Err(Error::Config("time step must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.theta) || !(0.0..=1.0).contains(&self.alpha_f) {
            return Err(Error::Config(
                "theta and alpha_f must lie in [0, 1]".to_string(),
            ));
        }
        if self.max_newton_iter == 0 {
            return Err(Error::Config(
                "Newton iteration budget must be positive".to_string(),
            ));
        }
        Ok(self)
    }
}
