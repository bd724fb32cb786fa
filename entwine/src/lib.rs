//! Coupling core for slender-structure contact and interface-coupled
//! background fields.
//!
//! Two halves share the mesh, assembly and communication layers:
//!
//! - [`search`] and [`pairs`]: proximity search over beams, spheres and
//!   solid surfaces, a registry of contact pairs with history, penalty and
//!   augmented-Lagrange enforcement, friction transitions and power-law
//!   potential interactions.
//! - [`xfem`]: interface cut cells, nodal dof-set classification, Nitsche
//!   coupling blocks against an embedded discretization and the
//!   semi-Lagrangean reconstruction of nodal values after a cut change.
//!
//! Everything runs per rank against a [`comm::Comm`] endpoint; the serial
//! implementation is a no-op and [`comm::LocalRingComm`] wires up an
//! in-process group for tests.

pub mod assembly;
pub mod comm;
pub mod config;
pub mod gmsh;
pub mod mesh;
pub mod pairs;
pub mod penalty;
pub mod search;
pub mod shape_fn;
pub mod xfem;

pub type Vector3 = na::Vector3<f64>;
pub type Matrix3 = na::Matrix3<f64>;

pub use self::config::{
    BeamContactParams, BeamPotentialParams, Damping, PenaltyLaw, SearchStrategy, Smoothing,
    Strategy, TimeIntParams,
};
pub use self::mesh::{Discretization, DofId, Element, ElementKind, ElemId, Node, NodeId, Shape};
pub use self::pairs::{EvalSummary, Pair, PairRegistry};
pub use self::penalty::PenaltyModel;
pub use self::search::ProximitySearch;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Geometry error: {0}")]
    Geometry(String),
    #[error("Serialization error during rank exchange: {0}")]
    Pack(String),
    #[error(
        "Time step too large for contact tracking: maximum increment {max_incr:.3e} \
         exceeds the smallest beam radius {r_min:.3e}"
    )]
    TimeStepTooLarge { max_incr: f64, r_min: f64 },
    #[error("Uzawa iteration did not converge after {iters} iterations (norm {norm:.3e})")]
    Uzawa { iters: usize, norm: f64 },
    #[error("File I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
