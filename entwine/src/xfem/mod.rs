//! Interface-coupled background field: cut cells, nodal dof sets, Nitsche
//! coupling blocks and the semi-Lagrangean reconstruction of values at
//! nodes whose dof layout changed with the moving interface.

pub mod coupling;
pub mod cut;
pub mod dofset;
pub mod semi_lagrange;

pub use coupling::{assemble_nitsche, MergedSystem};
pub use cut::{
    BoundaryCell, CutState, InterfaceGeometry, PlaneInterface, Side, SlabInterface,
    SphereInterface, VolumeCell,
};
pub use dofset::{classify_nodes, rebuild, DofSetSummary};
pub use semi_lagrange::{SemiLagrange, TimeIntData, TimeIntState};
