//! Linearised aeroelastic model about a converged reference state.

pub mod assembler;
pub mod beam;
pub mod state_space;
pub mod uvlm;

pub use assembler::{AssembledSystem, AssemblerState, LinAeroGains, LinearAeroelastic};
pub use beam::LinearBeam;
pub use state_space::{couple, StateSpace};
pub use uvlm::LinearUvlm;
