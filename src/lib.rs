pub mod aero_solver;
pub mod config;
pub mod coupled;
pub mod error;
pub mod forces;
pub mod grid;
pub mod linear;
pub mod mapping;
pub mod output;
pub mod structure;
pub mod util;
pub mod velocity;
pub mod vlm;
pub mod wake;
