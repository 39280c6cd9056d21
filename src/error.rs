//! Error types shared by every solver component.
//!
//! Fatal conditions carry the timestep and surface they occurred on so a
//! failed run can be traced back to the offending body.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AeroelasticError {
    /// A setting is missing, out of range, or inconsistent with another one.
    #[error("invalid configuration `{field}`: {reason}")]
    Config { field: String, reason: String },

    /// The circulation (or source) system could not be solved.
    #[error("singular aerodynamic system at timestep {timestep}, surface {surface}, panel {panel}")]
    SingularSystem {
        timestep: usize,
        surface: usize,
        panel: usize,
    },

    /// A NaN or infinity appeared in a solved quantity.
    #[error("non-finite {quantity} at timestep {timestep}, surface {surface}")]
    NonFinite {
        timestep: usize,
        surface: usize,
        quantity: &'static str,
    },

    /// An iterative loop hit its iteration cap in strict mode.
    #[error("{solver} did not converge at timestep {timestep} after {iterations} iterations (residual {residual:.3e})")]
    NonConvergence {
        solver: &'static str,
        timestep: usize,
        iterations: usize,
        residual: f64,
    },

    /// Array shapes or port counts do not line up.
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    Dimension {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// An operation was requested in the wrong lifecycle state.
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("VTK export failed: {0}")]
    Vtk(String),
}

pub type Result<T> = std::result::Result<T, AeroelasticError>;

impl AeroelasticError {
    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        AeroelasticError::Config {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
