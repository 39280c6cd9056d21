//! Configuration schema for every solver component.
//!
//! Each struct declares its defaults once (in `Default`) and is read with
//! `#[serde(default)]`, so a missing key resolves to the declared default at
//! load time. `validate` is run before any timestep.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AeroelasticError, Result};
use crate::velocity::VelocityField;
use crate::wake::{ConvectionScheme, WakeShape, WakeTruncation};

/// Distance below which a vortex filament induces no velocity.
pub const VORTEX_RADIUS_DEFAULT: f64 = 1e-6;

//------------------------------------------------------------------------------
// Aerodynamics
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UvlmSettings {
    pub horseshoe: bool,                    // Steady horseshoe wake
    pub nonlifting_body_interactions: bool, // Solve lifting and nonlifting bodies together
    pub only_nonlifting: bool,              // Skip the lifting surfaces
    pub num_cores: usize,                   // Worker threads, 0 uses the global pool
    pub n_rollup: usize,                    // Free wake rollup iterations (static)
    pub rollup_dt: f64,                     // Pseudo time step of the rollup
    pub rollup_aic_refresh: usize,          // Rollup iterations between AIC refreshes
    pub rollup_tolerance: f64,              // Rollup convergence on induced velocity
    pub rho: f64,                           // Fluid density
    pub cfl1: bool,                         // Wake panels are one convection step long
    pub vortex_radius: f64,
    pub vortex_radius_wake_ind: f64,
    pub rbm_vel_g: [f64; 6],   // Rigid body velocity in G
    pub centre_rot_g: [f64; 3], // Centre of rotation for `rbm_vel_g`
    pub convection_scheme: ConvectionScheme,
    pub dt: f64,     // Unsteady time step
    pub strict: bool, // Non-convergence is an error instead of a warning
    pub velocity_field: VelocityField,
}

impl Default for UvlmSettings {
    fn default() -> Self {
        Self {
            horseshoe: false,
            nonlifting_body_interactions: false,
            only_nonlifting: false,
            num_cores: 0,
            n_rollup: 0,
            rollup_dt: 0.1,
            rollup_aic_refresh: 1,
            rollup_tolerance: 1e-4,
            rho: 1.225,
            cfl1: true,
            vortex_radius: VORTEX_RADIUS_DEFAULT,
            vortex_radius_wake_ind: VORTEX_RADIUS_DEFAULT,
            rbm_vel_g: [0.; 6],
            centre_rot_g: [0.; 3],
            convection_scheme: ConvectionScheme::Prescribed,
            dt: 0.1,
            strict: false,
            velocity_field: VelocityField::default(),
        }
    }
}

impl UvlmSettings {
    pub fn validate(&self) -> Result<()> {
        positive("uvlm.rho", self.rho)?;
        positive("uvlm.vortex_radius", self.vortex_radius)?;
        positive("uvlm.vortex_radius_wake_ind", self.vortex_radius_wake_ind)?;
        positive("uvlm.dt", self.dt)?;
        positive("uvlm.rollup_dt", self.rollup_dt)?;
        positive("uvlm.rollup_tolerance", self.rollup_tolerance)?;
        if self.rollup_aic_refresh == 0 {
            return Err(AeroelasticError::config(
                "uvlm.rollup_aic_refresh",
                "must be at least 1",
            ));
        }
        if self.only_nonlifting && self.nonlifting_body_interactions {
            return Err(AeroelasticError::config(
                "uvlm.only_nonlifting",
                "cannot be combined with nonlifting_body_interactions",
            ));
        }
        self.velocity_field.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeSettings {
    pub mstar: usize, // Maximum number of wake panel rows
    pub shape: WakeShape,
    pub truncation: WakeTruncation,
}

impl Default for WakeSettings {
    fn default() -> Self {
        Self {
            mstar: 10,
            shape: WakeShape::default(),
            truncation: WakeTruncation::Truncate,
        }
    }
}

impl WakeSettings {
    pub fn validate(&self, horseshoe: bool) -> Result<()> {
        if self.mstar == 0 {
            return Err(AeroelasticError::config("wake.mstar", "must be at least 1"));
        }
        if horseshoe && self.mstar != 1 {
            return Err(AeroelasticError::config(
                "wake.mstar",
                "horseshoe wakes have exactly one row",
            ));
        }
        self.shape.validate()?;
        self.truncation.validate()
    }
}

//------------------------------------------------------------------------------
// Coupling
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticCoupledSettings {
    pub max_iter: usize,
    pub n_load_steps: usize,
    pub tolerance: f64,         // Relative change of structural positions
    pub relaxation_factor: f64, // Weight of the previous iteration's loads
    pub minimum_steps: usize,   // Iterations per load step before convergence is checked
    pub strict: bool,
}

impl Default for StaticCoupledSettings {
    fn default() -> Self {
        Self {
            max_iter: 100,
            n_load_steps: 1,
            tolerance: 1e-5,
            relaxation_factor: 0.,
            minimum_steps: 0,
            strict: false,
        }
    }
}

impl StaticCoupledSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(AeroelasticError::config(
                "static_coupled.max_iter",
                "must be at least 1",
            ));
        }
        if self.n_load_steps == 0 {
            return Err(AeroelasticError::config(
                "static_coupled.n_load_steps",
                "must be at least 1",
            ));
        }
        positive("static_coupled.tolerance", self.tolerance)?;
        unit_interval("static_coupled.relaxation_factor", self.relaxation_factor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicCoupledSettings {
    pub n_time_steps: usize,
    pub dt: f64,
    pub fsi_substeps: usize,
    pub fsi_tolerance: f64,
    pub relaxation_factor: f64,
    pub minimum_steps: usize, // FSI substeps before convergence is checked
    pub include_unsteady_force_contribution: bool,
    pub strict: bool,
}

impl Default for DynamicCoupledSettings {
    fn default() -> Self {
        Self {
            n_time_steps: 100,
            dt: 0.05,
            fsi_substeps: 70,
            fsi_tolerance: 1e-5,
            relaxation_factor: 0.2,
            minimum_steps: 1,
            include_unsteady_force_contribution: true,
            strict: false,
        }
    }
}

impl DynamicCoupledSettings {
    pub fn validate(&self) -> Result<()> {
        positive("dynamic_coupled.dt", self.dt)?;
        positive("dynamic_coupled.fsi_tolerance", self.fsi_tolerance)?;
        if self.fsi_substeps == 0 {
            return Err(AeroelasticError::config(
                "dynamic_coupled.fsi_substeps",
                "must be at least 1",
            ));
        }
        unit_interval("dynamic_coupled.relaxation_factor", self.relaxation_factor)
    }
}

//------------------------------------------------------------------------------
// Post-processing and linear analysis
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForcesSettings {
    pub write_text_file: bool,
    pub text_file_name: String,
    pub screen_output: bool,
    pub unsteady: bool, // Add unsteady contributions to the screen output
    pub coefficients: bool,
    pub q_ref: f64,
    #[serde(rename = "S_ref", alias = "s_ref")]
    pub s_ref: f64,
    pub b_ref: f64,
    pub c_ref: f64,
}

impl Default for ForcesSettings {
    fn default() -> Self {
        Self {
            write_text_file: false,
            text_file_name: "aeroforces.txt".to_string(),
            screen_output: true,
            unsteady: false,
            coefficients: false,
            q_ref: 1.,
            s_ref: 1.,
            b_ref: 1.,
            c_ref: 1.,
        }
    }
}

impl ForcesSettings {
    pub fn validate(&self) -> Result<()> {
        positive("forces.q_ref", self.q_ref)?;
        positive("forces.S_ref", self.s_ref)?;
        positive("forces.b_ref", self.b_ref)?;
        positive("forces.c_ref", self.c_ref)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSettings {
    pub dt: f64,
    pub num_dof_rig: usize, // Rigid body degrees of freedom appended after the flexible ones
    pub unsteady_force: bool,
    pub velocity_terms_in_beam: bool, // Frozen-circulation velocity loads enter the beam damping
}

impl Default for LinearSettings {
    fn default() -> Self {
        Self {
            dt: 0.1,
            num_dof_rig: 0,
            unsteady_force: true,
            velocity_terms_in_beam: true,
        }
    }
}

impl LinearSettings {
    pub fn validate(&self) -> Result<()> {
        positive("linear.dt", self.dt)?;
        if self.num_dof_rig != 0 && self.num_dof_rig != 6 {
            return Err(AeroelasticError::config(
                "linear.num_dof_rig",
                "must be 0 (clamped) or 6 (free flying)",
            ));
        }
        Ok(())
    }
}

//------------------------------------------------------------------------------
// Complete simulation file
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub uvlm: UvlmSettings,
    pub wake: WakeSettings,
    pub static_coupled: StaticCoupledSettings,
    pub dynamic_coupled: DynamicCoupledSettings,
    pub forces: ForcesSettings,
    pub linear: LinearSettings,
}

impl SimulationConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: SimulationConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&s)
    }

    pub fn validate(&self) -> Result<()> {
        self.uvlm.validate()?;
        self.wake.validate(self.uvlm.horseshoe)?;
        self.static_coupled.validate()?;
        self.dynamic_coupled.validate()?;
        self.forces.validate()?;
        self.linear.validate()
    }
}

fn positive(field: &str, value: f64) -> Result<()> {
    if value > 0. && value.is_finite() {
        Ok(())
    } else {
        Err(AeroelasticError::config(
            field,
            format!("must be positive and finite, got {value}"),
        ))
    }
}

fn unit_interval(field: &str, value: f64) -> Result<()> {
    if (0. ..1.).contains(&value) {
        Ok(())
    } else {
        Err(AeroelasticError::config(
            field,
            format!("must be in [0, 1), got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velocity::VelocityField;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = SimulationConfig::from_yaml_str(
            "
uvlm:
  rho: 1.0
  horseshoe: true
wake:
  mstar: 1
forces:
  S_ref: 32.0
",
        )
        .unwrap();
        assert_eq!(config.uvlm.rho, 1.0);
        assert!(config.uvlm.horseshoe);
        assert_eq!(config.uvlm.n_rollup, 0);
        assert_eq!(config.uvlm.vortex_radius, VORTEX_RADIUS_DEFAULT);
        assert_eq!(config.forces.s_ref, 32.0);
        assert_eq!(config.forces.q_ref, 1.0);
        assert_eq!(config.static_coupled.max_iter, 100);
        assert!(matches!(config.uvlm.velocity_field, VelocityField::Steady(_)));
    }

    #[test]
    fn test_velocity_field_variant_selected_from_tag() {
        let config = SimulationConfig::from_yaml_str(
            "
uvlm:
  velocity_field:
    type: Gust
    u_inf: 10.0
    u_inf_direction: [1.0, 0.0, 0.0]
    profile: OneMinusCosine
    u_de: 2.0
    gust_length: 5.0
",
        )
        .unwrap();
        assert!(matches!(config.uvlm.velocity_field, VelocityField::Gust(_)));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        struct Case {
            yaml: &'static str,
            field: &'static str,
        }

        let cases = vec![
            Case {
                yaml: "uvlm: {rho: -1.0}",
                field: "uvlm.rho",
            },
            Case {
                yaml: "uvlm: {horseshoe: true}\nwake: {mstar: 4}",
                field: "wake.mstar",
            },
            Case {
                yaml: "static_coupled: {relaxation_factor: 1.5}",
                field: "static_coupled.relaxation_factor",
            },
            Case {
                yaml: "forces: {q_ref: 0.0}",
                field: "forces.q_ref",
            },
            Case {
                yaml: "linear: {num_dof_rig: 3}",
                field: "linear.num_dof_rig",
            },
        ];

        for case in cases {
            match SimulationConfig::from_yaml_str(case.yaml) {
                Err(AeroelasticError::Config { field, .. }) => assert_eq!(field, case.field),
                other => panic!("expected config error for {}, got {:?}", case.field, other),
            }
        }
    }
}
