//! External velocity field generators.
//!
//! A generator evaluates the inflow at a set of grid points and writes it into
//! a caller-owned buffer, either overwriting it or adding to it so that gust
//! or turbulence perturbations can be stacked on a base flow. Gust and
//! turbulent fields carry their own free stream; in additive mode only their
//! perturbation is added, so the free stream of the base flow counts once.

use std::f64::consts::PI;

use faer::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AeroelasticError, Result};
use crate::util::{add, dot, normalize, scale, Vec3};

/// Inputs for one evaluation of a velocity field.
pub struct GenerateParams<'a> {
    /// Grid points per surface `[3][n_points]`, G orientation, relative to the A origin.
    pub zeta: &'a [Mat<f64>],
    /// Position of the A frame origin in G.
    pub for_pos: Vec3,
    /// Simulation time.
    pub t: f64,
    /// Overwrite the buffer with the full velocity instead of adding the
    /// field's increment to it.
    pub overwrite: bool,
}

pub trait VelocityFieldGenerator {
    /// Velocity at an absolute position in G.
    fn velocity(&self, t: f64, position: Vec3) -> Vec3;

    /// Velocity added on top of an existing base flow.
    fn increment(&self, t: f64, position: Vec3) -> Vec3 {
        self.velocity(t, position)
    }

    /// Evaluate the field at every grid point in `params.zeta` into `u_ext`.
    fn generate(&self, params: &GenerateParams, u_ext: &mut [Mat<f64>]) {
        params
            .zeta
            .iter()
            .zip(u_ext.iter_mut())
            .for_each(|(zeta, u)| {
                if params.overwrite {
                    *u = Mat::zeros(3, zeta.ncols());
                }
                (0..zeta.ncols()).for_each(|j| {
                    let x = [
                        zeta[(0, j)] + params.for_pos[0],
                        zeta[(1, j)] + params.for_pos[1],
                        zeta[(2, j)] + params.for_pos[2],
                    ];
                    let v = if params.overwrite {
                        self.velocity(params.t, x)
                    } else {
                        self.increment(params.t, x)
                    };
                    u[(0, j)] += v[0];
                    u[(1, j)] += v[1];
                    u[(2, j)] += v[2];
                });
            });
    }
}

/// Velocity field variants, selected by the `type` key of the settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VelocityField {
    Steady(SteadyVelocityField),
    Shear(ShearVelocityField),
    Gust(GustVelocityField),
    Turbulent(TurbulentVelocityField),
}

impl Default for VelocityField {
    fn default() -> Self {
        VelocityField::Steady(SteadyVelocityField::default())
    }
}

impl VelocityField {
    pub fn validate(&self) -> Result<()> {
        match self {
            VelocityField::Steady(f) => f.validate(),
            VelocityField::Shear(f) => f.validate(),
            VelocityField::Gust(f) => f.validate(),
            VelocityField::Turbulent(f) => f.validate(),
        }
    }

    /// Free stream speed and unit direction of the base flow.
    pub fn free_stream(&self) -> (f64, Vec3) {
        match self {
            VelocityField::Steady(f) => (f.u_inf, normalize(f.u_inf_direction)),
            VelocityField::Shear(f) => (f.u_inf, normalize(f.u_inf_direction)),
            VelocityField::Gust(f) => (f.u_inf, normalize(f.u_inf_direction)),
            VelocityField::Turbulent(f) => (f.u_inf, normalize(f.u_inf_direction)),
        }
    }
}

impl VelocityFieldGenerator for VelocityField {
    fn velocity(&self, t: f64, position: Vec3) -> Vec3 {
        match self {
            VelocityField::Steady(f) => f.velocity(t, position),
            VelocityField::Shear(f) => f.velocity(t, position),
            VelocityField::Gust(f) => f.velocity(t, position),
            VelocityField::Turbulent(f) => f.velocity(t, position),
        }
    }

    fn increment(&self, t: f64, position: Vec3) -> Vec3 {
        match self {
            VelocityField::Steady(f) => f.velocity(t, position),
            VelocityField::Shear(f) => f.velocity(t, position),
            VelocityField::Gust(f) => f.gust(t, position),
            VelocityField::Turbulent(f) => f.fluctuation(t, position),
        }
    }
}

fn check_direction(field: &str, direction: Vec3) -> Result<()> {
    if dot(direction, direction) < f64::EPSILON {
        return Err(AeroelasticError::config(field, "direction must be non-zero"));
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> Result<()> {
    if value >= 0. && value.is_finite() {
        Ok(())
    } else {
        Err(AeroelasticError::config(
            field,
            format!("must be non-negative and finite, got {value}"),
        ))
    }
}

//------------------------------------------------------------------------------
// Steady uniform flow
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SteadyVelocityField {
    pub u_inf: f64,
    pub u_inf_direction: Vec3,
}

impl Default for SteadyVelocityField {
    fn default() -> Self {
        Self {
            u_inf: 0.,
            u_inf_direction: [1., 0., 0.],
        }
    }
}

impl SteadyVelocityField {
    fn validate(&self) -> Result<()> {
        check_non_negative("velocity_field.u_inf", self.u_inf)?;
        check_direction("velocity_field.u_inf_direction", self.u_inf_direction)
    }

    pub fn velocity(&self, _t: f64, _position: Vec3) -> Vec3 {
        scale(self.u_inf, normalize(self.u_inf_direction))
    }
}

//------------------------------------------------------------------------------
// Power law shear
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShearVelocityField {
    pub u_inf: f64,            // Speed at the reference height
    pub u_inf_direction: Vec3, // Flow direction
    pub h_ref: f64,            // Reference height
    pub shear_exp: f64,        // Vertical shear exponent
    pub h_corr: f64,           // Height of the A origin above ground
    pub vertical: Vec3,        // Direction of increasing height
}

impl Default for ShearVelocityField {
    fn default() -> Self {
        Self {
            u_inf: 0.,
            u_inf_direction: [1., 0., 0.],
            h_ref: 1.,
            shear_exp: 0.,
            h_corr: 0.,
            vertical: [0., 0., 1.],
        }
    }
}

impl ShearVelocityField {
    fn validate(&self) -> Result<()> {
        check_non_negative("velocity_field.u_inf", self.u_inf)?;
        check_direction("velocity_field.u_inf_direction", self.u_inf_direction)?;
        check_direction("velocity_field.vertical", self.vertical)?;
        if self.h_ref <= 0. {
            return Err(AeroelasticError::config(
                "velocity_field.h_ref",
                "must be positive",
            ));
        }
        Ok(())
    }

    pub fn velocity(&self, _t: f64, position: Vec3) -> Vec3 {
        // Height above ground, clipped so the power law stays real
        let h = (dot(position, normalize(self.vertical)) + self.h_corr).max(0.);
        let vh = self.u_inf * (h / self.h_ref).powf(self.shear_exp);
        scale(vh, normalize(self.u_inf_direction))
    }
}

//------------------------------------------------------------------------------
// Discrete gusts
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GustProfile {
    OneMinusCosine,
    Step,
    Sine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GustVelocityField {
    pub u_inf: f64,
    pub u_inf_direction: Vec3,
    pub profile: GustProfile,
    pub u_de: f64,           // Gust design velocity
    pub gust_length: f64,    // Gust length (or wavelength for `Sine`)
    pub offset: f64,         // Distance of the gust front ahead of the origin at t = 0
    pub gust_direction: Vec3, // Direction of the gust velocity
}

impl Default for GustVelocityField {
    fn default() -> Self {
        Self {
            u_inf: 0.,
            u_inf_direction: [1., 0., 0.],
            profile: GustProfile::OneMinusCosine,
            u_de: 0.,
            gust_length: 1.,
            offset: 0.,
            gust_direction: [0., 0., 1.],
        }
    }
}

impl GustVelocityField {
    fn validate(&self) -> Result<()> {
        check_non_negative("velocity_field.u_inf", self.u_inf)?;
        check_direction("velocity_field.u_inf_direction", self.u_inf_direction)?;
        check_direction("velocity_field.gust_direction", self.gust_direction)?;
        if self.gust_length <= 0. {
            return Err(AeroelasticError::config(
                "velocity_field.gust_length",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Gust amplitude at distance `s` behind the gust front.
    pub fn profile_value(&self, s: f64) -> f64 {
        if s < 0. {
            return 0.;
        }
        match self.profile {
            GustProfile::OneMinusCosine => {
                if s > self.gust_length {
                    0.
                } else {
                    0.5 * self.u_de * (1. - (2. * PI * s / self.gust_length).cos())
                }
            }
            GustProfile::Step => self.u_de,
            GustProfile::Sine => self.u_de * (2. * PI * s / self.gust_length).sin(),
        }
    }

    /// Gust velocity alone, without the free stream.
    pub fn gust(&self, t: f64, position: Vec3) -> Vec3 {
        let dir = normalize(self.u_inf_direction);
        // The gust front starts `offset` upstream and travels with the free stream
        let s = self.u_inf * t - self.offset - dot(position, dir);
        scale(self.profile_value(s), normalize(self.gust_direction))
    }

    pub fn velocity(&self, t: f64, position: Vec3) -> Vec3 {
        add(
            scale(self.u_inf, normalize(self.u_inf_direction)),
            self.gust(t, position),
        )
    }
}

//------------------------------------------------------------------------------
// Frozen turbulence
//------------------------------------------------------------------------------

/// Base flow plus a frozen perturbation box convected with the free stream.
/// `data` holds one perturbation vector per grid node, x index fastest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurbulentVelocityField {
    pub u_inf: f64,
    pub u_inf_direction: Vec3,
    pub origin: Vec3,
    pub spacing: Vec3,
    pub dims: [usize; 3],
    pub data: Vec<Vec3>,
    pub periodic: bool,
}

impl Default for TurbulentVelocityField {
    fn default() -> Self {
        Self {
            u_inf: 0.,
            u_inf_direction: [1., 0., 0.],
            origin: [0., 0., 0.],
            spacing: [1., 1., 1.],
            dims: [1, 1, 1],
            data: vec![[0., 0., 0.]],
            periodic: false,
        }
    }
}

impl TurbulentVelocityField {
    fn validate(&self) -> Result<()> {
        check_non_negative("velocity_field.u_inf", self.u_inf)?;
        check_direction("velocity_field.u_inf_direction", self.u_inf_direction)?;
        if self.spacing.iter().any(|&d| d <= 0.) {
            return Err(AeroelasticError::config(
                "velocity_field.spacing",
                "grid spacing must be positive",
            ));
        }
        let n = self.dims[0] * self.dims[1] * self.dims[2];
        if n == 0 || self.data.len() != n {
            return Err(AeroelasticError::config(
                "velocity_field.data",
                format!("expected {} grid values, found {}", n, self.data.len()),
            ));
        }
        Ok(())
    }

    fn node(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.data[i + self.dims[0] * (j + self.dims[1] * k)]
    }

    /// Lower grid index and blending weight along one axis, or `None` outside
    /// a non-periodic box.
    fn locate(&self, axis: usize, x: f64) -> Option<(usize, usize, f64)> {
        let n = self.dims[axis];
        if n == 1 {
            return Some((0, 0, 0.));
        }
        let s = x / self.spacing[axis];
        if self.periodic {
            let s = s.rem_euclid(n as f64);
            let i0 = (s.floor() as usize).min(n - 1);
            let i1 = (i0 + 1) % n;
            Some((i0, i1, s - i0 as f64))
        } else {
            if s < 0. || s > (n - 1) as f64 {
                return None;
            }
            let i0 = (s.floor() as usize).min(n - 2);
            Some((i0, i0 + 1, s - i0 as f64))
        }
    }

    /// Trilinear interpolation of the perturbation at a box-relative position.
    pub fn perturbation(&self, x: Vec3) -> Vec3 {
        let (Some((i0, i1, a)), Some((j0, j1, b)), Some((k0, k1, c))) =
            (self.locate(0, x[0]), self.locate(1, x[1]), self.locate(2, x[2]))
        else {
            return [0., 0., 0.];
        };
        let mut v = [0., 0., 0.];
        for (i, wi) in [(i0, 1. - a), (i1, a)] {
            for (j, wj) in [(j0, 1. - b), (j1, b)] {
                for (k, wk) in [(k0, 1. - c), (k1, c)] {
                    v = add(v, scale(wi * wj * wk, self.node(i, j, k)));
                }
            }
        }
        v
    }

    /// Perturbation at an absolute position; Taylor's frozen turbulence, the
    /// box moves with the mean flow.
    pub fn fluctuation(&self, t: f64, position: Vec3) -> Vec3 {
        let dir = normalize(self.u_inf_direction);
        let x = [
            position[0] - self.origin[0] - self.u_inf * t * dir[0],
            position[1] - self.origin[1] - self.u_inf * t * dir[1],
            position[2] - self.origin[2] - self.u_inf * t * dir[2],
        ];
        self.perturbation(x)
    }

    pub fn velocity(&self, t: f64, position: Vec3) -> Vec3 {
        add(
            scale(self.u_inf, normalize(self.u_inf_direction)),
            self.fluctuation(t, position),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn steady(u_inf: f64) -> VelocityField {
        VelocityField::Steady(SteadyVelocityField {
            u_inf,
            u_inf_direction: [2., 0., 0.],
        })
    }

    #[test]
    fn test_generate_overwrite_and_superpose() {
        let zeta = vec![Mat::from_fn(3, 4, |i, j| (i + j) as f64)];
        let mut u_ext = vec![Mat::from_fn(3, 4, |_, _| 7.)];

        let base = steady(10.);
        base.generate(
            &GenerateParams {
                zeta: &zeta,
                for_pos: [0., 0., 0.],
                t: 0.,
                overwrite: true,
            },
            &mut u_ext,
        );
        (0..4).for_each(|j| {
            assert_relative_eq!(u_ext[0][(0, j)], 10., epsilon = 1e-14);
            assert_relative_eq!(u_ext[0][(1, j)], 0., epsilon = 1e-14);
        });

        // Additive mode stacks a second field on top of the first
        steady(2.).generate(
            &GenerateParams {
                zeta: &zeta,
                for_pos: [0., 0., 0.],
                t: 0.,
                overwrite: false,
            },
            &mut u_ext,
        );
        (0..4).for_each(|j| assert_relative_eq!(u_ext[0][(0, j)], 12., epsilon = 1e-14));
    }

    #[test]
    fn test_perturbations_stack_on_base_flow_once() {
        let zeta = vec![Mat::from_fn(3, 2, |i, j| if i == 0 { 5. * j as f64 } else { 0. })];
        let params = |overwrite| GenerateParams {
            zeta: &zeta,
            for_pos: [0., 0., 0.],
            t: 1.,
            overwrite,
        };
        let gust = VelocityField::Gust(GustVelocityField {
            u_inf: 10.,
            u_inf_direction: [1., 0., 0.],
            u_de: 2.,
            gust_length: 10.,
            ..Default::default()
        });
        let turbulence = VelocityField::Turbulent(TurbulentVelocityField {
            u_inf: 10.,
            u_inf_direction: [1., 0., 0.],
            origin: [-20., 0., 0.],
            dims: [2, 1, 1],
            spacing: [100., 1., 1.],
            data: vec![[0., 1., 0.], [0., 1., 0.]],
            ..Default::default()
        });

        let mut u_ext = vec![Mat::zeros(3, 2)];
        steady(10.).generate(&params(true), &mut u_ext);
        gust.generate(&params(false), &mut u_ext);
        turbulence.generate(&params(false), &mut u_ext);

        // Gust peak at x = 5 at t = 1, gust front at x = 10
        assert_relative_eq!(u_ext[0][(0, 1)], 10., epsilon = 1e-14);
        assert_relative_eq!(u_ext[0][(2, 1)], 2., epsilon = 1e-12);
        assert_relative_eq!(u_ext[0][(1, 1)], 1., epsilon = 1e-14);
        assert_relative_eq!(u_ext[0][(0, 0)], 10., epsilon = 1e-14);

        // Overwriting with the gust alone gives the free stream and the gust
        gust.generate(&params(true), &mut u_ext);
        assert_relative_eq!(u_ext[0][(0, 1)], 10., epsilon = 1e-14);
        assert_relative_eq!(u_ext[0][(1, 1)], 0., epsilon = 1e-14);
    }

    #[test]
    fn test_shear_power_law() {
        struct Case {
            position: Vec3,
            vel_exp: Vec3,
        }

        let field = ShearVelocityField {
            u_inf: 10.,
            u_inf_direction: [1., 0., 0.],
            h_ref: 100.,
            shear_exp: 0.1,
            h_corr: 0.,
            vertical: [0., 0., 1.],
        };

        let cases = vec![
            Case {
                position: [0., 0., 100.],
                vel_exp: [10., 0., 0.],
            },
            Case {
                position: [0., 0., 0.],
                vel_exp: [0., 0., 0.],
            },
            Case {
                position: [100., 100., 50.],
                vel_exp: [9.330329915368074, 0., 0.],
            },
        ];

        for case in cases {
            let v = field.velocity(0., case.position);
            for i in 0..3 {
                assert_relative_eq!(v[i], case.vel_exp[i], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_one_minus_cosine_gust_travels_with_flow() {
        let gust = GustVelocityField {
            u_inf: 10.,
            u_inf_direction: [1., 0., 0.],
            profile: GustProfile::OneMinusCosine,
            u_de: 2.,
            gust_length: 10.,
            offset: 0.,
            gust_direction: [0., 0., 1.],
        };

        // Before the front arrives
        assert_relative_eq!(gust.velocity(0., [1., 0., 0.])[2], 0., epsilon = 1e-14);

        // Peak at half a gust length behind the front
        let v = gust.velocity(1., [5., 0., 0.]);
        assert_relative_eq!(v[0], 10., epsilon = 1e-14);
        assert_relative_eq!(v[2], 2., epsilon = 1e-12);

        // Tail of the gust
        assert_relative_eq!(gust.velocity(1., [0., 0., 0.])[2], 0., epsilon = 1e-12);

        // After the gust has passed
        assert_relative_eq!(gust.velocity(5., [0., 0., 0.])[2], 0., epsilon = 1e-14);
    }

    #[test]
    fn test_turbulent_box_interpolation() {
        let field = TurbulentVelocityField {
            u_inf: 0.,
            u_inf_direction: [1., 0., 0.],
            origin: [0., 0., 0.],
            spacing: [1., 1., 1.],
            dims: [2, 1, 1],
            data: vec![[0., 0., 0.], [0., 0., 4.]],
            periodic: false,
        };
        assert_relative_eq!(field.velocity(0., [0.25, 0., 0.])[2], 1., epsilon = 1e-14);
        assert_relative_eq!(field.velocity(0., [0.75, 7., 3.])[2], 3., epsilon = 1e-14);
        assert_relative_eq!(field.velocity(0., [1.5, 0., 0.])[2], 0., epsilon = 1e-14);

        let periodic = TurbulentVelocityField {
            periodic: true,
            ..field
        };
        assert_relative_eq!(periodic.velocity(0., [1.5, 0., 0.])[2], 2., epsilon = 1e-14);
    }
}
