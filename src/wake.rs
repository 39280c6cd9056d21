//! Wake shape generators, convection and truncation.
//!
//! Induced velocities come from [`crate::vlm`]; this module only moves wake
//! vertices and circulation around.

use faer::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AeroelasticError, Result};
use crate::grid::{vertex_index, WakeSurface};
use crate::util::{
    add, col3, mat3_vec, norm, normalize, rotation_about_axis, scale, set_col3, sub, Vec3,
};

/// Length of the single horseshoe row in local chords.
pub const HORSESHOE_FAR_FIELD: f64 = 1e4;

/// Free stream data the shapes fall back on when a length is not given.
#[derive(Debug, Clone, Copy)]
pub struct WakeContext {
    pub u_inf: f64,
    pub direction: Vec3,
    pub dt: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum ConvectionScheme {
    /// Wake vertices move with the external flow only
    #[default]
    Prescribed,
    /// Wake vertices move with the external flow plus the induced velocity
    Free,
}

//------------------------------------------------------------------------------
// Truncation
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WakeTruncation {
    /// The oldest row is discarded once the wake holds `mstar` rows
    Truncate,
    /// Vertices further than `cutoff` from the trailing edge stop convecting,
    /// staying fixed in the inertial frame, and their panels' influence
    /// decays as `exp(-(d - cutoff) / decay)`
    FrozenDecay { cutoff: f64, decay: f64 },
}

impl Default for WakeTruncation {
    fn default() -> Self {
        WakeTruncation::Truncate
    }
}

impl WakeTruncation {
    pub fn validate(&self) -> Result<()> {
        match *self {
            WakeTruncation::Truncate => Ok(()),
            WakeTruncation::FrozenDecay { cutoff, decay } => {
                if cutoff <= 0. {
                    return Err(AeroelasticError::config(
                        "wake.truncation.cutoff",
                        "must be positive",
                    ));
                }
                if decay <= 0. {
                    return Err(AeroelasticError::config(
                        "wake.truncation.decay",
                        "must be positive",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Weight applied to a wake panel's circulation at distance `d`.
    pub fn influence_scale(&self, d: f64) -> f64 {
        match *self {
            WakeTruncation::FrozenDecay { cutoff, decay } if d > cutoff => {
                (-(d - cutoff) / decay).exp()
            }
            _ => 1.,
        }
    }

    pub fn is_frozen(&self, d: f64) -> bool {
        match *self {
            WakeTruncation::FrozenDecay { cutoff, .. } => d > cutoff,
            WakeTruncation::Truncate => false,
        }
    }
}

//------------------------------------------------------------------------------
// Shapes
//------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WakeShape {
    Straight(StraightWake),
    Helicoidal(HelicoidalWake),
}

impl Default for WakeShape {
    fn default() -> Self {
        WakeShape::Straight(StraightWake::default())
    }
}

/// Panel lengths growing geometrically: `ndx1` panels of `dx1`, then each
/// panel `r` times the previous one, capped at `dxmax`.
fn panel_steps(first: f64, n_first: usize, r: f64, max: Option<f64>, rows: usize) -> Vec<f64> {
    let mut steps: Vec<f64> = Vec::with_capacity(rows);
    (0..rows).for_each(|k| {
        let step = if k < n_first.max(1) {
            first
        } else {
            let s = steps[k - 1] * r;
            max.map_or(s, |m: f64| s.min(m))
        };
        steps.push(step);
    });
    steps
}

impl WakeShape {
    pub fn validate(&self) -> Result<()> {
        match self {
            WakeShape::Straight(s) => s.validate(),
            WakeShape::Helicoidal(h) => h.validate(),
        }
    }

    /// Wake vertices `[3][(rows + 1)(n + 1)]` trailing the given edge
    /// `[3][n + 1]`.
    pub fn generate(&self, trailing_edge: MatRef<f64>, rows: usize, ctx: &WakeContext) -> Mat<f64> {
        match self {
            WakeShape::Straight(s) => s.generate(trailing_edge, rows, ctx),
            WakeShape::Helicoidal(h) => h.generate(trailing_edge, rows, ctx),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StraightWake {
    pub dx1: Option<f64>,         // First panel length, `u_inf * dt` if absent
    pub ndx1: usize,              // Panels with length `dx1`
    pub r: f64,                   // Growth ratio after `ndx1`
    pub dxmax: Option<f64>,       // Maximum panel length
    pub direction: Option<Vec3>,  // Free stream direction if absent
}

impl Default for StraightWake {
    fn default() -> Self {
        Self {
            dx1: None,
            ndx1: 1,
            r: 1.,
            dxmax: None,
            direction: None,
        }
    }
}

impl StraightWake {
    fn validate(&self) -> Result<()> {
        if self.dx1.is_some_and(|dx| dx <= 0.) {
            return Err(AeroelasticError::config("wake.shape.dx1", "must be positive"));
        }
        if self.r <= 0. {
            return Err(AeroelasticError::config("wake.shape.r", "must be positive"));
        }
        if self.dxmax.is_some_and(|dx| dx <= 0.) {
            return Err(AeroelasticError::config("wake.shape.dxmax", "must be positive"));
        }
        Ok(())
    }

    fn generate(&self, te: MatRef<f64>, rows: usize, ctx: &WakeContext) -> Mat<f64> {
        let Some(n) = te.ncols().checked_sub(1) else {
            return Mat::zeros(3, 0);
        };
        let dir = normalize(self.direction.unwrap_or(ctx.direction));
        let steps = panel_steps(
            self.dx1.unwrap_or(ctx.u_inf * ctx.dt),
            self.ndx1,
            self.r,
            self.dxmax,
            rows,
        );
        let mut zeta_star = Mat::zeros(3, (rows + 1) * (n + 1));
        (0..=n).for_each(|i_n| {
            let mut x = col3(te, i_n);
            set_col3(zeta_star.as_mut(), vertex_index(rows, 0, i_n), x);
            steps.iter().enumerate().for_each(|(k, &dx)| {
                x = add(x, scale(dx, dir));
                set_col3(zeta_star.as_mut(), vertex_index(rows, k + 1, i_n), x);
            });
        });
        zeta_star
    }
}

/// Helix swept by the trailing edge of a rotor turning at
/// `rotation_velocity` about `centre`, convected axially at the free stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelicoidalWake {
    pub rotation_velocity: Vec3, // Rotor angular velocity (rad/s), G frame
    pub centre: Vec3,            // Point on the rotation axis, relative to the A origin
    pub dphi1: Option<f64>,      // First panel angle, `|omega| * dt` if absent
    pub ndphi1: usize,
    pub r: f64,
    pub dphimax: Option<f64>,
}

impl Default for HelicoidalWake {
    fn default() -> Self {
        Self {
            rotation_velocity: [0., 0., 1.],
            centre: [0., 0., 0.],
            dphi1: None,
            ndphi1: 1,
            r: 1.,
            dphimax: None,
        }
    }
}

impl HelicoidalWake {
    fn validate(&self) -> Result<()> {
        if norm(self.rotation_velocity) < f64::EPSILON {
            return Err(AeroelasticError::config(
                "wake.shape.rotation_velocity",
                "must be non-zero",
            ));
        }
        if self.dphi1.is_some_and(|d| d <= 0.) {
            return Err(AeroelasticError::config("wake.shape.dphi1", "must be positive"));
        }
        if self.r <= 0. {
            return Err(AeroelasticError::config("wake.shape.r", "must be positive"));
        }
        Ok(())
    }

    fn generate(&self, te: MatRef<f64>, rows: usize, ctx: &WakeContext) -> Mat<f64> {
        let Some(n) = te.ncols().checked_sub(1) else {
            return Mat::zeros(3, 0);
        };
        let omega = norm(self.rotation_velocity);
        let axis = normalize(self.rotation_velocity);
        let steps = panel_steps(
            self.dphi1.unwrap_or(omega * ctx.dt),
            self.ndphi1,
            self.r,
            self.dphimax,
            rows,
        );
        let axial = scale(ctx.u_inf, normalize(ctx.direction));
        let mut zeta_star = Mat::zeros(3, (rows + 1) * (n + 1));
        (0..=n).for_each(|i_n| {
            let x0 = col3(te, i_n);
            set_col3(zeta_star.as_mut(), vertex_index(rows, 0, i_n), x0);
            let mut phi = 0.;
            steps.iter().enumerate().for_each(|(k, &dphi)| {
                phi += dphi;
                // Vorticity shed `phi / omega` seconds ago, rotated back
                let rot = rotation_about_axis(axis, -phi);
                let r = mat3_vec(rot.as_ref(), sub(x0, self.centre));
                let x = add(add(self.centre, r), scale(phi / omega, axial));
                set_col3(zeta_star.as_mut(), vertex_index(rows, k + 1, i_n), x);
            });
        });
        zeta_star
    }
}

//------------------------------------------------------------------------------
// Wake construction and convection
//------------------------------------------------------------------------------

/// Wake of `rows` rows generated from the trailing edge, every row carrying
/// the trailing edge circulation.
pub fn generate_wake(
    shape: &WakeShape,
    trailing_edge: MatRef<f64>,
    te_gamma: &[f64],
    rows: usize,
    ctx: &WakeContext,
) -> WakeSurface {
    if trailing_edge.ncols() < 2 {
        return WakeSurface::empty(trailing_edge);
    }
    let n = trailing_edge.ncols() - 1;
    let zeta_star = shape.generate(trailing_edge, rows, ctx);
    let gamma_star = Mat::from_fn(rows, n, |_, i_n| te_gamma[i_n]);
    WakeSurface::from_vertices(zeta_star, gamma_star, n)
}

/// Single row horseshoe wake reaching `HORSESHOE_FAR_FIELD` local chords
/// downstream along `direction`.
pub fn horseshoe_wake(
    trailing_edge: MatRef<f64>,
    chords: &[f64],
    te_gamma: &[f64],
    direction: Vec3,
) -> WakeSurface {
    if trailing_edge.ncols() < 2 {
        return WakeSurface::empty(trailing_edge);
    }
    let n = trailing_edge.ncols() - 1;
    let dir = normalize(direction);
    let zeta_star = Mat::from_fn(3, 2 * (n + 1), |i, v| {
        let (i_m, i_n) = (v % 2, v / 2);
        trailing_edge[(i, i_n)] + (i_m as f64) * HORSESHOE_FAR_FIELD * chords[i_n] * dir[i]
    });
    let gamma_star = Mat::from_fn(1, n, |_, i_n| te_gamma[i_n]);
    WakeSurface::from_vertices(zeta_star, gamma_star, n)
}

/// Moves every wake vertex by `velocity * dt`; vertices frozen by the
/// truncation rule stay put. `velocity` is `[3][n_vertices]`.
pub fn convect_vertices(
    wake: &mut WakeSurface,
    velocity: MatRef<f64>,
    dt: f64,
    truncation: &WakeTruncation,
) {
    (0..wake.n_vertices()).for_each(|v| {
        if truncation.is_frozen(wake.dist_to_orig[v]) {
            return;
        }
        let x = add(col3(wake.zeta_star.as_ref(), v), scale(dt, col3(velocity, v)));
        set_col3(wake.zeta_star.as_mut(), v, x);
    });
}

/// Sheds a new row at the trailing edge: every vertex row moves one row
/// downstream, the oldest row is dropped once `mstar` rows exist, row 0 is
/// placed on the trailing edge and the new panel row takes `te_gamma`.
pub fn shift_rows(
    wake: &mut WakeSurface,
    trailing_edge: MatRef<f64>,
    te_gamma: &[f64],
    mstar: usize,
) {
    let n = wake.n;
    let rows = (wake.rows + 1).min(mstar);
    let old_rows = wake.rows;
    let zeta_star = Mat::from_fn(3, (rows + 1) * (n + 1), |i, v| {
        let (i_m, i_n) = (v % (rows + 1), v / (rows + 1));
        if i_m == 0 {
            trailing_edge[(i, i_n)]
        } else {
            wake.zeta_star[(i, vertex_index(old_rows, i_m - 1, i_n))]
        }
    });
    let gamma_star = Mat::from_fn(rows, n, |i_m, i_n| {
        if i_m == 0 {
            te_gamma[i_n]
        } else {
            wake.gamma_star[(i_m - 1, i_n)]
        }
    });
    *wake = WakeSurface::from_vertices(zeta_star, gamma_star, n);
}

/// Rebuilds the wake from its shape and carries the circulation over by
/// linear interpolation in distance from the trailing edge. The trailing
/// edge circulation anchors distance zero; circulation that has not reached
/// a new panel is zero.
pub fn regenerate_and_interpolate(
    wake: &mut WakeSurface,
    shape: &WakeShape,
    trailing_edge: MatRef<f64>,
    te_gamma: &[f64],
    mstar: usize,
    ctx: &WakeContext,
) {
    let n = wake.n;
    let old = wake.clone();
    let mut new = WakeSurface::from_vertices(
        shape.generate(trailing_edge, mstar, ctx),
        Mat::zeros(mstar, n),
        n,
    );

    // Distance of the old vertices from the new trailing edge
    let offset: Vec<f64> = (0..=n)
        .map(|i_n| {
            norm(sub(old.vertex(0, i_n), col3(trailing_edge, i_n)))
        })
        .collect();

    (0..n).for_each(|i_n| {
        let mut s = vec![0.];
        let mut g = vec![te_gamma[i_n]];
        (0..old.rows).for_each(|i_m| {
            let d = old.panel_distance(i_m, i_n) + 0.5 * (offset[i_n] + offset[i_n + 1]);
            s.push(d);
            g.push(old.gamma_star[(i_m, i_n)]);
        });
        (0..mstar).for_each(|i_m| {
            let d = new.panel_distance(i_m, i_n);
            new.gamma_star[(i_m, i_n)] = interpolate(&s, &g, d);
        });
    });
    *wake = new;
}

/// Piecewise linear interpolation on increasing abscissae, zero beyond the
/// last point.
fn interpolate(s: &[f64], g: &[f64], x: f64) -> f64 {
    if x <= s[0] {
        return g[0];
    }
    match s.windows(2).position(|w| x >= w[0] && x <= w[1]) {
        Some(i) => {
            let w = s[i + 1] - s[i];
            if w <= f64::EPSILON {
                g[i + 1]
            } else {
                g[i] + (g[i + 1] - g[i]) * (x - s[i]) / w
            }
        }
        None => 0.,
    }
}
