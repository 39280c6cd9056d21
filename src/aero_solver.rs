//! Steady and time-marching aerodynamic solvers.
//!
//! Both read the grid geometry already placed by the caller (see
//! [`crate::grid::generate_surfaces`]), evaluate the external flow, solve for
//! the circulation and recover the vertex forces.

use faer::prelude::*;
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::config::{UvlmSettings, WakeSettings};
use crate::error::{AeroelasticError, Result};
use crate::grid::{
    vertex_index, AeroTimestep, LiftingSurface, NonliftingSurface, NonliftingTimestep, WakeSurface,
};
use crate::structure::StructTimestep;
use crate::util::{add, col3, cross, scale, set_col3, sub, Vec3};
use crate::velocity::{GenerateParams, VelocityFieldGenerator};
use crate::vlm::aic::LiftingField;
use crate::vlm::solver::{
    check_finite, max_velocity_change, nonlifting_pressure, solve_coupled, solve_lifting_static,
    solve_lifting_unsteady, solve_nonlifting, steady_forces, unsteady_forces, SolveContext,
};
use crate::vlm::Executor;
use crate::wake::{
    convect_vertices, generate_wake, horseshoe_wake, regenerate_and_interpolate, shift_rows,
    ConvectionScheme, WakeContext,
};

/// Evaluates the external flow at every vertex of the lifting surfaces and
/// nonlifting bodies, overwriting `u_ext`.
fn generate_inflow(
    settings: &UvlmSettings,
    surfaces: &mut [LiftingSurface],
    bodies: Option<&mut [NonliftingSurface]>,
    origin: Vec3,
    t: f64,
) {
    let zeta = surfaces.iter().map(|s| s.zeta.clone()).collect_vec();
    let mut u_ext = surfaces.iter().map(|s| s.u_ext.clone()).collect_vec();
    settings.velocity_field.generate(
        &GenerateParams {
            zeta: &zeta,
            for_pos: origin,
            t,
            overwrite: true,
        },
        &mut u_ext,
    );
    surfaces
        .iter_mut()
        .zip(u_ext)
        .for_each(|(s, u)| s.u_ext = u);

    if let Some(bodies) = bodies {
        let zeta = bodies.iter().map(|b| b.zeta.clone()).collect_vec();
        let mut u_ext = bodies.iter().map(|b| b.u_ext.clone()).collect_vec();
        settings.velocity_field.generate(
            &GenerateParams {
                zeta: &zeta,
                for_pos: origin,
                t,
                overwrite: true,
            },
            &mut u_ext,
        );
        bodies.iter_mut().zip(u_ext).for_each(|(b, u)| b.u_ext = u);
    }
}

/// External flow at every wake vertex `[3][n_vertices]` per wake.
fn wake_inflow(settings: &UvlmSettings, wakes: &[WakeSurface], origin: Vec3, t: f64) -> Vec<Mat<f64>> {
    let zeta = wakes.iter().map(|w| w.zeta_star.clone()).collect_vec();
    let mut u = wakes
        .iter()
        .map(|w| Mat::zeros(3, w.n_vertices()))
        .collect_vec();
    settings.velocity_field.generate(
        &GenerateParams {
            zeta: &zeta,
            for_pos: origin,
            t,
            overwrite: true,
        },
        &mut u,
    );
    u
}

fn wake_context(settings: &UvlmSettings, dt: f64) -> WakeContext {
    let (u_inf, direction) = settings.velocity_field.free_stream();
    WakeContext {
        u_inf,
        direction,
        dt,
    }
}

/// Solves the circulation (and source strengths) of one snapshot, choosing
/// between lifting only, nonlifting only, independent and coupled solves.
fn solve_system(
    settings: &UvlmSettings,
    aero: &mut AeroTimestep,
    bodies: Option<&mut [NonliftingSurface]>,
    steady: bool,
    ctx: &SolveContext,
) -> Result<()> {
    let lifting = |aero: &mut AeroTimestep| {
        if steady {
            solve_lifting_static(&mut aero.surfaces, &mut aero.wakes, ctx)
        } else {
            solve_lifting_unsteady(&mut aero.surfaces, &aero.wakes, ctx)
        }
    };
    match bodies {
        Some(bodies) if settings.only_nonlifting => solve_nonlifting(bodies, None, ctx),
        Some(bodies) if settings.nonlifting_body_interactions => {
            solve_coupled(&mut aero.surfaces, &mut aero.wakes, bodies, steady, ctx)
        }
        Some(bodies) => {
            lifting(aero)?;
            solve_nonlifting(bodies, None, ctx)
        }
        None if settings.only_nonlifting => Ok(()),
        None => lifting(aero),
    }
}

/// Force recovery shared by both solvers.
fn recover_forces(
    settings: &UvlmSettings,
    aero: &mut AeroTimestep,
    bodies: Option<&mut [NonliftingSurface]>,
    ctx: &SolveContext,
) {
    let interacting = settings.nonlifting_body_interactions;
    match bodies {
        Some(bodies) => {
            if !settings.only_nonlifting {
                let sources = if interacting { Some(&*bodies) } else { None };
                steady_forces(&mut aero.surfaces, &aero.wakes, sources, settings.rho, ctx);
            }
            let lifting = if interacting {
                Some((aero.surfaces.as_slice(), aero.wakes.as_slice()))
            } else {
                None
            };
            nonlifting_pressure(bodies, lifting, ctx);
        }
        None => {
            if !settings.only_nonlifting {
                steady_forces(&mut aero.surfaces, &aero.wakes, None, settings.rho, ctx);
            }
        }
    }
}

//------------------------------------------------------------------------------
// Steady solver
//------------------------------------------------------------------------------

pub struct StaticUvlm {
    pub settings: UvlmSettings,
    pub wake: WakeSettings,
    exec: Executor,
}

impl StaticUvlm {
    pub fn new(settings: &UvlmSettings, wake: &WakeSettings) -> Result<Self> {
        settings.validate()?;
        wake.validate(settings.horseshoe)?;
        Ok(Self {
            settings: settings.clone(),
            wake: wake.clone(),
            exec: Executor::new(settings.num_cores)?,
        })
    }

    fn context(&self, timestep: usize) -> SolveContext {
        SolveContext {
            exec: &self.exec,
            radius: self.settings.vortex_radius,
            truncation: self.wake.truncation,
            timestep,
        }
    }

    /// Rigid body velocity of every vertex, `v + omega x (zeta - centre)`.
    fn rigid_body_velocity(&self, zeta: MatRef<f64>) -> Mat<f64> {
        let v = &self.settings.rbm_vel_g;
        let mut zeta_dot = Mat::zeros(3, zeta.ncols());
        (0..zeta.ncols()).for_each(|j| {
            let r = sub(col3(zeta, j), self.settings.centre_rot_g);
            let u = add([v[0], v[1], v[2]], cross([v[3], v[4], v[5]], r));
            set_col3(zeta_dot.as_mut(), j, u);
        });
        zeta_dot
    }

    /// Places the wake behind each trailing edge with the current trailing
    /// edge circulation.
    fn generate_wakes(&self, aero: &mut AeroTimestep) {
        let ctx = wake_context(&self.settings, self.settings.dt);
        aero.wakes = aero
            .surfaces
            .iter()
            .map(|s| {
                let te = s.trailing_edge();
                let te_gamma = s.trailing_edge_gamma();
                if self.settings.horseshoe {
                    horseshoe_wake(te.as_ref(), &s.local_chords(), &te_gamma, ctx.direction)
                } else {
                    generate_wake(&self.wake.shape, te.as_ref(), &te_gamma, self.wake.mstar, &ctx)
                }
            })
            .collect();
    }

    /// Steady solution of one snapshot. Geometry comes from the caller;
    /// `u_ext`, `zeta_dot`, the wake, circulation and forces are overwritten.
    pub fn solve(
        &self,
        aero: &mut AeroTimestep,
        beam: &StructTimestep,
        mut nonlifting: Option<&mut NonliftingTimestep>,
        timestep: usize,
    ) -> Result<()> {
        let ctx = self.context(timestep);
        let origin = beam.origin();

        generate_inflow(
            &self.settings,
            &mut aero.surfaces,
            nonlifting.as_deref_mut().map(|n| n.surfaces.as_mut_slice()),
            origin,
            0.,
        );
        aero.surfaces.iter_mut().for_each(|s| {
            s.zeta_dot = self.rigid_body_velocity(s.zeta.as_ref());
            s.dynamic_forces.fill(0.);
            s.gamma_dot.fill(0.);
        });
        if let Some(n) = nonlifting.as_deref_mut() {
            n.surfaces.iter_mut().for_each(|b| {
                b.zeta_dot = self.rigid_body_velocity(b.zeta.as_ref());
            });
        }

        self.generate_wakes(aero);
        solve_system(
            &self.settings,
            aero,
            nonlifting.as_deref_mut().map(|n| n.surfaces.as_mut_slice()),
            true,
            &ctx,
        )?;

        if self.settings.n_rollup > 0 && !self.settings.horseshoe && !self.settings.only_nonlifting {
            self.rollup(aero, nonlifting.as_deref_mut(), origin, &ctx)?;
        }

        check_finite(&aero.surfaces, timestep)?;
        aero.beam_forces.take();
        recover_forces(
            &self.settings,
            aero,
            nonlifting.as_deref_mut().map(|n| n.surfaces.as_mut_slice()),
            &ctx,
        );
        info!(timestep, "static aerodynamic solution");
        Ok(())
    }

    /// Free wake relaxation: each wake line is re-marched from the trailing
    /// edge along the local velocity with pseudo time step `rollup_dt`.
    fn rollup(
        &self,
        aero: &mut AeroTimestep,
        mut nonlifting: Option<&mut NonliftingTimestep>,
        origin: Vec3,
        ctx: &SolveContext,
    ) -> Result<()> {
        let settings = &self.settings;
        let mut previous: Option<Vec<Vec3>> = None;
        let mut change = f64::INFINITY;

        for iteration in 0..settings.n_rollup {
            let field = LiftingField::new(&aero.surfaces, &aero.wakes, &ctx.truncation);
            let u_ext = wake_inflow(settings, &aero.wakes, origin, 0.);
            let points = aero
                .wakes
                .iter()
                .flat_map(|w| (0..w.n_vertices()).map(|v| col3(w.zeta_star.as_ref(), v)))
                .collect_vec();
            let u_ind = field.velocities(&points, settings.vortex_radius_wake_ind, ctx.exec);

            if let Some(prev) = &previous {
                change = max_velocity_change(prev, &u_ind);
            }

            let mut offset = 0;
            aero.wakes.iter_mut().zip(u_ext).for_each(|(w, u)| {
                let rows = w.rows;
                (0..=w.n).for_each(|i_n| {
                    (1..=rows).for_each(|i_m| {
                        let v_prev = vertex_index(rows, i_m - 1, i_n);
                        let v = vertex_index(rows, i_m, i_n);
                        if ctx.truncation.is_frozen(w.dist_to_orig[v]) {
                            return;
                        }
                        let vel = add(col3(u.as_ref(), v_prev), u_ind[offset + v_prev]);
                        let x = add(col3(w.zeta_star.as_ref(), v_prev), scale(settings.rollup_dt, vel));
                        set_col3(w.zeta_star.as_mut(), v, x);
                    });
                });
                offset += w.n_vertices();
                w.update_distances();
            });

            if (iteration + 1) % settings.rollup_aic_refresh == 0 {
                solve_system(
                    settings,
                    aero,
                    nonlifting.as_deref_mut().map(|n| n.surfaces.as_mut_slice()),
                    true,
                    ctx,
                )?;
            }

            debug!(timestep = ctx.timestep, iteration, residual = change, "wake rollup");
            if change < settings.rollup_tolerance {
                return Ok(());
            }
            previous = Some(u_ind);
        }

        if settings.strict {
            return Err(AeroelasticError::NonConvergence {
                solver: "wake rollup",
                timestep: ctx.timestep,
                iterations: settings.n_rollup,
                residual: change,
            });
        }
        warn!(
            timestep = ctx.timestep,
            iterations = settings.n_rollup,
            residual = change,
            "wake rollup did not converge"
        );
        Ok(())
    }
}

//------------------------------------------------------------------------------
// Time-marching solver
//------------------------------------------------------------------------------

pub struct StepUvlm {
    pub settings: UvlmSettings,
    pub wake: WakeSettings,
    exec: Executor,
}

impl StepUvlm {
    pub fn new(settings: &UvlmSettings, wake: &WakeSettings) -> Result<Self> {
        settings.validate()?;
        wake.validate(settings.horseshoe)?;
        if settings.horseshoe {
            return Err(AeroelasticError::config(
                "uvlm.horseshoe",
                "time-marching solutions need a free or prescribed wake",
            ));
        }
        Ok(Self {
            settings: settings.clone(),
            wake: wake.clone(),
            exec: Executor::new(settings.num_cores)?,
        })
    }

    fn context(&self, timestep: usize) -> SolveContext {
        SolveContext {
            exec: &self.exec,
            radius: self.settings.vortex_radius,
            truncation: self.wake.truncation,
            timestep,
        }
    }

    /// Convects the previous wake over `dt` and sheds a new row at the current
    /// trailing edge. Wake vertices are stored relative to the A origin, so
    /// every vertex, convected or frozen, takes the opposite of the origin's
    /// displacement: frozen rows stay fixed in the inertial frame.
    fn update_wake(
        &self,
        previous: &AeroTimestep,
        previous_origin: Vec3,
        next: &mut AeroTimestep,
        origin: Vec3,
        t: f64,
        dt: f64,
    ) {
        let settings = &self.settings;
        let mut wakes = previous.wakes.clone();
        let u_ext = wake_inflow(settings, &wakes, previous_origin, t - dt);

        let u_ind = match settings.convection_scheme {
            ConvectionScheme::Prescribed => None,
            ConvectionScheme::Free => {
                let field = LiftingField::new(&previous.surfaces, &previous.wakes, &self.wake.truncation);
                let points = wakes
                    .iter()
                    .flat_map(|w| (0..w.n_vertices()).map(|v| col3(w.zeta_star.as_ref(), v)))
                    .collect_vec();
                Some(field.velocities(&points, settings.vortex_radius_wake_ind, &self.exec))
            }
        };

        let shift = sub(previous_origin, origin);
        let ctx = wake_context(settings, dt);
        let mut offset = 0;
        wakes
            .iter_mut()
            .zip(u_ext)
            .zip(previous.surfaces.iter().zip(next.surfaces.iter()))
            .for_each(|((w, mut u), (prev_surface, surface))| {
                if let Some(u_ind) = &u_ind {
                    (0..w.n_vertices()).for_each(|v| {
                        let x = add(col3(u.as_ref(), v), u_ind[offset + v]);
                        set_col3(u.as_mut(), v, x);
                    });
                }
                offset += w.n_vertices();

                convect_vertices(w, u.as_ref(), dt, &self.wake.truncation);
                // Back to coordinates relative to the new origin
                (0..w.n_vertices()).for_each(|v| {
                    let x = add(col3(w.zeta_star.as_ref(), v), shift);
                    set_col3(w.zeta_star.as_mut(), v, x);
                });

                let te = surface.trailing_edge();
                let te_gamma = prev_surface.trailing_edge_gamma();
                if settings.cfl1 {
                    shift_rows(w, te.as_ref(), &te_gamma, self.wake.mstar);
                } else {
                    regenerate_and_interpolate(
                        w,
                        &self.wake.shape,
                        te.as_ref(),
                        &te_gamma,
                        self.wake.mstar,
                        &ctx,
                    );
                }
            });
        next.wakes = wakes;
    }

    /// Advances the aerodynamics from `previous` to `next` over `dt`. `next`
    /// must hold the new grid positions and velocities.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &self,
        previous: &AeroTimestep,
        previous_beam: &StructTimestep,
        next: &mut AeroTimestep,
        beam: &StructTimestep,
        mut nonlifting: Option<&mut NonliftingTimestep>,
        t: f64,
        dt: f64,
        timestep: usize,
    ) -> Result<()> {
        let ctx = self.context(timestep);
        let origin = beam.origin();

        generate_inflow(
            &self.settings,
            &mut next.surfaces,
            nonlifting.as_deref_mut().map(|n| n.surfaces.as_mut_slice()),
            origin,
            t,
        );
        self.update_wake(previous, previous_beam.origin(), next, origin, t, dt);

        solve_system(
            &self.settings,
            next,
            nonlifting.as_deref_mut().map(|n| n.surfaces.as_mut_slice()),
            false,
            &ctx,
        )?;
        check_finite(&next.surfaces, timestep)?;

        next.surfaces
            .iter_mut()
            .zip(previous.surfaces.iter())
            .for_each(|(s, prev)| {
                s.gamma_dot = (&s.gamma - &prev.gamma) * Scale(1. / dt);
            });

        recover_forces(
            &self.settings,
            next,
            nonlifting.as_deref_mut().map(|n| n.surfaces.as_mut_slice()),
            &ctx,
        );
        unsteady_forces(&mut next.surfaces, self.settings.rho);
        next.beam_forces.take();
        debug!(timestep, t, "unsteady aerodynamic step");
        Ok(())
    }
}
