//! Circulation and source strength solves, and force recovery.

use faer::prelude::*;
use itertools::{izip, Itertools};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{AeroelasticError, Result};
use crate::grid::{
    panel_average, panel_index, panel_vertices, LiftingSurface, NonliftingSurface, WakeSurface,
};
use crate::util::{add, col3, cross, dot, norm, scale, sub, Vec3};
use crate::vlm::aic::{
    bound_rings, collocation_relative_flow, folded_wake_rings, gather_gamma_star, gather_sigma,
    lifting_targets, nonlifting_targets, panel_offsets, ring_aic, ring_velocity, source_aic,
    source_velocity, sources, wake_rings, LiftingField,
};
use crate::vlm::Executor;
use crate::wake::WakeTruncation;

/// Relative residual above which a solved system is reported as singular.
const SINGULAR_RESIDUAL: f64 = 1e-6;

/// Settings shared by the solves of one timestep.
pub struct SolveContext<'a> {
    pub exec: &'a Executor,
    pub radius: f64,
    pub truncation: WakeTruncation,
    pub timestep: usize,
}

/// Maps a global row index to `(surface, panel)`.
fn locate(offsets: &[usize], i: usize) -> (usize, usize) {
    let s = offsets.iter().rposition(|&o| o <= i).unwrap_or(0);
    (s, i - offsets.get(s).copied().unwrap_or(0))
}

/// Dense LU solve with finiteness and residual checks.
fn solve_dense(
    a: &Mat<f64>,
    rhs: &[f64],
    timestep: usize,
    locate: impl Fn(usize) -> (usize, usize),
) -> Result<Vec<f64>> {
    let n = rhs.len();
    if n == 0 {
        return Ok(vec![]);
    }
    let b = Mat::from_fn(n, 1, |i, _| rhs[i]);
    let x = a.partial_piv_lu().solve(&b);

    let singular = |i: usize| {
        let (surface, panel) = locate(i);
        AeroelasticError::SingularSystem {
            timestep,
            surface,
            panel,
        }
    };

    if let Some(i) = (0..n).find(|&i| !x[(i, 0)].is_finite()) {
        return Err(singular(i));
    }

    let r = a * &x - &b;
    let r_norm = r.norm_l2();
    if r_norm > SINGULAR_RESIDUAL * b.norm_l2().max(f64::MIN_POSITIVE) {
        let worst = (0..n)
            .max_by(|&i, &j| r[(i, 0)].abs().total_cmp(&r[(j, 0)].abs()))
            .unwrap_or(0);
        return Err(singular(worst));
    }
    Ok((0..n).map(|i| x[(i, 0)]).collect())
}

fn scatter_gamma(surfaces: &mut [LiftingSurface], gamma: &[f64]) {
    let offsets = panel_offsets(surfaces.iter().map(|s| s.n_panels()));
    surfaces.iter_mut().zip(offsets).for_each(|(s, offset)| {
        (0..s.n).cartesian_product(0..s.m).for_each(|(i_n, i_m)| {
            s.gamma[(i_m, i_n)] = gamma[offset + panel_index(s.m, i_m, i_n)];
        });
    });
}

fn scatter_sigma(bodies: &mut [NonliftingSurface], sigma: &[f64]) {
    let offsets = panel_offsets(bodies.iter().map(|b| b.n_panels()));
    bodies.iter_mut().zip(offsets).for_each(|(b, offset)| {
        (0..b.n).cartesian_product(0..b.m).for_each(|(i_n, i_m)| {
            b.sigma[(i_m, i_n)] = sigma[offset + panel_index(b.m, i_m, i_n)];
        });
    });
}

/// Every wake row takes the trailing edge circulation of its column.
pub fn set_steady_wake_gamma(surfaces: &[LiftingSurface], wakes: &mut [WakeSurface]) {
    surfaces.iter().zip(wakes.iter_mut()).for_each(|(s, w)| {
        let te = s.trailing_edge_gamma();
        (0..w.rows)
            .cartesian_product(0..w.n)
            .for_each(|(i_m, i_n)| w.gamma_star[(i_m, i_n)] = te[i_n]);
    });
}

/// Right hand side `-(u_ext - zeta_dot + u_extra) . n` at the lifting
/// collocation points.
fn lifting_rhs(surfaces: &[LiftingSurface], extra: Option<&[Vec3]>) -> Vec<f64> {
    let normals = lifting_targets(surfaces);
    collocation_relative_flow(surfaces)
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let v = extra.map_or(v, |e| add(v, e[i]));
            -dot(v, normals[i].normal)
        })
        .collect()
}

fn body_relative_flow(bodies: &[NonliftingSurface]) -> Vec<Vec3> {
    bodies
        .iter()
        .flat_map(|b| {
            (0..b.n)
                .cartesian_product(0..b.m)
                .map(|(i_n, i_m)| {
                    sub(
                        panel_average(b.u_ext.as_ref(), b.m, i_m, i_n),
                        panel_average(b.zeta_dot.as_ref(), b.m, i_m, i_n),
                    )
                })
                .collect_vec()
        })
        .collect()
}

fn body_rhs(bodies: &[NonliftingSurface], extra: Option<&[Vec3]>) -> Vec<f64> {
    let targets = nonlifting_targets(bodies);
    body_relative_flow(bodies)
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let v = extra.map_or(v, |e| add(v, e[i]));
            -dot(v, targets[i].normal)
        })
        .collect()
}

//------------------------------------------------------------------------------
// Lifting surfaces
//------------------------------------------------------------------------------

/// Steady solve: the wake carries the trailing edge circulation of its
/// column, folded into the influence matrix. Wake circulation is updated.
pub fn solve_lifting_static(
    surfaces: &mut [LiftingSurface],
    wakes: &mut [WakeSurface],
    ctx: &SolveContext,
) -> Result<()> {
    let targets = lifting_targets(surfaces);
    let mut rings = bound_rings(surfaces);
    rings.extend(folded_wake_rings(surfaces, wakes, &ctx.truncation));
    let aic = ring_aic(&targets, &rings, targets.len(), ctx.radius, ctx.exec);
    let rhs = lifting_rhs(surfaces, None);
    let offsets = panel_offsets(surfaces.iter().map(|s| s.n_panels()));
    let gamma = solve_dense(&aic, &rhs, ctx.timestep, |i| locate(&offsets, i))?;
    scatter_gamma(surfaces, &gamma);
    set_steady_wake_gamma(surfaces, wakes);
    debug!(timestep = ctx.timestep, n_panels = gamma.len(), "steady circulation solved");
    Ok(())
}

/// Unsteady solve: the wake circulation is known and enters the right
/// hand side.
pub fn solve_lifting_unsteady(
    surfaces: &mut [LiftingSurface],
    wakes: &[WakeSurface],
    ctx: &SolveContext,
) -> Result<()> {
    let targets = lifting_targets(surfaces);
    let u_wake = wake_velocity_at(&targets.iter().map(|t| t.point).collect_vec(), wakes, ctx);
    let aic = ring_aic(&targets, &bound_rings(surfaces), targets.len(), ctx.radius, ctx.exec);
    let rhs = lifting_rhs(surfaces, Some(&u_wake));
    let offsets = panel_offsets(surfaces.iter().map(|s| s.n_panels()));
    let gamma = solve_dense(&aic, &rhs, ctx.timestep, |i| locate(&offsets, i))?;
    scatter_gamma(surfaces, &gamma);
    Ok(())
}

/// Velocity induced by the wakes of known circulation at each point.
pub fn wake_velocity_at(points: &[Vec3], wakes: &[WakeSurface], ctx: &SolveContext) -> Vec<Vec3> {
    let rings = wake_rings(wakes, &ctx.truncation);
    let gamma_star = gather_gamma_star(wakes);
    ctx.exec.install(|| {
        points
            .par_iter()
            .map(|&x| ring_velocity(x, &rings, &gamma_star, ctx.radius))
            .collect()
    })
}

//------------------------------------------------------------------------------
// Nonlifting bodies
//------------------------------------------------------------------------------

/// Source strengths of the bodies on their own, with an optional velocity
/// induced by other singularities at their collocation points.
pub fn solve_nonlifting(
    bodies: &mut [NonliftingSurface],
    extra: Option<&[Vec3]>,
    ctx: &SolveContext,
) -> Result<()> {
    let targets = nonlifting_targets(bodies);
    let aic = source_aic(&targets, &sources(bodies), targets.len(), ctx.radius, ctx.exec);
    let rhs = body_rhs(bodies, extra);
    let offsets = panel_offsets(bodies.iter().map(|b| b.n_panels()));
    let sigma = solve_dense(&aic, &rhs, ctx.timestep, |i| locate(&offsets, i))?;
    scatter_sigma(bodies, &sigma);
    Ok(())
}

/// Lifting circulation and body sources solved as one block system.
/// `steady` folds the wake onto the trailing edge panels, otherwise the
/// wake circulation is known. Nonlifting bodies are numbered after the
/// lifting surfaces in error reports.
pub fn solve_coupled(
    surfaces: &mut [LiftingSurface],
    wakes: &mut [WakeSurface],
    bodies: &mut [NonliftingSurface],
    steady: bool,
    ctx: &SolveContext,
) -> Result<()> {
    let t_l = lifting_targets(surfaces);
    let t_n = nonlifting_targets(bodies);
    let (n_l, n_n) = (t_l.len(), t_n.len());

    let mut rings = bound_rings(surfaces);
    if steady {
        rings.extend(folded_wake_rings(surfaces, wakes, &ctx.truncation));
    }
    let srcs = sources(bodies);
    let a_ll = ring_aic(&t_l, &rings, n_l, ctx.radius, ctx.exec);
    let a_ls = source_aic(&t_l, &srcs, n_n, ctx.radius, ctx.exec);
    let a_nl = ring_aic(&t_n, &rings, n_l, ctx.radius, ctx.exec);
    let a_nn = source_aic(&t_n, &srcs, n_n, ctx.radius, ctx.exec);
    let aic = Mat::from_fn(n_l + n_n, n_l + n_n, |i, j| match (i < n_l, j < n_l) {
        (true, true) => a_ll[(i, j)],
        (true, false) => a_ls[(i, j - n_l)],
        (false, true) => a_nl[(i - n_l, j)],
        (false, false) => a_nn[(i - n_l, j - n_l)],
    });

    let (rhs_l, rhs_n) = if steady {
        (lifting_rhs(surfaces, None), body_rhs(bodies, None))
    } else {
        let u_l = wake_velocity_at(&t_l.iter().map(|t| t.point).collect_vec(), wakes, ctx);
        let u_n = wake_velocity_at(&t_n.iter().map(|t| t.point).collect_vec(), wakes, ctx);
        (lifting_rhs(surfaces, Some(&u_l)), body_rhs(bodies, Some(&u_n)))
    };
    let rhs = rhs_l.into_iter().chain(rhs_n).collect_vec();

    let offsets = panel_offsets(
        surfaces
            .iter()
            .map(|s| s.n_panels())
            .chain(bodies.iter().map(|b| b.n_panels())),
    );
    let x = solve_dense(&aic, &rhs, ctx.timestep, |i| locate(&offsets, i))?;
    scatter_gamma(surfaces, &x[..n_l]);
    scatter_sigma(bodies, &x[n_l..]);
    if steady {
        set_steady_wake_gamma(surfaces, wakes);
    }
    Ok(())
}

/// Pressure coefficient `1 - |V_t|^2 / |V_ref|^2` on each body panel, with
/// `V_ref` the local relative flow. Lifting singularities are included when
/// `surfaces` is given.
pub fn nonlifting_pressure(
    bodies: &mut [NonliftingSurface],
    lifting: Option<(&[LiftingSurface], &[WakeSurface])>,
    ctx: &SolveContext,
) {
    let targets = nonlifting_targets(bodies);
    let srcs = sources(bodies);
    let sigma = gather_sigma(bodies);
    let field = lifting.map(|(s, w)| LiftingField::new(s, w, &ctx.truncation));
    let rel = body_relative_flow(bodies);
    let cp: Vec<f64> = ctx.exec.install(|| {
        targets
            .par_iter()
            .zip(rel.par_iter())
            .map(|(t, &v_ref)| {
                let induced = source_velocity(t.point, &srcs, &sigma, ctx.radius, t.self_column);
                let mut v = add(v_ref, induced);
                if let Some(f) = &field {
                    v = add(v, f.velocity(t.point, ctx.radius));
                }
                let v_t = sub(v, scale(dot(v, t.normal), t.normal));
                let q = dot(v_ref, v_ref);
                if q < f64::EPSILON {
                    0.
                } else {
                    1. - dot(v_t, v_t) / q
                }
            })
            .collect()
    });
    let offsets = panel_offsets(bodies.iter().map(|b| b.n_panels()));
    bodies.iter_mut().zip(offsets).for_each(|(b, offset)| {
        (0..b.n).cartesian_product(0..b.m).for_each(|(i_n, i_m)| {
            b.pressure_coefficient[(i_m, i_n)] = cp[offset + panel_index(b.m, i_m, i_n)];
        });
    });
}

//------------------------------------------------------------------------------
// Forces
//------------------------------------------------------------------------------

/// Steady Kutta-Joukowski force `rho * gamma * (V x dl)` on every bound
/// segment, half to each end vertex. The trailing edge segment of the last
/// panel row is shared with the wake and carries no load. `V` is the relative
/// flow plus the velocity induced by all singularities at the segment
/// midpoint. Results go to `forces` (moment rows stay zero).
pub fn steady_forces(
    surfaces: &mut [LiftingSurface],
    wakes: &[WakeSurface],
    bodies: Option<&[NonliftingSurface]>,
    rho: f64,
    ctx: &SolveContext,
) {
    let field = LiftingField::new(surfaces, wakes, &ctx.truncation);
    let body_sources = bodies.map(|b| (sources(b), gather_sigma(b)));
    let lattice: &[LiftingSurface] = surfaces;

    let panels = lattice
        .iter()
        .enumerate()
        .flat_map(|(i_surf, s)| {
            (0..s.n)
                .cartesian_product(0..s.m)
                .map(move |(i_n, i_m)| (i_surf, i_m, i_n))
        })
        .collect_vec();

    let contributions: Vec<Vec<(usize, usize, Vec3)>> = ctx.exec.install(|| {
        panels
            .par_iter()
            .map(|&(i_surf, i_m, i_n)| {
                let s = &lattice[i_surf];
                let gamma = s.gamma[(i_m, i_n)];
                let vertices = panel_vertices(s.m, i_m, i_n);
                (0..4)
                    .filter(|&k| !(k == 1 && i_m == s.m - 1))
                    .flat_map(|k| {
                        let (va, vb) = (vertices[k], vertices[(k + 1) % 4]);
                        let (a, b) = (col3(s.zeta.as_ref(), va), col3(s.zeta.as_ref(), vb));
                        let mid = scale(0.5, add(a, b));
                        let rel = scale(
                            0.5,
                            sub(
                                add(col3(s.u_ext.as_ref(), va), col3(s.u_ext.as_ref(), vb)),
                                add(col3(s.zeta_dot.as_ref(), va), col3(s.zeta_dot.as_ref(), vb)),
                            ),
                        );
                        let mut v = add(rel, field.velocity(mid, ctx.radius));
                        if let Some((srcs, sigma)) = &body_sources {
                            v = add(v, source_velocity(mid, srcs, sigma, ctx.radius, None));
                        }
                        let f = scale(0.5 * rho * gamma, cross(v, sub(b, a)));
                        [(i_surf, va, f), (i_surf, vb, f)]
                    })
                    .collect()
            })
            .collect()
    });

    surfaces.iter_mut().for_each(|s| s.forces.fill(0.));
    contributions.iter().flatten().for_each(|&(i_surf, v, f)| {
        let forces = &mut surfaces[i_surf].forces;
        (0..3).for_each(|i| forces[(i, v)] += f[i]);
    });
}

/// Unsteady force `-rho * A * n * dgamma/dt` of each panel, a quarter to each
/// corner, with the sign convention of [`steady_forces`] (a growing negative
/// circulation lifts along the normal).
pub fn unsteady_forces(surfaces: &mut [LiftingSurface], rho: f64) {
    surfaces.iter_mut().for_each(|s| {
        s.dynamic_forces.fill(0.);
        (0..s.n).cartesian_product(0..s.m).for_each(|(i_n, i_m)| {
            let p = panel_index(s.m, i_m, i_n);
            let n = col3(s.geometry.normals.as_ref(), p);
            let f = scale(
                -0.25 * rho * s.geometry.areas[p] * s.gamma_dot[(i_m, i_n)],
                n,
            );
            panel_vertices(s.m, i_m, i_n).iter().for_each(|&v| {
                (0..3).for_each(|i| s.dynamic_forces[(i, v)] += f[i]);
            });
        });
    });
}

/// Sum of the vertex forces of a surface `[fx, fy, fz]`.
pub fn total_force(forces: MatRef<f64>) -> Vec3 {
    (0..forces.ncols()).fold([0., 0., 0.], |acc, v| add(acc, col3(forces, v)))
}

/// Checks every circulation for NaN or infinity.
pub fn check_finite(surfaces: &[LiftingSurface], timestep: usize) -> Result<()> {
    match surfaces.iter().position(|s| {
        (0..s.m)
            .cartesian_product(0..s.n)
            .any(|(i, j)| !s.gamma[(i, j)].is_finite())
    }) {
        Some(surface) => Err(AeroelasticError::NonFinite {
            timestep,
            surface,
            quantity: "circulation",
        }),
        None => Ok(()),
    }
}

/// Largest magnitude of a velocity change between two point sets.
pub fn max_velocity_change(a: &[Vec3], b: &[Vec3]) -> f64 {
    izip!(a, b).fold(0., |m, (&x, &y)| m.max(norm(sub(x, y))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{generate_surfaces, vertex_index, RectangularWing};
    use crate::structure::StructTimestep;
    use crate::wake::{generate_wake, WakeContext, WakeShape};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn wing(m: usize, n: usize, u: Vec3) -> (Vec<LiftingSurface>, Vec<WakeSurface>) {
        let wing = RectangularWing::new(1., 8., m, n).y_root(-4.);
        let beam = StructTimestep::new(wing.node_positions());
        let mut surfaces = generate_surfaces(&[wing.definition(0)], &beam);
        surfaces.iter_mut().for_each(|s| {
            s.u_ext = Mat::from_fn(3, s.n_vertices(), |i, _| u[i]);
        });
        let ctx = WakeContext {
            u_inf: 10.,
            direction: [1., 0., 0.],
            dt: 0.25 / 10.,
        };
        let wakes = surfaces
            .iter()
            .map(|s| {
                generate_wake(
                    &WakeShape::default(),
                    s.trailing_edge().as_ref(),
                    &vec![0.; s.n],
                    40,
                    &ctx,
                )
            })
            .collect();
        (surfaces, wakes)
    }

    /// Sphere with its axis along x and outward normals; `i_m` runs from the
    /// downstream pole at `x = centre + radius` to the upstream one.
    fn sphere(m: usize, n: usize, radius: f64, centre: Vec3, u: Vec3) -> NonliftingSurface {
        let mut zeta = Mat::zeros(3, (m + 1) * (n + 1));
        (0..=n).cartesian_product(0..=m).for_each(|(i_n, i_m)| {
            let theta = PI * i_m as f64 / m as f64;
            let phi = 2. * PI * i_n as f64 / n as f64;
            let x = [
                radius * theta.cos(),
                radius * theta.sin() * phi.cos(),
                radius * theta.sin() * phi.sin(),
            ];
            crate::util::set_col3(zeta.as_mut(), vertex_index(m, i_m, i_n), add(centre, x));
        });
        let mut body = NonliftingSurface::new(m, n, zeta);
        body.u_ext = Mat::from_fn(3, body.zeta.ncols(), |i, _| u[i]);
        body
    }

    /// Normal velocity left at each body collocation point, lifting
    /// singularities included when given.
    fn body_normal_velocity(
        bodies: &[NonliftingSurface],
        lifting: Option<(&[LiftingSurface], &[WakeSurface])>,
        radius: f64,
    ) -> Vec<f64> {
        let srcs = sources(bodies);
        let sigma = gather_sigma(bodies);
        let field = lifting.map(|(s, w)| LiftingField::new(s, w, &WakeTruncation::Truncate));
        izip!(nonlifting_targets(bodies), body_relative_flow(bodies))
            .map(|(t, v)| {
                let mut v = add(v, source_velocity(t.point, &srcs, &sigma, radius, t.self_column));
                if let Some(f) = &field {
                    v = add(v, f.velocity(t.point, radius));
                }
                let own = t.self_column.map_or(0., |c| 0.5 * sigma[c]);
                dot(v, t.normal) + own
            })
            .collect()
    }

    fn context(exec: &Executor) -> SolveContext {
        SolveContext {
            exec,
            radius: 1e-6,
            truncation: WakeTruncation::Truncate,
            timestep: 0,
        }
    }

    #[test]
    fn test_zero_flow_zero_circulation() {
        let exec = Executor::default();
        let (mut surfaces, mut wakes) = wing(4, 6, [0., 0., 0.]);
        solve_lifting_static(&mut surfaces, &mut wakes, &context(&exec)).unwrap();
        assert_eq!(surfaces[0].gamma.norm_max(), 0.);
        assert_eq!(wakes[0].gamma_star.norm_max(), 0.);
    }

    #[test]
    fn test_flat_plate_zero_incidence() {
        let exec = Executor::default();
        let (mut surfaces, mut wakes) = wing(1, 4, [10., 0., 0.]);
        let ctx = context(&exec);
        solve_lifting_static(&mut surfaces, &mut wakes, &ctx).unwrap();
        steady_forces(&mut surfaces, &wakes, None, 1.225, &ctx);
        assert!(surfaces[0].gamma.norm_max() < 1e-12);
        let f = total_force(surfaces[0].forces.as_ref());
        assert!(norm(f) < 1e-10);
    }

    #[test]
    fn test_lift_at_incidence() {
        // Aspect ratio 8 flat plate at 5 degrees, lift slope close to
        // 2 pi AR / (AR + 2) for an elliptic wing
        let exec = Executor::default();
        let alpha = 5f64.to_radians();
        let u = [10. * alpha.cos(), 0., 10. * alpha.sin()];
        let (mut surfaces, mut wakes) = wing(4, 16, u);
        let ctx = context(&exec);
        solve_lifting_static(&mut surfaces, &mut wakes, &ctx).unwrap();
        steady_forces(&mut surfaces, &wakes, None, 1.225, &ctx);

        let f = total_force(surfaces[0].forces.as_ref());
        let lift = f[2] * alpha.cos() - f[0] * alpha.sin();
        let cl = lift / (0.5 * 1.225 * 100. * 8.);
        let cl_elliptic = 2. * std::f64::consts::PI * 8. / 10. * alpha;
        assert!(cl > 0.);
        assert_relative_eq!(cl, cl_elliptic, max_relative = 0.1);

        // Symmetric about the root
        assert_relative_eq!(
            surfaces[0].gamma[(0, 0)],
            surfaces[0].gamma[(0, 15)],
            max_relative = 1e-8
        );
    }

    #[test]
    fn test_thread_count_bit_identical() {
        let alpha = 3f64.to_radians();
        let u = [10. * alpha.cos(), 0., 10. * alpha.sin()];
        let run = |n_threads| {
            let exec = Executor::new(n_threads).unwrap();
            let (mut surfaces, mut wakes) = wing(3, 8, u);
            let ctx = context(&exec);
            solve_lifting_static(&mut surfaces, &mut wakes, &ctx).unwrap();
            steady_forces(&mut surfaces, &wakes, None, 1.225, &ctx);
            surfaces.remove(0)
        };
        let (a, b) = (run(1), run(3));
        (0..a.n_vertices()).for_each(|v| {
            (0..3).for_each(|i| assert_eq!(a.forces[(i, v)].to_bits(), b.forces[(i, v)].to_bits()))
        });
    }

    #[test]
    fn test_singular_system_reports_location() {
        // Two coincident surfaces give two identical rows
        let exec = Executor::default();
        let (surfaces, mut wakes) = wing(1, 2, [10., 0., 1.]);
        let mut surfaces = vec![surfaces[0].clone(), surfaces[0].clone()];
        wakes.push(wakes[0].clone());
        match solve_lifting_static(&mut surfaces, &mut wakes, &context(&exec)) {
            Err(AeroelasticError::SingularSystem { timestep, .. }) => assert_eq!(timestep, 0),
            other => panic!("expected a singular system, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unsteady_force_direction() {
        let (mut surfaces, _) = wing(1, 1, [0., 0., 0.]);
        surfaces[0].gamma_dot[(0, 0)] = -2.;
        unsteady_forces(&mut surfaces, 1.);
        let f = total_force(surfaces[0].dynamic_forces.as_ref());
        // Area 8, normal +z
        assert_relative_eq!(f[2], 16., epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_sources() {
        let exec = Executor::default();
        let ctx = context(&exec);
        let (m, n) = (16, 16);
        let mut bodies = vec![sphere(m, n, 1., [0., 0., 0.], [10., 0., 0.])];
        solve_nonlifting(&mut bodies, None, &ctx).unwrap();

        body_normal_velocity(&bodies, None, ctx.radius)
            .iter()
            .for_each(|&v| assert!(v.abs() < 1e-9, "normal velocity {v}"));

        let b = &bodies[0];
        // Axisymmetric and antisymmetric fore and aft
        (0..m).for_each(|i_m| {
            (1..n).for_each(|i_n| {
                assert_relative_eq!(b.sigma[(i_m, i_n)], b.sigma[(i_m, 0)], epsilon = 1e-9)
            });
            assert_relative_eq!(b.sigma[(i_m, 0)], -b.sigma[(m - 1 - i_m, 0)], epsilon = 1e-9);
        });
        // Closed body: no net source
        let (net, total) = (0..b.n_panels()).fold((0., 0.), |(net, total), p| {
            let s = b.sigma[(p % m, p / m)] * b.geometry.areas[p];
            (net + s, total + s.abs())
        });
        assert!(net.abs() < 1e-9 * total);

        // Flow enters the upstream half, sigma = -1.5 u cos(theta)
        assert!(b.sigma[(m - 1, 0)] > 0.);
        assert!(b.sigma[(0, 0)] < 0.);
        let theta = PI * 4.5 / m as f64;
        assert_relative_eq!(b.sigma[(4, 0)], -15. * theta.cos(), max_relative = 0.15);
    }

    #[test]
    fn test_wing_above_body() {
        let exec = Executor::default();
        let ctx = context(&exec);
        let alpha = 5f64.to_radians();
        let u = [10. * alpha.cos(), 0., 10. * alpha.sin()];

        let (mut isolated, mut isolated_wakes) = wing(4, 8, u);
        solve_lifting_static(&mut isolated, &mut isolated_wakes, &ctx).unwrap();

        let (mut surfaces, mut wakes) = wing(4, 8, u);
        let mut bodies = vec![sphere(12, 12, 0.5, [0.5, 0., -0.8], u)];
        solve_coupled(&mut surfaces, &mut wakes, &mut bodies, true, &ctx).unwrap();

        // The body changes the circulation
        let change = (&surfaces[0].gamma - &isolated[0].gamma).norm_max();
        assert!(change > 1e-4 * isolated[0].gamma.norm_max());
        assert!(bodies[0].sigma.norm_max() > 0.);

        // No penetration on the wing
        let field = LiftingField::new(&surfaces, &wakes, &ctx.truncation);
        let srcs = sources(&bodies);
        let sigma = gather_sigma(&bodies);
        izip!(lifting_targets(&surfaces), collocation_relative_flow(&surfaces)).for_each(|(t, v)| {
            let v = add(
                add(v, field.velocity(t.point, ctx.radius)),
                source_velocity(t.point, &srcs, &sigma, ctx.radius, None),
            );
            assert!(dot(v, t.normal).abs() < 1e-8);
        });
        // and on the body
        body_normal_velocity(&bodies, Some((&surfaces, &wakes)), ctx.radius)
            .iter()
            .for_each(|&v| assert!(v.abs() < 1e-8, "normal velocity {v}"));

        // Unsteady coupling with the wake known reproduces the steady state
        let (mut unsteady, _) = wing(4, 8, u);
        let mut unsteady_bodies = vec![sphere(12, 12, 0.5, [0.5, 0., -0.8], u)];
        solve_coupled(&mut unsteady, &mut wakes, &mut unsteady_bodies, false, &ctx).unwrap();
        assert!((&unsteady[0].gamma - &surfaces[0].gamma).norm_max() < 1e-8);
        assert!((&unsteady_bodies[0].sigma - &bodies[0].sigma).norm_max() < 1e-8);
    }

    #[test]
    fn test_body_pressure() {
        let exec = Executor::default();
        let ctx = context(&exec);
        let m = 16;
        let mut bodies = vec![sphere(m, 16, 1., [0., 0., 0.], [10., 0., 0.])];
        solve_nonlifting(&mut bodies, None, &ctx).unwrap();
        nonlifting_pressure(&mut bodies, None, &ctx);
        let cp = &bodies[0].pressure_coefficient;
        // Near stagnation ahead and behind, suction at the equator
        assert!(cp[(m - 1, 0)] > 0.5);
        assert!(cp[(0, 3)] > 0.5);
        assert!(cp[(m / 2, 0)] < -0.8);
    }
}
