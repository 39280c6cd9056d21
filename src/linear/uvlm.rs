//! Linearised vortex-lattice aerodynamics about a converged steady state.
//!
//! States are `[gamma, gamma_star, gamma_prev]` (bound circulation, wake
//! circulation and bound circulation of the previous step); inputs are
//! `[zeta, zeta_dot, u_ext]` perturbations at every vertex (G frame, three
//! components per vertex, surfaces concatenated); outputs are the vertex
//! force perturbations. The wake geometry is frozen and convects one row per
//! step. The input of step `n` is the grid state at which the circulation of
//! step `n + 1` is solved.

use faer::prelude::*;
use itertools::Itertools;
use rayon::prelude::*;

use crate::config::{LinearSettings, UvlmSettings};
use crate::error::{AeroelasticError, Result};
use crate::grid::{panel_index, panel_vertices, AeroTimestep};
use crate::linear::state_space::StateSpace;
use crate::util::{add, col3, cross, norm, scale, skew, sub, Vec3};
use crate::vlm::aic::{
    bound_rings, collocation_relative_flow, lifting_targets, panel_offsets, ring_aic, wake_rings,
    LiftingField, RingElement,
};
use crate::vlm::{biot_savart, Executor};
use crate::wake::WakeTruncation;

/// Derivatives of the unit normal of a panel with respect to its corners
/// `[A, B, C, D]`, each `[3][3]`.
pub fn normal_derivatives(corners: &[Vec3; 4]) -> [Mat<f64>; 4] {
    let d1 = sub(corners[2], corners[0]);
    let d2 = sub(corners[3], corners[1]);
    let c = cross(d1, d2);
    let c_norm = norm(c);
    let n = scale(1. / c_norm, c);
    let proj = Mat::from_fn(3, 3, |i, j| {
        ((if i == j { 1. } else { 0. }) - n[i] * n[j]) / c_norm
    });
    let p_d1 = &proj * &skew(d1);
    let p_d2 = &proj * &skew(d2);
    [
        p_d2.clone(),
        &p_d1 * Scale(-1.),
        &p_d2 * Scale(-1.),
        p_d1,
    ]
}

/// Bound segment carrying a Kutta-Joukowski load.
#[derive(Debug, Clone, Copy)]
struct Segment {
    a: usize, // Global vertex indices
    b: usize,
    pa: Vec3,
    pb: Vec3,
    gamma: f64,
    panel: usize, // Global panel index
    v0: Vec3,     // Total reference velocity at the midpoint
}

#[derive(Debug, Clone)]
pub struct LinearUvlm {
    pub ss: StateSpace,
    pub n_bound: usize,
    pub n_wake: usize,
    pub n_vertices: usize,
    pub dfv: Mat<f64>,       // Frozen circulation force derivative wrt zeta_dot `[3 nv][3 nv]`
    pub forces0: Vec<Vec3>,  // Reference vertex forces, G frame
    pub velocity_terms_in_beam: bool,
}

impl LinearUvlm {
    pub fn new(
        aero: &AeroTimestep,
        uvlm: &UvlmSettings,
        truncation: &WakeTruncation,
        settings: &LinearSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let exec = Executor::new(uvlm.num_cores)?;
        let (surfaces, wakes) = (&aero.surfaces, &aero.wakes);
        let (radius, rho, dt) = (uvlm.vortex_radius, uvlm.rho, settings.dt);

        let targets = lifting_targets(surfaces);
        let bound = bound_rings(surfaces);
        let wake = wake_rings(wakes, truncation);
        let nb = targets.len();
        let nw: usize = wakes.iter().map(|w| w.n_panels()).sum();
        let nv: usize = surfaces.iter().map(|s| s.n_vertices()).sum();
        let ns = 2 * nb + nw;
        let b_off = panel_offsets(surfaces.iter().map(|s| s.n_panels()));
        let w_off = panel_offsets(wakes.iter().map(|w| w.n_panels()));
        let v_off = panel_offsets(surfaces.iter().map(|s| s.n_vertices()));

        let a_b = ring_aic(&targets, &bound, nb, radius, &exec);
        let a_w = ring_aic(&targets, &wake, nw, radius, &exec);
        let p = a_b.partial_piv_lu().solve(Mat::<f64>::identity(nb, nb));
        if let Some(i) = (0..nb).find(|&i| (0..nb).any(|j| !p[(i, j)].is_finite())) {
            let surface = b_off.iter().rposition(|&o| o <= i).unwrap_or(0);
            return Err(AeroelasticError::SingularSystem {
                timestep: 0,
                surface,
                panel: i - b_off[surface],
            });
        }

        //----------------------------------------------------------------------
        // Wake convection, one row per step
        //----------------------------------------------------------------------

        let mut c_gw = Mat::<f64>::zeros(nw, nb);
        let mut c_ww = Mat::<f64>::zeros(nw, nw);
        (0..surfaces.len()).for_each(|i_surf| {
            let (s, w) = (&surfaces[i_surf], &wakes[i_surf]);
            if s.is_empty() || w.rows == 0 {
                return;
            }
            (0..w.n).for_each(|i_n| {
                let te = b_off[i_surf] + panel_index(s.m, s.m - 1, i_n);
                c_gw[(w_off[i_surf] + panel_index(w.rows, 0, i_n), te)] = 1.;
                (1..w.rows).for_each(|i_m| {
                    c_ww[(
                        w_off[i_surf] + panel_index(w.rows, i_m, i_n),
                        w_off[i_surf] + panel_index(w.rows, i_m - 1, i_n),
                    )] = 1.;
                });
            });
        });

        //----------------------------------------------------------------------
        // Boundary condition perturbation
        //----------------------------------------------------------------------

        let field = LiftingField::new(surfaces, wakes, truncation);
        let rel = collocation_relative_flow(surfaces);
        let mut w_in = Mat::<f64>::zeros(nb, 9 * nv);
        for (i_surf, s) in surfaces.iter().enumerate() {
            for (i_n, i_m) in (0..s.n).cartesian_product(0..s.m) {
                let p_glob = b_off[i_surf] + panel_index(s.m, i_m, i_n);
                let normal = targets[p_glob].normal;
                let v0 = add(rel[p_glob], field.velocity(targets[p_glob].point, radius));
                let dn = normal_derivatives(&s.corners(i_m, i_n));
                for (k, &v) in panel_vertices(s.m, i_m, i_n).iter().enumerate() {
                    let col = 3 * (v_off[i_surf] + v);
                    (0..3).for_each(|j| {
                        let v0_dn = (0..3).map(|i| v0[i] * dn[k][(i, j)]).sum::<f64>();
                        w_in[(p_glob, col + j)] -= v0_dn;
                        w_in[(p_glob, 3 * nv + col + j)] += 0.25 * normal[j];
                        w_in[(p_glob, 6 * nv + col + j)] -= 0.25 * normal[j];
                    });
                }
            }
        }

        //----------------------------------------------------------------------
        // State equation
        //----------------------------------------------------------------------

        let pa_w = &p * &a_w;
        let mut a = Mat::<f64>::zeros(ns, ns);
        a.as_mut()
            .submatrix_mut(0, 0, nb, nb)
            .copy_from(&pa_w * &c_gw * Scale(-1.));
        a.as_mut()
            .submatrix_mut(0, nb, nb, nw)
            .copy_from(&pa_w * &c_ww * Scale(-1.));
        a.as_mut().submatrix_mut(nb, 0, nw, nb).copy_from(&c_gw);
        a.as_mut().submatrix_mut(nb, nb, nw, nw).copy_from(&c_ww);
        a.as_mut()
            .submatrix_mut(nb + nw, 0, nb, nb)
            .copy_from(Mat::<f64>::identity(nb, nb));
        let mut b = Mat::<f64>::zeros(ns, 9 * nv);
        b.as_mut().submatrix_mut(0, 0, nb, 9 * nv).copy_from(&p * &w_in);

        //----------------------------------------------------------------------
        // Output equation
        //----------------------------------------------------------------------

        let mut segments = vec![];
        for (i_surf, s) in surfaces.iter().enumerate() {
            for (i_n, i_m) in (0..s.n).cartesian_product(0..s.m) {
                let vertices = panel_vertices(s.m, i_m, i_n);
                for k in (0..4).filter(|&k| !(k == 1 && i_m == s.m - 1)) {
                    let (va, vb) = (vertices[k], vertices[(k + 1) % 4]);
                    segments.push(Segment {
                        a: v_off[i_surf] + va,
                        b: v_off[i_surf] + vb,
                        pa: col3(s.zeta.as_ref(), va),
                        pb: col3(s.zeta.as_ref(), vb),
                        gamma: s.gamma[(i_m, i_n)],
                        panel: b_off[i_surf] + panel_index(s.m, i_m, i_n),
                        v0: scale(
                            0.5,
                            sub(
                                add(col3(s.u_ext.as_ref(), va), col3(s.u_ext.as_ref(), vb)),
                                add(col3(s.zeta_dot.as_ref(), va), col3(s.zeta_dot.as_ref(), vb)),
                            ),
                        ),
                    });
                }
            }
        }
        let induced = exec.install(|| {
            segments
                .par_iter()
                .map(|seg| field.velocity(scale(0.5, add(seg.pa, seg.pb)), radius))
                .collect::<Vec<_>>()
        });
        segments
            .iter_mut()
            .zip(induced)
            .for_each(|(seg, v)| seg.v0 = add(seg.v0, v));

        let mut vertex_segments = vec![vec![]; nv];
        segments.iter().enumerate().for_each(|(i, seg)| {
            vertex_segments[seg.a].push(i);
            vertex_segments[seg.b].push(i);
        });

        // Circulation columns of each vertex, three rows per vertex
        let rows: Vec<Vec<[f64; 3]>> = exec.install(|| {
            vertex_segments
                .par_iter()
                .map(|ids| {
                    let mut row = vec![[0.; 3]; ns];
                    ids.iter().for_each(|&i| {
                        let seg = &segments[i];
                        let dl = sub(seg.pb, seg.pa);
                        let mid = scale(0.5, add(seg.pa, seg.pb));
                        let f = scale(0.5 * rho, cross(seg.v0, dl));
                        row[seg.panel] = add(row[seg.panel], f);
                        let induction = |rings: &[RingElement], offset: usize, row: &mut Vec<[f64; 3]>| {
                            rings.iter().for_each(|e| {
                                let v = biot_savart::ring(mid, &e.corners, e.weight, radius);
                                let f = scale(0.5 * rho * seg.gamma, cross(v, dl));
                                row[offset + e.column] = add(row[offset + e.column], f);
                            });
                        };
                        induction(&bound, 0, &mut row);
                        induction(&wake, nb, &mut row);
                    });
                    row
                })
                .collect()
        });
        let mut c = Mat::from_fn(3 * nv, ns, |i, j| rows[i / 3][j][i % 3]);

        if settings.unsteady_force {
            for (i_surf, s) in surfaces.iter().enumerate() {
                for (i_n, i_m) in (0..s.n).cartesian_product(0..s.m) {
                    let p_local = panel_index(s.m, i_m, i_n);
                    let p_glob = b_off[i_surf] + p_local;
                    let coef = -0.25 * rho * s.geometry.areas[p_local] / dt;
                    let normal = col3(s.geometry.normals.as_ref(), p_local);
                    panel_vertices(s.m, i_m, i_n).iter().for_each(|&v| {
                        let row = 3 * (v_off[i_surf] + v);
                        (0..3).for_each(|i| {
                            c[(row + i, p_glob)] += coef * normal[i];
                            c[(row + i, nb + nw + p_glob)] -= coef * normal[i];
                        });
                    });
                }
            }
        }

        let mut d = Mat::<f64>::zeros(3 * nv, 9 * nv);
        let mut dfv = Mat::<f64>::zeros(3 * nv, 3 * nv);
        for seg in &segments {
            let dl = sub(seg.pb, seg.pa);
            // d f / d V for the relative flow, averaged over the two ends
            let rel = &skew(dl) * Scale(-0.25 * rho * seg.gamma);
            let geo = &skew(seg.v0) * Scale(0.5 * rho * seg.gamma);
            for row in [3 * seg.a, 3 * seg.b] {
                for (end, sign) in [(seg.a, -1.), (seg.b, 1.)] {
                    let col = 3 * end;
                    (0..3).cartesian_product(0..3).for_each(|(i, j)| {
                        d[(row + i, col + j)] += sign * geo[(i, j)];
                        d[(row + i, 6 * nv + col + j)] += rel[(i, j)];
                        dfv[(row + i, col + j)] -= rel[(i, j)];
                    });
                }
            }
        }
        if !settings.velocity_terms_in_beam {
            d.as_mut().submatrix_mut(0, 3 * nv, 3 * nv, 3 * nv).copy_from(&dfv);
        }

        let forces0 = surfaces
            .iter()
            .flat_map(|s| (0..s.n_vertices()).map(move |v| col3(s.forces.as_ref(), v)))
            .collect_vec();

        Ok(Self {
            ss: StateSpace::new(a, b, c, d, dt)?,
            n_bound: nb,
            n_wake: nw,
            n_vertices: nv,
            dfv,
            forces0,
            velocity_terms_in_beam: settings.velocity_terms_in_beam,
        })
    }

    /// Input vector with the given external flow perturbation at every vertex.
    pub fn uniform_gust_input(&self, du: Vec3) -> Mat<f64> {
        let nv = self.n_vertices;
        Mat::from_fn(9 * nv, 1, |i, _| if i >= 6 * nv { du[(i - 6 * nv) % 3] } else { 0. })
    }
}
