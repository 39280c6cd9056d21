//! Influence coefficient assembly and induced velocity evaluation.
//!
//! Singularities are gathered into flat lists whose entries point at a
//! column of the unknown (or strength) vector, so one routine serves bound
//! rings, wakes folded onto their trailing edge panels and wakes of known
//! circulation.

use faer::prelude::*;
use itertools::Itertools;
use rayon::prelude::*;

use crate::grid::{panel_average, panel_index, LiftingSurface, NonliftingSurface, WakeSurface};
use crate::util::{add, col3, dot, sub, Vec3};
use crate::vlm::biot_savart;
use crate::vlm::Executor;
use crate::wake::WakeTruncation;

/// Vortex ring whose strength is `weight * strength[column]`.
#[derive(Debug, Clone, Copy)]
pub struct RingElement {
    pub corners: [Vec3; 4],
    pub column: usize,
    pub weight: f64,
}

/// Point source of strength `sigma[column] * area` at `centre`.
#[derive(Debug, Clone, Copy)]
pub struct SourceElement {
    pub centre: Vec3,
    pub area: f64,
    pub column: usize,
}

/// Collocation point where the normal velocity is evaluated.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub point: Vec3,
    pub normal: Vec3,
    pub self_column: Option<usize>, // Source column of the panel owning the point
}

/// First global panel index of each surface.
pub fn panel_offsets(counts: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut offset = 0;
    counts
        .map(|c| {
            let o = offset;
            offset += c;
            o
        })
        .collect()
}

//------------------------------------------------------------------------------
// Element lists
//------------------------------------------------------------------------------

pub fn bound_rings(surfaces: &[LiftingSurface]) -> Vec<RingElement> {
    let offsets = panel_offsets(surfaces.iter().map(|s| s.n_panels()));
    surfaces
        .iter()
        .zip(offsets)
        .flat_map(|(s, offset)| {
            (0..s.n)
                .cartesian_product(0..s.m)
                .map(move |(i_n, i_m)| RingElement {
                    corners: s.corners(i_m, i_n),
                    column: offset + panel_index(s.m, i_m, i_n),
                    weight: 1.,
                })
        })
        .collect()
}

/// Wake rings pointing at the trailing edge panel of their column, for the
/// steady Kutta condition where the wake carries the trailing edge
/// circulation.
pub fn folded_wake_rings(
    surfaces: &[LiftingSurface],
    wakes: &[WakeSurface],
    truncation: &WakeTruncation,
) -> Vec<RingElement> {
    let offsets = panel_offsets(surfaces.iter().map(|s| s.n_panels()));
    surfaces
        .iter()
        .zip(wakes)
        .zip(offsets)
        .filter(|((s, _), _)| !s.is_empty())
        .flat_map(|((s, w), offset)| {
            (0..w.n)
                .cartesian_product(0..w.rows)
                .map(move |(i_n, i_m)| RingElement {
                    corners: w.corners(i_m, i_n),
                    column: offset + panel_index(s.m, s.m - 1, i_n),
                    weight: truncation.influence_scale(w.panel_distance(i_m, i_n)),
                })
        })
        .collect()
}

/// Wake rings pointing at their own entry of the concatenated wake
/// circulation.
pub fn wake_rings(wakes: &[WakeSurface], truncation: &WakeTruncation) -> Vec<RingElement> {
    let offsets = panel_offsets(wakes.iter().map(|w| w.n_panels()));
    wakes
        .iter()
        .zip(offsets)
        .flat_map(|(w, offset)| {
            (0..w.n)
                .cartesian_product(0..w.rows)
                .map(move |(i_n, i_m)| RingElement {
                    corners: w.corners(i_m, i_n),
                    column: offset + panel_index(w.rows, i_m, i_n),
                    weight: truncation.influence_scale(w.panel_distance(i_m, i_n)),
                })
        })
        .collect()
}

pub fn sources(bodies: &[NonliftingSurface]) -> Vec<SourceElement> {
    let offsets = panel_offsets(bodies.iter().map(|b| b.n_panels()));
    bodies
        .iter()
        .zip(offsets)
        .flat_map(|(b, offset)| {
            (0..b.n_panels()).map(move |p| SourceElement {
                centre: col3(b.geometry.collocation.as_ref(), p),
                area: b.geometry.areas[p],
                column: offset + p,
            })
        })
        .collect()
}

pub fn lifting_targets(surfaces: &[LiftingSurface]) -> Vec<Target> {
    surfaces
        .iter()
        .flat_map(|s| {
            (0..s.n_panels()).map(move |p| Target {
                point: col3(s.geometry.collocation.as_ref(), p),
                normal: col3(s.geometry.normals.as_ref(), p),
                self_column: None,
            })
        })
        .collect()
}

pub fn nonlifting_targets(bodies: &[NonliftingSurface]) -> Vec<Target> {
    let offsets = panel_offsets(bodies.iter().map(|b| b.n_panels()));
    bodies
        .iter()
        .zip(offsets)
        .flat_map(|(b, offset)| {
            (0..b.n_panels()).map(move |p| Target {
                point: col3(b.geometry.collocation.as_ref(), p),
                normal: col3(b.geometry.normals.as_ref(), p),
                self_column: Some(offset + p),
            })
        })
        .collect()
}

/// Concatenated ring circulation of all surfaces in global panel order.
pub fn gather_gamma(surfaces: &[LiftingSurface]) -> Vec<f64> {
    surfaces
        .iter()
        .flat_map(|s| {
            (0..s.n)
                .cartesian_product(0..s.m)
                .map(move |(i_n, i_m)| s.gamma[(i_m, i_n)])
        })
        .collect()
}

pub fn gather_gamma_star(wakes: &[WakeSurface]) -> Vec<f64> {
    wakes
        .iter()
        .flat_map(|w| {
            (0..w.n)
                .cartesian_product(0..w.rows)
                .map(move |(i_n, i_m)| w.gamma_star[(i_m, i_n)])
        })
        .collect()
}

pub fn gather_sigma(bodies: &[NonliftingSurface]) -> Vec<f64> {
    bodies
        .iter()
        .flat_map(|b| {
            (0..b.n)
                .cartesian_product(0..b.m)
                .map(move |(i_n, i_m)| b.sigma[(i_m, i_n)])
        })
        .collect()
}

//------------------------------------------------------------------------------
// Influence matrices
//------------------------------------------------------------------------------

/// Normal velocity influence of ring elements on targets
/// `[n_targets][n_columns]`. Rows are computed in parallel.
pub fn ring_aic(
    targets: &[Target],
    rings: &[RingElement],
    n_columns: usize,
    radius: f64,
    exec: &Executor,
) -> Mat<f64> {
    let rows: Vec<Vec<f64>> = exec.install(|| {
        targets
            .par_iter()
            .map(|t| {
                let mut row = vec![0.; n_columns];
                rings.iter().for_each(|e| {
                    let v = biot_savart::ring(t.point, &e.corners, e.weight, radius);
                    row[e.column] += dot(v, t.normal);
                });
                row
            })
            .collect()
    });
    Mat::from_fn(targets.len(), n_columns, |i, j| rows[i][j])
}

/// Normal velocity influence of unit sources on targets. A target on its own
/// source panel sees half the source strength.
pub fn source_aic(
    targets: &[Target],
    sources: &[SourceElement],
    n_columns: usize,
    radius: f64,
    exec: &Executor,
) -> Mat<f64> {
    let rows: Vec<Vec<f64>> = exec.install(|| {
        targets
            .par_iter()
            .map(|t| {
                let mut row = vec![0.; n_columns];
                sources.iter().for_each(|e| {
                    if t.self_column == Some(e.column) {
                        row[e.column] += 0.5;
                    } else {
                        let v = biot_savart::point_source(t.point, e.centre, 1., e.area, radius);
                        row[e.column] += dot(v, t.normal);
                    }
                });
                row
            })
            .collect()
    });
    Mat::from_fn(targets.len(), n_columns, |i, j| rows[i][j])
}

//------------------------------------------------------------------------------
// Induced velocities
//------------------------------------------------------------------------------

#[inline]
pub fn ring_velocity(x: Vec3, rings: &[RingElement], strength: &[f64], radius: f64) -> Vec3 {
    rings.iter().fold([0., 0., 0.], |v, e| {
        let g = e.weight * strength[e.column];
        if g == 0. {
            v
        } else {
            add(v, biot_savart::ring(x, &e.corners, g, radius))
        }
    })
}

#[inline]
pub fn source_velocity(
    x: Vec3,
    sources: &[SourceElement],
    sigma: &[f64],
    radius: f64,
    skip_column: Option<usize>,
) -> Vec3 {
    sources
        .iter()
        .filter(|e| Some(e.column) != skip_column)
        .fold([0., 0., 0.], |v, e| {
            add(v, biot_savart::point_source(x, e.centre, sigma[e.column], e.area, radius))
        })
}

/// Velocity induced at each point by the ring elements, in point order.
pub fn ring_velocities(
    points: &[Vec3],
    rings: &[RingElement],
    strength: &[f64],
    radius: f64,
    exec: &Executor,
) -> Vec<Vec3> {
    exec.install(|| {
        points
            .par_iter()
            .map(|&x| ring_velocity(x, rings, strength, radius))
            .collect()
    })
}

/// Lifting system singularities with known strengths: bound rings and wakes.
pub struct LiftingField {
    pub bound: Vec<RingElement>,
    pub gamma: Vec<f64>,
    pub wake: Vec<RingElement>,
    pub gamma_star: Vec<f64>,
}

impl LiftingField {
    pub fn new(
        surfaces: &[LiftingSurface],
        wakes: &[WakeSurface],
        truncation: &WakeTruncation,
    ) -> Self {
        Self {
            bound: bound_rings(surfaces),
            gamma: gather_gamma(surfaces),
            wake: wake_rings(wakes, truncation),
            gamma_star: gather_gamma_star(wakes),
        }
    }

    pub fn velocity(&self, x: Vec3, radius: f64) -> Vec3 {
        add(
            ring_velocity(x, &self.bound, &self.gamma, radius),
            ring_velocity(x, &self.wake, &self.gamma_star, radius),
        )
    }

    pub fn velocities(&self, points: &[Vec3], radius: f64, exec: &Executor) -> Vec<Vec3> {
        exec.install(|| {
            points
                .par_iter()
                .map(|&x| self.velocity(x, radius))
                .collect()
        })
    }
}

/// Mean of a vertex field over each panel's corners, in global panel order.
pub fn panel_averages(
    surfaces: &[LiftingSurface],
    field: impl Fn(&LiftingSurface) -> MatRef<f64>,
) -> Vec<Vec3> {
    surfaces
        .iter()
        .flat_map(|s| {
            let f = field(s);
            (0..s.n)
                .cartesian_product(0..s.m)
                .map(move |(i_n, i_m)| panel_average(f, s.m, i_m, i_n))
                .collect_vec()
        })
        .collect()
}

/// Relative flow `u_ext - zeta_dot` at each collocation point.
pub fn collocation_relative_flow(surfaces: &[LiftingSurface]) -> Vec<Vec3> {
    let u = panel_averages(surfaces, |s| s.u_ext.as_ref());
    let zd = panel_averages(surfaces, |s| s.zeta_dot.as_ref());
    u.iter()
        .zip(zd.iter())
        .map(|(&a, &b)| sub(a, b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::RectangularWing;
    use crate::structure::StructTimestep;
    use approx::assert_relative_eq;

    fn wing() -> Vec<LiftingSurface> {
        let wing = RectangularWing::new(1., 4., 3, 5);
        let beam = StructTimestep::new(wing.node_positions());
        crate::grid::generate_surfaces(&[wing.definition(0)], &beam)
    }

    #[test]
    fn test_aic_independent_of_thread_count() {
        let surfaces = wing();
        let targets = lifting_targets(&surfaces);
        let rings = bound_rings(&surfaces);
        let serial = ring_aic(&targets, &rings, 15, 1e-6, &Executor::new(1).unwrap());
        let parallel = ring_aic(&targets, &rings, 15, 1e-6, &Executor::new(4).unwrap());
        (0..15).for_each(|i| {
            (0..15).for_each(|j| assert_eq!(serial[(i, j)].to_bits(), parallel[(i, j)].to_bits()))
        });
    }

    #[test]
    fn test_self_influence_opposes_normal() {
        // A ring with positive circulation induces velocity along its own
        // normal at its centre
        let surfaces = wing();
        let targets = lifting_targets(&surfaces);
        let rings = bound_rings(&surfaces);
        let aic = ring_aic(&targets, &rings, 15, 1e-6, &Executor::default());
        (0..15).for_each(|p| assert!(aic[(p, p)] > 0.));
    }

    #[test]
    fn test_source_self_term() {
        let zeta = Mat::from_fn(3, 4, |i, v| match (i, v) {
            (0, 1) | (0, 3) => 1.,
            (1, 2) | (1, 3) => 1.,
            _ => 0.,
        });
        let body = NonliftingSurface::new(1, 1, zeta);
        let bodies = vec![body];
        let aic = source_aic(
            &nonlifting_targets(&bodies),
            &sources(&bodies),
            1,
            1e-6,
            &Executor::default(),
        );
        assert_relative_eq!(aic[(0, 0)], 0.5);
    }
}
